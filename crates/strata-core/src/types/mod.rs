//! # Core Type Definitions
//!
//! This module contains the element model shared by every other module:
//! - Typed property values (`TypedValue`, `PropertyKind`)
//! - Element identity (`ElementId`) and the element record itself (`Element`)
//! - Error types (`StoreError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` where needed for deterministic ordering in
//!   `BTreeMap`/`BTreeSet`
//! - Carry properties in a `BTreeMap` so iteration order is stable

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// =============================================================================
// PROPERTY VALUES
// =============================================================================

/// The runtime kind of a property value.
///
/// Every kind maps to exactly one serialiser in a registry. Kinds used for
/// identifiers or group-by properties must resolve to an order-preserving
/// serialiser (see `SerialiserRegistry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyKind {
    /// Boolean flag.
    Bool,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// UTF-8 string.
    Str,
    /// Opaque byte payload.
    Bytes,
}

/// A typed property value.
///
/// Values are immutable once attached to an element. Aggregation produces
/// new values rather than mutating existing ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TypedValue {
    /// Boolean flag.
    Bool(bool),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// UTF-8 string.
    Str(String),
    /// Opaque byte payload.
    Bytes(Vec<u8>),
}

impl TypedValue {
    /// The kind of this value.
    #[must_use]
    pub const fn kind(&self) -> PropertyKind {
        match self {
            Self::Bool(_) => PropertyKind::Bool,
            Self::I32(_) => PropertyKind::I32,
            Self::I64(_) => PropertyKind::I64,
            Self::Str(_) => PropertyKind::Str,
            Self::Bytes(_) => PropertyKind::Bytes,
        }
    }

    /// Convenience constructor for string values.
    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }
}

// =============================================================================
// ELEMENT IDENTITY
// =============================================================================

/// The identity portion of an element: a vertex for entities, an endpoint
/// pair plus directed flag for edges.
///
/// Identifier values participate in the encoded key and are never aggregated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ElementId {
    /// A vertex entity.
    Entity {
        /// The vertex identifier.
        vertex: TypedValue,
    },
    /// An edge between two vertices.
    Edge {
        /// The source vertex identifier.
        source: TypedValue,
        /// The destination vertex identifier.
        destination: TypedValue,
        /// Whether the edge is directed (source → destination) or undirected.
        directed: bool,
    },
}

// =============================================================================
// ELEMENT
// =============================================================================

/// A graph element: an entity or an edge, belonging to exactly one schema
/// group, carrying typed properties.
///
/// Construction is explicit and eager: all identity fields are required up
/// front and properties are passed as a complete map. There is no builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// The schema group this element belongs to.
    pub group: String,
    /// The element identity (vertex, or endpoints + directed flag).
    pub id: ElementId,
    /// Property name → typed value.
    pub properties: BTreeMap<String, TypedValue>,
}

impl Element {
    /// Create an entity element.
    #[must_use]
    pub fn entity(
        group: impl Into<String>,
        vertex: TypedValue,
        properties: BTreeMap<String, TypedValue>,
    ) -> Self {
        Self {
            group: group.into(),
            id: ElementId::Entity { vertex },
            properties,
        }
    }

    /// Create an edge element.
    #[must_use]
    pub fn edge(
        group: impl Into<String>,
        source: TypedValue,
        destination: TypedValue,
        directed: bool,
        properties: BTreeMap<String, TypedValue>,
    ) -> Self {
        Self {
            group: group.into(),
            id: ElementId::Edge {
                source,
                destination,
                directed,
            },
            properties,
        }
    }

    /// Look up a property value by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&TypedValue> {
        self.properties.get(name)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors surfaced by the engine.
///
/// - No silent failures: malformed records fail loudly instead of being
///   skipped
/// - Substrate errors are wrapped with their original cause preserved
#[derive(Debug, Error)]
pub enum StoreError {
    /// No serialiser is registered for the requested property kind.
    #[error("no serialiser registered for property kind {0:?}")]
    UnsupportedType(PropertyKind),

    /// A required argument to a public operation was empty or invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The schema violates a load-time invariant; the whole schema is
    /// rejected.
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    /// An element could not be encoded (missing required field or a value
    /// whose runtime kind disagrees with the schema).
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// Stored bytes could not be decoded against the schema.
    #[error("decoding failed: {0}")]
    Decoding(String),

    /// An error originating in the storage substrate, re-surfaced with the
    /// original cause attached.
    #[error("storage substrate error: {context}")]
    Substrate {
        /// What the engine was doing when the substrate failed.
        context: String,
        /// The substrate's own error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    /// Wrap a substrate-originating error, preserving it as the source.
    pub fn substrate(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Substrate {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_value_kind() {
        assert_eq!(TypedValue::Bool(true).kind(), PropertyKind::Bool);
        assert_eq!(TypedValue::I32(-1).kind(), PropertyKind::I32);
        assert_eq!(TypedValue::I64(7).kind(), PropertyKind::I64);
        assert_eq!(TypedValue::str("x").kind(), PropertyKind::Str);
        assert_eq!(TypedValue::Bytes(vec![0]).kind(), PropertyKind::Bytes);
    }

    #[test]
    fn entity_constructor() {
        let e = Element::entity("person", TypedValue::str("alice"), BTreeMap::new());
        assert_eq!(e.group, "person");
        assert_eq!(
            e.id,
            ElementId::Entity {
                vertex: TypedValue::str("alice")
            }
        );
    }

    #[test]
    fn edge_constructor_and_property_lookup() {
        let mut props = BTreeMap::new();
        props.insert("count".to_string(), TypedValue::I64(3));
        let e = Element::edge(
            "knows",
            TypedValue::str("a"),
            TypedValue::str("b"),
            true,
            props,
        );
        assert_eq!(e.property("count"), Some(&TypedValue::I64(3)));
        assert_eq!(e.property("missing"), None);
    }

    #[test]
    fn substrate_error_preserves_cause() {
        use std::error::Error;
        let io = std::io::Error::other("boom");
        let err = StoreError::substrate("scan", io);
        assert!(err.source().is_some());
    }
}
