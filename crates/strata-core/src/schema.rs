//! # Schema Model
//!
//! Declares element groups, their identifier kinds, their properties, and
//! which properties participate in key identity (group-by) versus being
//! merged by an aggregate function.
//!
//! A schema is validated once against a serialiser registry when it is
//! constructed and is immutable afterwards; concurrent readers share it
//! lock-free. Any validation violation rejects the whole schema; there is
//! no partial load.

use crate::aggregate::AggregateFn;
use crate::serialise::SerialiserRegistry;
use crate::types::{PropertyKind, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// PROPERTY DEFINITIONS
// =============================================================================

/// Whether a property is part of the element's identity or is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyRole {
    /// Participates in the encoded key. Requires an order-preserving
    /// serialiser.
    GroupBy,
    /// Lives in the encoded value and is combined with this function when
    /// records share a key.
    Aggregated(AggregateFn),
}

/// A named, typed property declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Property name, unique within its group.
    pub name: String,
    /// The runtime kind of the property's values.
    pub kind: PropertyKind,
    /// Identity membership or aggregate function.
    pub role: PropertyRole,
}

impl PropertyDef {
    /// Declare a group-by property.
    #[must_use]
    pub fn group_by(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            role: PropertyRole::GroupBy,
        }
    }

    /// Declare an aggregated property.
    #[must_use]
    pub fn aggregated(name: impl Into<String>, kind: PropertyKind, func: AggregateFn) -> Self {
        Self {
            name: name.into(),
            kind,
            role: PropertyRole::Aggregated(func),
        }
    }

    /// The aggregate function bound to this property.
    ///
    /// Calling this on a group-by property is an internal invariant breach;
    /// it is reported as a schema error rather than panicking.
    pub fn aggregate_fn(&self) -> Result<AggregateFn, StoreError> {
        match self.role {
            PropertyRole::Aggregated(func) => Ok(func),
            PropertyRole::GroupBy => Err(StoreError::SchemaValidation(format!(
                "property '{}' is group-by and has no aggregate function",
                self.name
            ))),
        }
    }
}

// =============================================================================
// GROUP DEFINITIONS
// =============================================================================

/// Whether a group's elements are entities (one vertex) or edges (two
/// endpoints plus a directed flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupKind {
    /// Vertex entities.
    Entity,
    /// Directed or undirected edges.
    Edge,
}

/// One named element group: identifier kind plus property declarations.
///
/// Identifier fields (the vertex, or source + destination + directed flag)
/// are implicitly part of the key and are never declared as properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDef {
    /// Group name, unique within the schema.
    pub name: String,
    /// Entity or edge.
    pub kind: GroupKind,
    /// The kind of the identifier value(s). Edge endpoints share one kind.
    pub vertex_kind: PropertyKind,
    /// Property declarations in fixed field order. This order determines the
    /// byte layout of keys and values.
    properties: Vec<PropertyDef>,
}

impl GroupDef {
    /// Declare an entity group.
    #[must_use]
    pub fn entity(
        name: impl Into<String>,
        vertex_kind: PropertyKind,
        properties: Vec<PropertyDef>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: GroupKind::Entity,
            vertex_kind,
            properties,
        }
    }

    /// Declare an edge group.
    #[must_use]
    pub fn edge(
        name: impl Into<String>,
        vertex_kind: PropertyKind,
        properties: Vec<PropertyDef>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: GroupKind::Edge,
            vertex_kind,
            properties,
        }
    }

    /// All property declarations in declared order.
    #[must_use]
    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    /// The group-by properties in declared order.
    #[must_use]
    pub fn group_by_properties(&self) -> Vec<&PropertyDef> {
        self.properties
            .iter()
            .filter(|p| p.role == PropertyRole::GroupBy)
            .collect()
    }

    /// The aggregated properties in declared order.
    #[must_use]
    pub fn aggregated_properties(&self) -> Vec<&PropertyDef> {
        self.properties
            .iter()
            .filter(|p| matches!(p.role, PropertyRole::Aggregated(_)))
            .collect()
    }

    fn validate(&self, registry: &SerialiserRegistry) -> Result<(), StoreError> {
        let vertex_serialiser = registry.serialiser_for(self.vertex_kind).map_err(|_| {
            StoreError::SchemaValidation(format!(
                "group '{}': no serialiser for identifier kind {:?}",
                self.name, self.vertex_kind
            ))
        })?;
        if !vertex_serialiser.preserves_ordering() {
            return Err(StoreError::SchemaValidation(format!(
                "group '{}': identifier kind {:?} resolves to a serialiser that is not order-preserving",
                self.name, self.vertex_kind
            )));
        }

        let mut seen = std::collections::BTreeSet::new();
        for prop in &self.properties {
            if prop.name.is_empty() {
                return Err(StoreError::SchemaValidation(format!(
                    "group '{}': property with empty name",
                    self.name
                )));
            }
            if !seen.insert(prop.name.as_str()) {
                return Err(StoreError::SchemaValidation(format!(
                    "group '{}': duplicate property '{}'",
                    self.name, prop.name
                )));
            }
            let serialiser = registry.serialiser_for(prop.kind).map_err(|_| {
                StoreError::SchemaValidation(format!(
                    "group '{}': property '{}' has no serialiser for kind {:?}",
                    self.name, prop.name, prop.kind
                ))
            })?;
            match prop.role {
                PropertyRole::GroupBy => {
                    if !serialiser.preserves_ordering() {
                        return Err(StoreError::SchemaValidation(format!(
                            "group '{}': group-by property '{}' requires an order-preserving serialiser",
                            self.name, prop.name
                        )));
                    }
                }
                PropertyRole::Aggregated(func) => {
                    if !func.applicable_to(prop.kind) {
                        return Err(StoreError::SchemaValidation(format!(
                            "group '{}': aggregate {func:?} is not defined for property '{}' of kind {:?}",
                            self.name, prop.name, prop.kind
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

/// The process-wide schema: every group definition, keyed by group name.
///
/// Loaded once per store instance, read-only thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    groups: BTreeMap<String, GroupDef>,
}

impl Schema {
    /// Validate and assemble a schema from group definitions.
    ///
    /// Validation is all-or-nothing: the first violation rejects the whole
    /// schema.
    pub fn new(groups: Vec<GroupDef>, registry: &SerialiserRegistry) -> Result<Self, StoreError> {
        if groups.is_empty() {
            return Err(StoreError::SchemaValidation(
                "a schema requires at least one group".to_string(),
            ));
        }
        let mut map = BTreeMap::new();
        for group in groups {
            group.validate(registry)?;
            if map.contains_key(&group.name) {
                return Err(StoreError::SchemaValidation(format!(
                    "duplicate group '{}'",
                    group.name
                )));
            }
            map.insert(group.name.clone(), group);
        }
        Ok(Self { groups: map })
    }

    /// Look up a group by name.
    pub fn group(&self, name: &str) -> Result<&GroupDef, StoreError> {
        self.groups
            .get(name)
            .ok_or_else(|| StoreError::InvalidArgument(format!("unknown group '{name}'")))
    }

    /// All group names in deterministic order.
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}

// =============================================================================
// TESTS
// =============================================================================
