//! # Serialisation Registry
//!
//! Maps a property kind to a byte codec.
//!
//! - Selection is first-match against a priority-ordered handler list;
//!   broad handlers (the `postcard` catch-all) must be registered last
//! - Serialisers used for identifiers or group-by properties must be
//!   order-preserving: unsigned lexicographic order of the encoded bytes
//!   matches the natural order of the values
//! - Registries are explicit instances passed in at construction, never
//!   ambient global state, so tests can build isolated registries

use crate::types::{PropertyKind, StoreError, TypedValue};

// =============================================================================
// SERIALISER TRAIT
// =============================================================================

/// A byte codec for one or more property kinds.
///
/// Round-trip law: `decode(kind, encode(v)) == v` for every value `v` the
/// handler accepts.
pub trait Serialiser: std::fmt::Debug + Send + Sync {
    /// Whether this handler accepts values of the given kind.
    fn can_handle(&self, kind: PropertyKind) -> bool;

    /// Whether encoded bytes sort (unsigned, lexicographic) in the same
    /// order as the source values. Required for identifier and group-by
    /// serialisers; irrelevant for value-only serialisers.
    fn preserves_ordering(&self) -> bool;

    /// Encode a value into bytes.
    fn encode(&self, value: &TypedValue) -> Result<Vec<u8>, StoreError>;

    /// Decode bytes back into a value of the given kind.
    fn decode(&self, kind: PropertyKind, bytes: &[u8]) -> Result<TypedValue, StoreError>;
}

fn kind_mismatch(expected: &str, got: &TypedValue) -> StoreError {
    StoreError::Encoding(format!(
        "serialiser for {expected} given a {:?} value",
        got.kind()
    ))
}

// =============================================================================
// BUILT-IN SERIALISERS
// =============================================================================

/// Single-byte boolean codec: `false` → 0x00, `true` → 0x01.
#[derive(Debug, Default)]
pub struct BoolSerialiser;

impl Serialiser for BoolSerialiser {
    fn can_handle(&self, kind: PropertyKind) -> bool {
        kind == PropertyKind::Bool
    }

    fn preserves_ordering(&self) -> bool {
        true
    }

    fn encode(&self, value: &TypedValue) -> Result<Vec<u8>, StoreError> {
        match value {
            TypedValue::Bool(b) => Ok(vec![u8::from(*b)]),
            other => Err(kind_mismatch("Bool", other)),
        }
    }

    fn decode(&self, _kind: PropertyKind, bytes: &[u8]) -> Result<TypedValue, StoreError> {
        match bytes {
            [0] => Ok(TypedValue::Bool(false)),
            [1] => Ok(TypedValue::Bool(true)),
            _ => Err(StoreError::Decoding(format!(
                "expected a single 0/1 byte for Bool, got {} byte(s)",
                bytes.len()
            ))),
        }
    }
}

/// Big-endian i32 codec with the sign bit flipped so that byte order matches
/// numeric order.
#[derive(Debug, Default)]
pub struct OrderedI32Serialiser;

impl Serialiser for OrderedI32Serialiser {
    fn can_handle(&self, kind: PropertyKind) -> bool {
        kind == PropertyKind::I32
    }

    fn preserves_ordering(&self) -> bool {
        true
    }

    fn encode(&self, value: &TypedValue) -> Result<Vec<u8>, StoreError> {
        match value {
            TypedValue::I32(v) => Ok(((*v as u32) ^ 0x8000_0000).to_be_bytes().to_vec()),
            other => Err(kind_mismatch("I32", other)),
        }
    }

    fn decode(&self, _kind: PropertyKind, bytes: &[u8]) -> Result<TypedValue, StoreError> {
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| StoreError::Decoding(format!("expected 4 bytes for I32, got {}", bytes.len())))?;
        Ok(TypedValue::I32((u32::from_be_bytes(arr) ^ 0x8000_0000) as i32))
    }
}

/// Big-endian i64 codec with the sign bit flipped so that byte order matches
/// numeric order.
#[derive(Debug, Default)]
pub struct OrderedI64Serialiser;

impl Serialiser for OrderedI64Serialiser {
    fn can_handle(&self, kind: PropertyKind) -> bool {
        kind == PropertyKind::I64
    }

    fn preserves_ordering(&self) -> bool {
        true
    }

    fn encode(&self, value: &TypedValue) -> Result<Vec<u8>, StoreError> {
        match value {
            TypedValue::I64(v) => Ok(((*v as u64) ^ 0x8000_0000_0000_0000)
                .to_be_bytes()
                .to_vec()),
            other => Err(kind_mismatch("I64", other)),
        }
    }

    fn decode(&self, _kind: PropertyKind, bytes: &[u8]) -> Result<TypedValue, StoreError> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| StoreError::Decoding(format!("expected 8 bytes for I64, got {}", bytes.len())))?;
        Ok(TypedValue::I64(
            (u64::from_be_bytes(arr) ^ 0x8000_0000_0000_0000) as i64,
        ))
    }
}

/// UTF-8 string codec. Byte order equals lexicographic order of the UTF-8
/// encoding, which matches `String`'s natural `Ord`.
#[derive(Debug, Default)]
pub struct StringSerialiser;

impl Serialiser for StringSerialiser {
    fn can_handle(&self, kind: PropertyKind) -> bool {
        kind == PropertyKind::Str
    }

    fn preserves_ordering(&self) -> bool {
        true
    }

    fn encode(&self, value: &TypedValue) -> Result<Vec<u8>, StoreError> {
        match value {
            TypedValue::Str(s) => Ok(s.as_bytes().to_vec()),
            other => Err(kind_mismatch("Str", other)),
        }
    }

    fn decode(&self, _kind: PropertyKind, bytes: &[u8]) -> Result<TypedValue, StoreError> {
        String::from_utf8(bytes.to_vec())
            .map(TypedValue::Str)
            .map_err(|e| StoreError::Decoding(format!("invalid UTF-8 in Str value: {e}")))
    }
}

/// Identity codec for raw byte payloads.
#[derive(Debug, Default)]
pub struct BytesSerialiser;

impl Serialiser for BytesSerialiser {
    fn can_handle(&self, kind: PropertyKind) -> bool {
        kind == PropertyKind::Bytes
    }

    fn preserves_ordering(&self) -> bool {
        true
    }

    fn encode(&self, value: &TypedValue) -> Result<Vec<u8>, StoreError> {
        match value {
            TypedValue::Bytes(b) => Ok(b.clone()),
            other => Err(kind_mismatch("Bytes", other)),
        }
    }

    fn decode(&self, _kind: PropertyKind, bytes: &[u8]) -> Result<TypedValue, StoreError> {
        Ok(TypedValue::Bytes(bytes.to_vec()))
    }
}

/// Catch-all codec backed by `postcard`. Accepts every kind, is NOT
/// order-preserving, and must be registered last so the dedicated handlers
/// win first-match selection.
#[derive(Debug, Default)]
pub struct PostcardSerialiser;

impl Serialiser for PostcardSerialiser {
    fn can_handle(&self, _kind: PropertyKind) -> bool {
        true
    }

    fn preserves_ordering(&self) -> bool {
        false
    }

    fn encode(&self, value: &TypedValue) -> Result<Vec<u8>, StoreError> {
        postcard::to_allocvec(value).map_err(|e| StoreError::Encoding(e.to_string()))
    }

    fn decode(&self, kind: PropertyKind, bytes: &[u8]) -> Result<TypedValue, StoreError> {
        let value: TypedValue =
            postcard::from_bytes(bytes).map_err(|e| StoreError::Decoding(e.to_string()))?;
        if value.kind() != kind {
            return Err(StoreError::Decoding(format!(
                "decoded a {:?} value where the schema expects {kind:?}",
                value.kind()
            )));
        }
        Ok(value)
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// A priority-ordered list of serialisers.
///
/// Lookup is first-match, so narrow handlers must precede broad ones.
/// Immutable after construction; concurrent readers share it lock-free.
pub struct SerialiserRegistry {
    handlers: Vec<Box<dyn Serialiser>>,
}

impl std::fmt::Debug for SerialiserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialiserRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl SerialiserRegistry {
    /// Build a registry from an explicit, priority-ordered handler list.
    #[must_use]
    pub fn new(handlers: Vec<Box<dyn Serialiser>>) -> Self {
        Self { handlers }
    }

    /// Select the serialiser for a property kind: the first handler that
    /// accepts it.
    pub fn serialiser_for(&self, kind: PropertyKind) -> Result<&dyn Serialiser, StoreError> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(kind))
            .map(AsRef::as_ref)
            .ok_or(StoreError::UnsupportedType(kind))
    }

    /// Encode a value with the serialiser selected for its own kind.
    pub fn encode(&self, value: &TypedValue) -> Result<Vec<u8>, StoreError> {
        self.serialiser_for(value.kind())?.encode(value)
    }

    /// Decode bytes with the serialiser selected for the given kind.
    pub fn decode(&self, kind: PropertyKind, bytes: &[u8]) -> Result<TypedValue, StoreError> {
        self.serialiser_for(kind)?.decode(kind, bytes)
    }
}

impl Default for SerialiserRegistry {
    /// The standard handler list: dedicated order-preserving codecs first,
    /// the `postcard` catch-all last.
    fn default() -> Self {
        Self::new(vec![
            Box::new(BoolSerialiser),
            Box::new(OrderedI32Serialiser),
            Box::new(OrderedI64Serialiser),
            Box::new(StringSerialiser),
            Box::new(BytesSerialiser),
            Box::new(PostcardSerialiser),
        ])
    }
}

// =============================================================================
// TESTS
// =============================================================================
