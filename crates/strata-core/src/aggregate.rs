//! # Aggregation Engine
//!
//! Combines physical records that share one encoded key into a single
//! logical record, using the per-property aggregate function declared in
//! the schema.
//!
//! Every aggregate function must be associative and commutative over the
//! kinds it is applied to. The engine does not verify this at runtime; it is
//! a correctness requirement on schema authors, and it is what makes the
//! merged result independent of scan order and of how duplicated records are
//! partitioned across ranges.

use crate::codec;
use crate::schema::GroupDef;
use crate::serialise::SerialiserRegistry;
use crate::types::{PropertyKind, StoreError, TypedValue};

// =============================================================================
// AGGREGATE FUNCTIONS
// =============================================================================

/// An associative, commutative combining function for one property.
///
/// `Sum` uses saturating integer arithmetic (boolean sum is logical OR).
/// `Min`/`Max` apply the value kind's natural order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AggregateFn {
    /// Saturating sum (logical OR for booleans).
    Sum,
    /// Minimum under the kind's natural order.
    Min,
    /// Maximum under the kind's natural order.
    Max,
}

impl AggregateFn {
    /// Whether this function is defined for values of the given kind.
    ///
    /// Checked once at schema load; `Sum` has no meaning for strings or raw
    /// bytes.
    #[must_use]
    pub const fn applicable_to(self, kind: PropertyKind) -> bool {
        match self {
            Self::Sum => matches!(kind, PropertyKind::Bool | PropertyKind::I32 | PropertyKind::I64),
            Self::Min | Self::Max => true,
        }
    }

    /// The identity element, where the kind has one.
    ///
    /// `Min` over strings/bytes has no greatest element, so folding starts
    /// from the first input instead.
    #[must_use]
    pub fn identity(self, kind: PropertyKind) -> Option<TypedValue> {
        match (self, kind) {
            (Self::Sum, PropertyKind::Bool) => Some(TypedValue::Bool(false)),
            (Self::Sum, PropertyKind::I32) => Some(TypedValue::I32(0)),
            (Self::Sum, PropertyKind::I64) => Some(TypedValue::I64(0)),
            (Self::Min, PropertyKind::Bool) => Some(TypedValue::Bool(true)),
            (Self::Min, PropertyKind::I32) => Some(TypedValue::I32(i32::MAX)),
            (Self::Min, PropertyKind::I64) => Some(TypedValue::I64(i64::MAX)),
            (Self::Max, PropertyKind::Bool) => Some(TypedValue::Bool(false)),
            (Self::Max, PropertyKind::I32) => Some(TypedValue::I32(i32::MIN)),
            (Self::Max, PropertyKind::I64) => Some(TypedValue::I64(i64::MIN)),
            (Self::Max, PropertyKind::Str) => Some(TypedValue::Str(String::new())),
            (Self::Max, PropertyKind::Bytes) => Some(TypedValue::Bytes(Vec::new())),
            (Self::Sum | Self::Min, PropertyKind::Str | PropertyKind::Bytes) => None,
        }
    }

    /// Combine two values of the same kind.
    pub fn apply(self, a: TypedValue, b: TypedValue) -> Result<TypedValue, StoreError> {
        if a.kind() != b.kind() {
            return Err(StoreError::Encoding(format!(
                "cannot aggregate a {:?} value with a {:?} value",
                a.kind(),
                b.kind()
            )));
        }
        match self {
            Self::Sum => match (a, b) {
                (TypedValue::Bool(x), TypedValue::Bool(y)) => Ok(TypedValue::Bool(x || y)),
                (TypedValue::I32(x), TypedValue::I32(y)) => Ok(TypedValue::I32(x.saturating_add(y))),
                (TypedValue::I64(x), TypedValue::I64(y)) => Ok(TypedValue::I64(x.saturating_add(y))),
                (a, _) => Err(StoreError::Encoding(format!(
                    "Sum is not defined for {:?} values",
                    a.kind()
                ))),
            },
            Self::Min => Ok(std::cmp::min(a, b)),
            Self::Max => Ok(std::cmp::max(a, b)),
        }
    }

    /// Fold a non-empty sequence of same-kind values, starting from the
    /// identity element where one exists.
    pub fn fold(
        self,
        kind: PropertyKind,
        values: impl IntoIterator<Item = TypedValue>,
    ) -> Result<TypedValue, StoreError> {
        let mut iter = values.into_iter();
        let mut acc = iter.next().ok_or_else(|| {
            StoreError::InvalidArgument("cannot fold an empty value sequence".to_string())
        })?;
        if let Some(identity) = self.identity(kind) {
            acc = self.apply(identity, acc)?;
        }
        for value in iter {
            acc = self.apply(acc, value)?;
        }
        Ok(acc)
    }
}

// =============================================================================
// MERGE ENGINE
// =============================================================================

/// Merge the encoded values of N physical records sharing one key into a
/// single encoded value.
///
/// For each aggregated property position, all inputs are decoded and folded
/// with the property's aggregate function, then the fold result is
/// re-encoded. Group-by properties never appear in encoded values, so they
/// are untouched by construction.
///
/// An empty input list is a contract violation; a single input is returned
/// unchanged. Malformed value bytes fail loudly rather than being skipped.
pub fn merge_values(
    group: &GroupDef,
    registry: &SerialiserRegistry,
    encoded: &[Vec<u8>],
) -> Result<Vec<u8>, StoreError> {
    match encoded {
        [] => Err(StoreError::InvalidArgument(
            "merge requires at least one encoded value".to_string(),
        )),
        [single] => Ok(single.clone()),
        many => {
            let aggregated = group.aggregated_properties();
            let mut columns: Vec<Vec<TypedValue>> = vec![Vec::with_capacity(many.len()); aggregated.len()];
            for value_bytes in many {
                let fields = codec::decode_value_fields(value_bytes)?;
                if fields.len() != aggregated.len() {
                    return Err(StoreError::Decoding(format!(
                        "group '{}' expects {} aggregated fields, record has {}",
                        group.name,
                        aggregated.len(),
                        fields.len()
                    )));
                }
                for (column, (field, prop)) in
                    columns.iter_mut().zip(fields.iter().zip(aggregated.iter()))
                {
                    column.push(registry.decode(prop.kind, field)?);
                }
            }

            let mut merged_fields = Vec::with_capacity(aggregated.len());
            for (column, prop) in columns.into_iter().zip(aggregated.iter()) {
                let (func, kind) = (prop.aggregate_fn()?, prop.kind);
                let folded = func.fold(kind, column)?;
                merged_fields.push(registry.encode(&folded)?);
            }
            codec::encode_value_fields(&merged_fields)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
