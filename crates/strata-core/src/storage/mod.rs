//! # Storage Substrate Boundary
//!
//! The engine reads and writes through the [`Substrate`] trait: an external
//! sorted key-value store that returns records in ascending key order within
//! one scan but may retain arbitrarily many duplicate-keyed records across
//! writes. The read path re-aggregates duplicates, so repeated physical
//! records are idempotent-safe and writers never need cross-writer locking.
//!
//! Two implementations ship with the crate:
//! - [`MemorySubstrate`]: `BTreeMap`-backed, volatile
//! - [`RedbSubstrate`]: redb-backed, disk-persistent and ACID

mod memory;
mod redb_store;

pub use memory::MemorySubstrate;
pub use redb_store::RedbSubstrate;

use crate::types::StoreError;

// =============================================================================
// RECORDS & RANGES
// =============================================================================

/// A half-open byte range `[start, end)` over the key space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteRange {
    /// Inclusive lower bound.
    pub start: Vec<u8>,
    /// Exclusive upper bound.
    pub end: Vec<u8>,
}

impl ByteRange {
    /// Whether this range can contain no keys at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Whether two ranges overlap or touch, i.e. scanning both could visit
    /// a key twice or they can be folded into one contiguous range.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// One physical record. `seq` is a substrate-assigned write sequence that
/// makes each physical record unique, so the merge path can tell a genuine
/// duplicate observation apart from the same record scanned twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    /// Encoded element identity.
    pub key: Vec<u8>,
    /// Monotonic write sequence, unique per record.
    pub seq: u64,
    /// Encoded aggregated-property bytes.
    pub value: Vec<u8>,
}

/// One sorted run of records, ascending by `(key, seq)`.
pub type ScanRun<'s> = Box<dyn Iterator<Item = Result<ScanRecord, StoreError>> + 's>;

// =============================================================================
// SUBSTRATE TRAIT
// =============================================================================

/// The sorted key-value substrate the engine persists into and scans from.
///
/// Contract: `scan` returns records in ascending `(key, seq)` order; `write`
/// appends a new physical record and never overwrites an existing one, even
/// for an identical key.
pub trait Substrate {
    /// Append one physical record.
    fn write(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Append a batch of physical records. Implementations may make the
    /// batch atomic; the default just loops.
    fn write_batch(&mut self, records: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError> {
        for (key, value) in records {
            self.write(key, value)?;
        }
        Ok(())
    }

    /// Scan all records whose key falls in the half-open range, in ascending
    /// `(key, seq)` order.
    fn scan<'s>(&'s self, range: &ByteRange) -> Result<ScanRun<'s>, StoreError>;
}

// =============================================================================
// TESTS
// =============================================================================
