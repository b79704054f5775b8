//! # In-Memory Substrate
//!
//! A volatile, `BTreeMap`-backed substrate. Keys are `(key bytes, seq)` so
//! repeated writes of one logical key are retained as distinct physical
//! records, mirroring how a log-structured store exposes duplicates until
//! compaction.

use super::{ByteRange, ScanRecord, ScanRun, Substrate};
use crate::types::StoreError;
use std::collections::BTreeMap;

/// A `BTreeMap`-backed substrate for tests and ephemeral stores.
#[derive(Debug, Default)]
pub struct MemorySubstrate {
    records: BTreeMap<(Vec<u8>, u64), Vec<u8>>,
    next_seq: u64,
}

impl MemorySubstrate {
    /// Create an empty substrate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of physical records, duplicates included.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

impl Substrate for MemorySubstrate {
    fn write(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.records.insert((key.to_vec(), seq), value.to_vec());
        Ok(())
    }

    fn scan<'s>(&'s self, range: &ByteRange) -> Result<ScanRun<'s>, StoreError> {
        if range.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }
        let start = (range.start.clone(), 0);
        let end = (range.end.clone(), 0);
        let run = self
            .records
            .range(start..end)
            .map(|((key, seq), value)| {
                Ok(ScanRecord {
                    key: key.clone(),
                    seq: *seq,
                    value: value.clone(),
                })
            });
        Ok(Box::new(run))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(substrate: &MemorySubstrate, range: &ByteRange) -> Vec<ScanRecord> {
        substrate
            .scan(range)
            .expect("scan")
            .collect::<Result<Vec<_>, _>>()
            .expect("records")
    }

    #[test]
    fn duplicate_keys_are_retained() {
        let mut substrate = MemorySubstrate::new();
        substrate.write(b"k", b"v1").expect("write");
        substrate.write(b"k", b"v2").expect("write");
        assert_eq!(substrate.record_count(), 2);

        let records = collect(
            &substrate,
            &ByteRange {
                start: b"k".to_vec(),
                end: b"l".to_vec(),
            },
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, b"v1");
        assert_eq!(records[1].value, b"v2");
        assert!(records[0].seq < records[1].seq);
    }

    #[test]
    fn scan_respects_half_open_bounds() {
        let mut substrate = MemorySubstrate::new();
        for key in [b"a", b"b", b"c"] {
            substrate.write(key, b"v").expect("write");
        }
        let records = collect(
            &substrate,
            &ByteRange {
                start: b"a".to_vec(),
                end: b"c".to_vec(),
            },
        );
        let keys: Vec<&[u8]> = records.iter().map(|r| r.key.as_slice()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b".as_slice()]);
    }

    #[test]
    fn scan_returns_ascending_key_order() {
        let mut substrate = MemorySubstrate::new();
        substrate.write(b"c", b"v").expect("write");
        substrate.write(b"a", b"v").expect("write");
        substrate.write(b"b", b"v").expect("write");
        let records = collect(
            &substrate,
            &ByteRange {
                start: Vec::new(),
                end: b"z".to_vec(),
            },
        );
        let keys: Vec<&[u8]> = records.iter().map(|r| r.key.as_slice()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
    }
}
