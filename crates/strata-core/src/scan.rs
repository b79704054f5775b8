//! # Merge-Scan Iterator
//!
//! Lazily consumes one or more sorted runs (one per planned range), merges
//! records sharing an identical key via the aggregation engine, and yields
//! one aggregated element per distinct identity.
//!
//! - Runs are combined with a k-way merge ordered by `(key, seq, run)`;
//!   each run must be internally sorted, no ordering is assumed across runs
//! - Direction filters are applied to each raw record *before* it
//!   participates in merging, so excluded records never contribute to an
//!   aggregate
//! - Records identical in `(key, seq)` arriving from different runs are the
//!   same physical record scanned twice and are deduplicated
//! - `close()` is idempotent, runs on `Drop`, and halts consumption
//!   mid-stream; the iterator is single-owner and not restartable

use crate::aggregate;
use crate::codec;
use crate::query::{DirectedFilter, InOutFilter, record_passes};
use crate::schema::Schema;
use crate::serialise::SerialiserRegistry;
use crate::storage::ScanRun;
use crate::types::{Element, StoreError};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use tracing::trace;

// =============================================================================
// HEAP ENTRY
// =============================================================================

/// One buffered record per run, ordered by `(key, seq, run)`.
struct HeapEntry {
    key: Vec<u8>,
    seq: u64,
    run: usize,
    value: Vec<u8>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.key, self.seq, self.run).cmp(&(&other.key, other.seq, other.run))
    }
}

// =============================================================================
// MERGE-SCAN ITERATOR
// =============================================================================

/// A finite, non-restartable lazy sequence of aggregated elements.
///
/// Not safe for concurrent use by multiple callers; independent instances
/// may run concurrently, and the runs feeding one instance may be produced
/// by parallel partition scans as long as each run is internally sorted.
pub struct MergeScanIterator<'s> {
    schema: &'s Schema,
    registry: &'s SerialiserRegistry,
    directed: DirectedFilter,
    in_out: InOutFilter,
    runs: Vec<ScanRun<'s>>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    closed: bool,
}

impl<'s> MergeScanIterator<'s> {
    /// Build the iterator over already-sorted runs, applying the given
    /// per-record filters before any merging.
    pub fn new(
        runs: Vec<ScanRun<'s>>,
        schema: &'s Schema,
        registry: &'s SerialiserRegistry,
        directed: DirectedFilter,
        in_out: InOutFilter,
    ) -> Result<Self, StoreError> {
        let mut iter = Self {
            schema,
            registry,
            directed,
            in_out,
            runs,
            heap: BinaryHeap::new(),
            closed: false,
        };
        for run in 0..iter.runs.len() {
            iter.buffer_from(run)?;
        }
        Ok(iter)
    }

    /// Release all underlying scan resources. Idempotent; safe to call
    /// mid-stream. Further `next()` calls yield nothing.
    pub fn close(&mut self) {
        if !self.closed {
            trace!(runs = self.runs.len(), "closing merge-scan iterator");
            self.runs.clear();
            self.heap.clear();
            self.closed = true;
        }
    }

    /// Pull from one run until a record passes the filters, then buffer it.
    ///
    /// Filtering here, before the record ever reaches the heap, guarantees
    /// excluded records cannot contribute to an aggregate.
    fn buffer_from(&mut self, run: usize) -> Result<(), StoreError> {
        while let Some(result) = self.runs[run].next() {
            let record = result?;
            let flag = codec::key_flag(&record.key)?;
            if record_passes(flag, self.directed, self.in_out) {
                self.heap.push(Reverse(HeapEntry {
                    key: record.key,
                    seq: record.seq,
                    run,
                    value: record.value,
                }));
                break;
            }
        }
        Ok(())
    }

    /// Consume the maximal contiguous same-key record group and merge it.
    fn next_element(&mut self) -> Result<Option<Element>, StoreError> {
        let Some(Reverse(head)) = self.heap.pop() else {
            return Ok(None);
        };
        self.buffer_from(head.run)?;

        let key = head.key;
        let mut seen_seqs = BTreeSet::from([head.seq]);
        let mut values = vec![head.value];

        loop {
            let same_key = match self.heap.peek() {
                Some(Reverse(entry)) => entry.key == key,
                None => false,
            };
            if !same_key {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            self.buffer_from(entry.run)?;
            // Same (key, seq) from another run is the same physical record
            // scanned twice, not a new observation.
            if seen_seqs.insert(entry.seq) {
                values.push(entry.value);
            }
        }

        let group_name = codec::parse_key(&key)?.group;
        let group = self.schema.group(&group_name)?;
        let merged = aggregate::merge_values(group, self.registry, &values)?;
        let element = codec::decode_element(&key, &merged, self.schema, self.registry)?;
        Ok(Some(element))
    }
}

impl Iterator for MergeScanIterator<'_> {
    type Item = Result<Element, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        match self.next_element() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => {
                // Exhausted: release resources eagerly.
                self.close();
                None
            }
            Err(e) => {
                // A failed scan aborts; elements already yielded stay valid.
                self.close();
                Some(Err(e))
            }
        }
    }
}

impl Drop for MergeScanIterator<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateFn;
    use crate::schema::{GroupDef, PropertyDef};
    use crate::storage::{ByteRange, MemorySubstrate, Substrate};
    use crate::types::{PropertyKind, TypedValue};
    use std::collections::BTreeMap;

    fn fixtures() -> (Schema, SerialiserRegistry) {
        let registry = SerialiserRegistry::default();
        let schema = Schema::new(
            vec![GroupDef::edge(
                "knows",
                PropertyKind::Str,
                vec![PropertyDef::aggregated("count", PropertyKind::I64, AggregateFn::Sum)],
            )],
            &registry,
        )
        .expect("schema");
        (schema, registry)
    }

    fn edge(source: &str, dest: &str, count: i64) -> Element {
        let mut props = BTreeMap::new();
        props.insert("count".to_string(), TypedValue::I64(count));
        Element::edge(
            "knows",
            TypedValue::str(source),
            TypedValue::str(dest),
            true,
            props,
        )
    }

    fn populated_substrate(schema: &Schema, registry: &SerialiserRegistry) -> MemorySubstrate {
        let mut substrate = MemorySubstrate::new();
        for count in [1, 2, 10] {
            for (key, value) in
                codec::encode_rows(&edge("1", "2", count), schema, registry).expect("encode")
            {
                substrate.write(&key, &value).expect("write");
            }
        }
        substrate
    }

    fn everything() -> ByteRange {
        ByteRange {
            start: Vec::new(),
            end: vec![0xFF; 8],
        }
    }

    #[test]
    fn merges_duplicate_keys_into_one_element() {
        let (schema, registry) = fixtures();
        let substrate = populated_substrate(&schema, &registry);

        // outgoing-only so just the source-first rows participate
        let runs = vec![substrate.scan(&everything()).expect("scan")];
        let iter = MergeScanIterator::new(
            runs,
            &schema,
            &registry,
            DirectedFilter::Either,
            InOutFilter::Outgoing,
        )
        .expect("iter");

        let elements: Vec<Element> = iter.collect::<Result<_, _>>().expect("elements");
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].property("count"), Some(&TypedValue::I64(13)));
    }

    #[test]
    fn overscanned_records_are_deduplicated_not_double_counted() {
        let (schema, registry) = fixtures();
        let substrate = populated_substrate(&schema, &registry);

        // two runs over the same range: every physical record arrives twice
        let runs = vec![
            substrate.scan(&everything()).expect("scan"),
            substrate.scan(&everything()).expect("scan"),
        ];
        let iter = MergeScanIterator::new(
            runs,
            &schema,
            &registry,
            DirectedFilter::Either,
            InOutFilter::Outgoing,
        )
        .expect("iter");

        let elements: Vec<Element> = iter.collect::<Result<_, _>>().expect("elements");
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].property("count"), Some(&TypedValue::I64(13)));
    }

    #[test]
    fn filters_apply_before_merging() {
        let (schema, registry) = fixtures();
        let substrate = populated_substrate(&schema, &registry);

        // both orientations in range; without the pre-merge filter the
        // dest-first rows would inflate the aggregate
        let runs = vec![substrate.scan(&everything()).expect("scan")];
        let iter = MergeScanIterator::new(
            runs,
            &schema,
            &registry,
            DirectedFilter::Either,
            InOutFilter::Incoming,
        )
        .expect("iter");

        let elements: Vec<Element> = iter.collect::<Result<_, _>>().expect("elements");
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].property("count"), Some(&TypedValue::I64(13)));
    }

    #[test]
    fn close_is_idempotent_and_halts_iteration() {
        let (schema, registry) = fixtures();
        let substrate = populated_substrate(&schema, &registry);

        let runs = vec![substrate.scan(&everything()).expect("scan")];
        let mut iter = MergeScanIterator::new(
            runs,
            &schema,
            &registry,
            DirectedFilter::Either,
            InOutFilter::Both,
        )
        .expect("iter");

        iter.close();
        iter.close();
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn exhausted_iterator_stays_exhausted() {
        let (schema, registry) = fixtures();
        let substrate = populated_substrate(&schema, &registry);

        let runs = vec![substrate.scan(&everything()).expect("scan")];
        let mut iter = MergeScanIterator::new(
            runs,
            &schema,
            &registry,
            DirectedFilter::Either,
            InOutFilter::Outgoing,
        )
        .expect("iter");

        assert!(iter.next().is_some());
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn malformed_record_fails_loudly() {
        let (schema, registry) = fixtures();
        let mut substrate = MemorySubstrate::new();
        // a syntactically valid key with garbage value bytes
        let rows = codec::encode_rows(&edge("1", "2", 1), &schema, &registry).expect("encode");
        substrate.write(&rows[0].0, &[0xFF, 0xFF, 0xFF]).expect("write");
        substrate.write(&rows[0].0, &rows[0].1).expect("write");

        let runs = vec![substrate.scan(&everything()).expect("scan")];
        let mut iter = MergeScanIterator::new(
            runs,
            &schema,
            &registry,
            DirectedFilter::Either,
            InOutFilter::Outgoing,
        )
        .expect("iter");

        assert!(matches!(iter.next(), Some(Err(_))));
        // the failed scan is aborted
        assert!(iter.next().is_none());
    }
}
