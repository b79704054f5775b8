//! # Element Store
//!
//! The facade tying the engine together: schema + serialiser registry +
//! substrate instance, all supplied explicitly at construction.
//!
//! Write path: schema → key/value codec → (optional local pre-aggregation)
//! → substrate. Read path: range planner → substrate scans → merge-scan
//! iterator → caller.
//!
//! Final consistency comes from the read path always re-aggregating
//! duplicates, so concurrent writers of the same logical identity need no
//! locking from this layer.

use crate::aggregate;
use crate::codec;
use crate::query::{RangeQuery, plan_ranges};
use crate::scan::MergeScanIterator;
use crate::schema::Schema;
use crate::serialise::SerialiserRegistry;
use crate::storage::Substrate;
use crate::types::{Element, StoreError};
use std::collections::BTreeMap;
use tracing::debug;

/// A property-graph store over a sorted key-value substrate.
#[derive(Debug)]
pub struct ElementStore<S: Substrate> {
    schema: Schema,
    registry: SerialiserRegistry,
    substrate: S,
}

impl<S: Substrate> ElementStore<S> {
    /// Assemble a store from an already-validated schema, a serialiser
    /// registry, and a substrate instance.
    #[must_use]
    pub fn new(schema: Schema, registry: SerialiserRegistry, substrate: S) -> Self {
        Self {
            schema,
            registry,
            substrate,
        }
    }

    /// The store's schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Write one element.
    pub fn add_element(&mut self, element: &Element) -> Result<(), StoreError> {
        let rows = codec::encode_rows(element, &self.schema, &self.registry)?;
        self.substrate.write_batch(&rows)
    }

    /// Write a batch of elements.
    ///
    /// Every element is encoded before anything is written, so a malformed
    /// element rejects the whole batch without partial effect. Callers who
    /// want per-element isolation call [`Self::add_element`] per element.
    pub fn add_elements(&mut self, elements: &[Element]) -> Result<(), StoreError> {
        let rows = self.encode_all(elements)?;
        debug!(elements = elements.len(), rows = rows.len(), "writing element batch");
        self.substrate.write_batch(&rows)
    }

    /// Write a batch with local pre-aggregation: rows sharing one key are
    /// merged before persisting, so the substrate receives one physical
    /// record per identity in the batch.
    ///
    /// Purely an optimization: the read path re-aggregates duplicates
    /// regardless, so this changes record counts, never query results.
    pub fn add_elements_aggregated(&mut self, elements: &[Element]) -> Result<(), StoreError> {
        let rows = self.encode_all(elements)?;
        let mut grouped: BTreeMap<Vec<u8>, Vec<Vec<u8>>> = BTreeMap::new();
        for (key, value) in rows {
            grouped.entry(key).or_default().push(value);
        }

        let mut merged_rows = Vec::with_capacity(grouped.len());
        for (key, values) in grouped {
            let group_name = codec::parse_key(&key)?.group;
            let group = self.schema.group(&group_name)?;
            let merged = aggregate::merge_values(group, &self.registry, &values)?;
            merged_rows.push((key, merged));
        }
        debug!(
            elements = elements.len(),
            rows = merged_rows.len(),
            "writing pre-aggregated element batch"
        );
        self.substrate.write_batch(&merged_rows)
    }

    /// Answer a seeded range query: plan byte ranges, scan each, and merge
    /// the sorted runs into one aggregated element per distinct identity.
    ///
    /// The returned iterator owns the underlying scans; callers must drop it
    /// (or call `close()`) when finished, including on early termination.
    pub fn elements_in_ranges(
        &self,
        query: &RangeQuery,
    ) -> Result<MergeScanIterator<'_>, StoreError> {
        let ranges = plan_ranges(query, &self.schema, &self.registry)?;
        let mut runs = Vec::with_capacity(ranges.len());
        for range in &ranges {
            runs.push(self.substrate.scan(range)?);
        }
        MergeScanIterator::new(runs, &self.schema, &self.registry, query.directed, query.in_out)
    }

    fn encode_all(&self, elements: &[Element]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut rows = Vec::with_capacity(elements.len());
        for element in elements {
            rows.extend(codec::encode_rows(element, &self.schema, &self.registry)?);
        }
        Ok(rows)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateFn;
    use crate::query::{RangeSeed, View};
    use crate::schema::{GroupDef, PropertyDef};
    use crate::storage::MemorySubstrate;
    use crate::types::{PropertyKind, TypedValue};

    fn store() -> ElementStore<MemorySubstrate> {
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
        ElementStore::new(schema, registry, MemorySubstrate::new())
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

    fn query(start: &str, end: &str) -> RangeQuery {
        RangeQuery::new(
            vec![RangeSeed::new(TypedValue::str(start), TypedValue::str(end))],
            View::of(["knows"]),
        )
    }

    #[test]
    fn malformed_element_rejects_whole_batch() {
        let mut store = store();
        let bad = Element::edge(
            "knows",
            TypedValue::str("a"),
            TypedValue::str("b"),
            true,
            BTreeMap::new(), // missing "count"
        );
        let err = store
            .add_elements(&[edge("a", "b", 1), bad])
            .expect_err("bad batch");
        assert!(matches!(err, StoreError::Encoding(_)));

        // nothing was written
        let results: Vec<Element> = store
            .elements_in_ranges(&query("a", "z"))
            .expect("query")
            .collect::<Result<_, _>>()
            .expect("elements");
        assert!(results.is_empty());
    }

    #[test]
    fn pre_aggregated_writes_collapse_rows_but_not_results() {
        let mut plain = store();
        let mut compacted = store();
        let batch = vec![edge("a", "b", 1), edge("a", "b", 2), edge("a", "b", 10)];

        plain.add_elements(&batch).expect("write");
        compacted.add_elements_aggregated(&batch).expect("write");

        // 3 edges × 2 orientation rows vs 2 merged rows
        assert_eq!(plain.substrate.record_count(), 6);
        assert_eq!(compacted.substrate.record_count(), 2);

        for s in [&plain, &compacted] {
            let results: Vec<Element> = s
                .elements_in_ranges(&query("a", "b"))
                .expect("query")
                .collect::<Result<_, _>>()
                .expect("elements");
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].property("count"), Some(&TypedValue::I64(13)));
        }
    }

    #[test]
    fn query_after_single_element_writes() {
        let mut store = store();
        store.add_element(&edge("a", "b", 5)).expect("write");
        store.add_element(&edge("a", "b", 7)).expect("write");

        let results: Vec<Element> = store
            .elements_in_ranges(&query("a", "b"))
            .expect("query")
            .collect::<Result<_, _>>()
            .expect("elements");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].property("count"), Some(&TypedValue::I64(12)));
    }
}
