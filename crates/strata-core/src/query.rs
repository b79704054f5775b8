//! # Range Query Planner
//!
//! Translates seed identifier pairs plus direction constraints into byte
//! ranges over the key space, and decides per-record inclusion for the
//! predicates a key range cannot express.
//!
//! Because identifier serialisers are order-preserving, the half-open byte
//! range `[encode(start), encode(end))` contains exactly the keys whose
//! identifier falls in `[start, end)` under the identifier's natural order.
//! Edges have two sort positions (by source and by destination); the planner
//! deliberately overscans both orientations and leaves collapsing to the
//! merge path rather than attempting a single-range optimization.

use crate::codec;
use crate::schema::Schema;
use crate::serialise::SerialiserRegistry;
use crate::storage::ByteRange;
use crate::types::{StoreError, TypedValue};
use std::collections::BTreeSet;
use tracing::debug;

// =============================================================================
// QUERY SPECIFICATION
// =============================================================================

/// A seed pair: query every identifier in `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSeed {
    /// Inclusive lower identifier.
    pub start: TypedValue,
    /// Exclusive upper identifier.
    pub end: TypedValue,
}

impl RangeSeed {
    /// Create a seed pair.
    #[must_use]
    pub fn new(start: TypedValue, end: TypedValue) -> Self {
        Self { start, end }
    }
}

/// Directed-type filter over edges. Entities always pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectedFilter {
    /// Directed edges only.
    Directed,
    /// Undirected edges only.
    Undirected,
    /// Both.
    #[default]
    Either,
}

/// Incoming/outgoing filter relative to the seeded identifier. Undirected
/// edges count as both incoming and outgoing. Entities always pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InOutFilter {
    /// Edges leaving a seeded vertex.
    Outgoing,
    /// Edges arriving at a seeded vertex.
    Incoming,
    /// Both.
    #[default]
    Both,
}

/// The set of schema groups eligible for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    groups: BTreeSet<String>,
}

impl View {
    /// A view over the named groups.
    #[must_use]
    pub fn of(groups: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    /// A view over every group in the schema.
    #[must_use]
    pub fn all(schema: &Schema) -> Self {
        Self::of(schema.group_names())
    }

    /// The eligible group names in deterministic order.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(String::as_str)
    }
}

/// A complete seeded range query.
#[derive(Debug, Clone)]
pub struct RangeQuery {
    /// Seed identifier pairs.
    pub seeds: Vec<RangeSeed>,
    /// Eligible groups.
    pub view: View,
    /// Directed-type filter.
    pub directed: DirectedFilter,
    /// Incoming/outgoing filter.
    pub in_out: InOutFilter,
}

impl RangeQuery {
    /// A query over the given seeds and view with no edge filtering.
    #[must_use]
    pub fn new(seeds: Vec<RangeSeed>, view: View) -> Self {
        Self {
            seeds,
            view,
            directed: DirectedFilter::default(),
            in_out: InOutFilter::default(),
        }
    }

    /// Restrict to a directed type.
    #[must_use]
    pub fn with_directed(mut self, directed: DirectedFilter) -> Self {
        self.directed = directed;
        self
    }

    /// Restrict to incoming or outgoing matches.
    #[must_use]
    pub fn with_in_out(mut self, in_out: InOutFilter) -> Self {
        self.in_out = in_out;
        self
    }
}

// =============================================================================
// PLANNING
// =============================================================================

/// Plan the byte ranges to scan for a query.
///
/// One range per (eligible group × seed pair), with empty ranges dropped
/// and overlapping ranges coalesced so no physical record is visited by two
/// runs. Both edge orientations fall inside the same seeded range (keys are
/// sorted by whichever endpoint comes first), so incoming versus outgoing is
/// decided per record by [`record_passes`], not by separate ranges.
pub fn plan_ranges(
    query: &RangeQuery,
    schema: &Schema,
    registry: &SerialiserRegistry,
) -> Result<Vec<ByteRange>, StoreError> {
    if query.seeds.is_empty() {
        return Err(StoreError::InvalidArgument(
            "a range query requires at least one seed pair".to_string(),
        ));
    }
    if query.view.groups().next().is_none() {
        return Err(StoreError::InvalidArgument(
            "a range query requires a view with at least one group".to_string(),
        ));
    }

    let mut ranges = Vec::new();
    for group_name in query.view.groups() {
        let group = schema.group(group_name)?;
        let serialiser = registry.serialiser_for(group.vertex_kind)?;
        let prefix = codec::group_prefix(group_name);

        for seed in &query.seeds {
            if seed.start.kind() != group.vertex_kind || seed.end.kind() != group.vertex_kind {
                return Err(StoreError::InvalidArgument(format!(
                    "seed identifiers must have kind {:?} for group '{group_name}'",
                    group.vertex_kind
                )));
            }
            let mut start = prefix.clone();
            start.extend_from_slice(&codec::escape(&serialiser.encode(&seed.start)?));
            let mut end = prefix.clone();
            end.extend_from_slice(&codec::escape(&serialiser.encode(&seed.end)?));

            let range = ByteRange { start, end };
            if range.is_empty() {
                debug!(group = group_name, "dropping empty seed range");
                continue;
            }
            ranges.push(range);
        }
    }

    let coalesced = coalesce(ranges);
    debug!(
        seeds = query.seeds.len(),
        groups = query.view.groups().count(),
        ranges = coalesced.len(),
        "planned range scan"
    );
    Ok(coalesced)
}

/// Merge overlapping or touching ranges so the same physical record is never
/// scanned by two runs. Ranges from different groups never overlap because
/// every key begins with its group prefix.
fn coalesce(mut ranges: Vec<ByteRange>) -> Vec<ByteRange> {
    ranges.sort();
    let mut out: Vec<ByteRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match out.last_mut() {
            Some(last) if last.overlaps(&range) => {
                if range.end > last.end {
                    last.end = range.end;
                }
            }
            _ => out.push(range),
        }
    }
    out
}

// =============================================================================
// PER-RECORD FILTERING
// =============================================================================

/// Decide inclusion for one physical record from its row flag.
///
/// This covers the predicates a key range cannot express: the edge directed
/// flag, and whether the seeded vertex is the record's source or its
/// destination (source-first rows are outgoing matches, dest-first rows are
/// incoming matches).
#[must_use]
pub fn record_passes(flag: u8, directed: DirectedFilter, in_out: InOutFilter) -> bool {
    if flag == codec::FLAG_ENTITY {
        return true;
    }
    let directed_ok = match directed {
        DirectedFilter::Directed => {
            flag == codec::FLAG_DIRECTED_SOURCE || flag == codec::FLAG_DIRECTED_DEST
        }
        DirectedFilter::Undirected => flag == codec::FLAG_UNDIRECTED,
        DirectedFilter::Either => true,
    };
    let in_out_ok = match in_out {
        InOutFilter::Outgoing => {
            flag == codec::FLAG_DIRECTED_SOURCE || flag == codec::FLAG_UNDIRECTED
        }
        InOutFilter::Incoming => {
            flag == codec::FLAG_DIRECTED_DEST || flag == codec::FLAG_UNDIRECTED
        }
        InOutFilter::Both => true,
    };
    directed_ok && in_out_ok
}

// =============================================================================
// TESTS
// =============================================================================
