//! # strata-core
//!
//! Schema-driven property-graph aggregation and range-scan engine over a
//! sorted key-value substrate - THE ENGINE.
//!
//! Elements (vertex entities and directed or undirected edges) are encoded
//! into sortable key/value pairs. The schema decides which properties
//! participate in identity (the key) and which are merged (the value); when
//! physical records share a key, per-property associative functions combine
//! them into one logical element. Seeded range queries become byte-range
//! scans whose results are filtered by direction and merged on the fly.
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: no async, no network dependencies
//! - Deterministic: `BTreeMap` only, no `HashMap`, no floats, no randomness
//! - Schema and serialiser registry are immutable after construction and
//!   shared lock-free by concurrent readers
//! - Correctness is scan-order independent: the read path re-aggregates
//!   duplicated physical records, so writers never coordinate

// =============================================================================
// MODULES
// =============================================================================

pub mod aggregate;
pub mod codec;
pub mod query;
pub mod scan;
pub mod schema;
pub mod serialise;
pub mod storage;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Element, ElementId, PropertyKind, StoreError, TypedValue};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use aggregate::AggregateFn;
pub use codec::{decode_element, encode_rows};
pub use query::{DirectedFilter, InOutFilter, RangeQuery, RangeSeed, View, plan_ranges};
pub use scan::MergeScanIterator;
pub use schema::{GroupDef, GroupKind, PropertyDef, PropertyRole, Schema};
pub use serialise::{Serialiser, SerialiserRegistry};
pub use store::ElementStore;

// =============================================================================
// RE-EXPORTS: Storage substrate boundary
// =============================================================================

pub use storage::{ByteRange, MemorySubstrate, RedbSubstrate, ScanRecord, ScanRun, Substrate};
