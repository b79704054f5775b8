//! # Key/Value Codec
//!
//! Converts an element plus schema into a sortable byte key (identity) and a
//! byte value (aggregated properties), and back.
//!
//! ## Key layout
//!
//! Segments are separated by a 0x00 delimiter. Segment payloads are escaped
//! (0x00 → 0x01 0x02, 0x01 → 0x01 0x03) so the delimiter never appears
//! inside a segment; the escaping preserves unsigned lexicographic order.
//!
//! ```text
//! entity: esc(group) 00 esc(vertex) 00 flag                 [00 esc(prop)]*
//! edge:   esc(group) 00 esc(first)  00 flag 00 esc(second)  [00 esc(prop)]*
//! ```
//!
//! Edges are written under both endpoints (source-first and dest-first
//! rows), so outgoing and incoming lookups are both plain range scans.
//!
//! ## Value layout
//!
//! The encoded bytes of every aggregated property, in declared order, framed
//! with `postcard` so each field is independently decodable.
//!
//! Encode-time and decode-time schemas must match; this is a documented
//! caller invariant and is not checked here.

use crate::schema::{GroupDef, GroupKind, Schema};
use crate::serialise::SerialiserRegistry;
use crate::types::{Element, ElementId, PropertyKind, StoreError, TypedValue};
use std::collections::BTreeMap;

// =============================================================================
// LAYOUT CONSTANTS
// =============================================================================

/// Segment delimiter. Never appears inside an escaped segment.
pub(crate) const DELIM: u8 = 0x00;
/// Escape lead byte.
const ESC: u8 = 0x01;
/// `ESC` followed by this encodes a literal 0x00.
const ESC_DELIM: u8 = 0x02;
/// `ESC` followed by this encodes a literal 0x01.
const ESC_ESC: u8 = 0x03;

/// Row flags. All non-zero so a flag byte is never mistaken for a delimiter.
pub(crate) const FLAG_ENTITY: u8 = 1;
pub(crate) const FLAG_UNDIRECTED: u8 = 2;
pub(crate) const FLAG_DIRECTED_SOURCE: u8 = 3;
pub(crate) const FLAG_DIRECTED_DEST: u8 = 4;

// =============================================================================
// ESCAPING
// =============================================================================

/// Escape a segment payload. Order-preserving: for any `a < b`,
/// `escape(a) < escape(b)` under unsigned lexicographic comparison.
pub(crate) fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        match b {
            DELIM => out.extend_from_slice(&[ESC, ESC_DELIM]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            other => out.push(other),
        }
    }
    out
}

/// Invert [`escape`].
pub(crate) fn unescape(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter();
    while let Some(&b) = iter.next() {
        if b == ESC {
            match iter.next() {
                Some(&ESC_DELIM) => out.push(DELIM),
                Some(&ESC_ESC) => out.push(ESC),
                Some(&other) => {
                    return Err(StoreError::Decoding(format!(
                        "invalid escape sequence 0x01 0x{other:02x} in key segment"
                    )));
                }
                None => {
                    return Err(StoreError::Decoding(
                        "truncated escape sequence at end of key segment".to_string(),
                    ));
                }
            }
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

// =============================================================================
// KEY CONSTRUCTION & PARSING
// =============================================================================

/// The byte prefix shared by every key in a group: `esc(group) 00`.
pub(crate) fn group_prefix(group_name: &str) -> Vec<u8> {
    let mut out = escape(group_name.as_bytes());
    out.push(DELIM);
    out
}

fn build_key(
    group_name: &str,
    first: &[u8],
    flag: u8,
    second: Option<&[u8]>,
    group_by: &[Vec<u8>],
) -> Vec<u8> {
    let mut key = group_prefix(group_name);
    key.extend_from_slice(&escape(first));
    key.push(DELIM);
    key.push(flag);
    if let Some(second) = second {
        key.push(DELIM);
        key.extend_from_slice(&escape(second));
    }
    for prop in group_by {
        key.push(DELIM);
        key.extend_from_slice(&escape(prop));
    }
    key
}

/// A fully parsed key: group name, row flag, identifier segment(s) and
/// group-by segments, all unescaped but not yet value-decoded.
pub(crate) struct ParsedKey {
    pub group: String,
    pub flag: u8,
    pub first: Vec<u8>,
    pub second: Option<Vec<u8>>,
    pub group_by: Vec<Vec<u8>>,
}

/// Extract just the row flag, without allocating. Used by the per-record
/// filter in the merge-scan path.
pub(crate) fn key_flag(key: &[u8]) -> Result<u8, StoreError> {
    let mut segments = key.split(|b| *b == DELIM);
    let _group = segments.next();
    let _first = segments.next();
    match segments.next() {
        Some([flag]) => Ok(*flag),
        _ => Err(StoreError::Decoding(
            "key has no single-byte flag segment".to_string(),
        )),
    }
}

/// Parse a key into its segments.
pub(crate) fn parse_key(key: &[u8]) -> Result<ParsedKey, StoreError> {
    let mut segments = key.split(|b| *b == DELIM);
    let group_bytes = segments
        .next()
        .ok_or_else(|| StoreError::Decoding("empty key".to_string()))?;
    let group = String::from_utf8(unescape(group_bytes)?)
        .map_err(|e| StoreError::Decoding(format!("group name is not UTF-8: {e}")))?;
    let first = unescape(
        segments
            .next()
            .ok_or_else(|| StoreError::Decoding("key is missing its identifier segment".to_string()))?,
    )?;
    let flag = match segments.next() {
        Some([flag]) => *flag,
        _ => {
            return Err(StoreError::Decoding(
                "key has no single-byte flag segment".to_string(),
            ));
        }
    };
    let second = match flag {
        FLAG_ENTITY => None,
        FLAG_UNDIRECTED | FLAG_DIRECTED_SOURCE | FLAG_DIRECTED_DEST => Some(unescape(
            segments.next().ok_or_else(|| {
                StoreError::Decoding("edge key is missing its second endpoint".to_string())
            })?,
        )?),
        other => {
            return Err(StoreError::Decoding(format!(
                "unknown row flag 0x{other:02x}"
            )));
        }
    };
    let group_by = segments
        .map(unescape)
        .collect::<Result<Vec<_>, StoreError>>()?;
    Ok(ParsedKey {
        group,
        flag,
        first,
        second,
        group_by,
    })
}

// =============================================================================
// VALUE FRAMING
// =============================================================================

/// Frame the encoded bytes of each aggregated property so fields remain
/// independently decodable.
pub(crate) fn encode_value_fields(fields: &[Vec<u8>]) -> Result<Vec<u8>, StoreError> {
    postcard::to_allocvec(fields).map_err(|e| StoreError::Encoding(e.to_string()))
}

/// Invert [`encode_value_fields`].
pub(crate) fn decode_value_fields(bytes: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
    postcard::from_bytes(bytes).map_err(|e| StoreError::Decoding(e.to_string()))
}

// =============================================================================
// ELEMENT ENCODING
// =============================================================================

fn encode_identifier(
    group: &GroupDef,
    registry: &SerialiserRegistry,
    value: &TypedValue,
    what: &str,
) -> Result<Vec<u8>, StoreError> {
    if value.kind() != group.vertex_kind {
        return Err(StoreError::Encoding(format!(
            "group '{}': {what} has kind {:?}, schema declares {:?}",
            group.name,
            value.kind(),
            group.vertex_kind
        )));
    }
    registry.serialiser_for(group.vertex_kind)?.encode(value)
}

fn encode_property(
    group: &GroupDef,
    registry: &SerialiserRegistry,
    element: &Element,
    name: &str,
    kind: PropertyKind,
) -> Result<Vec<u8>, StoreError> {
    let value = element.property(name).ok_or_else(|| {
        StoreError::Encoding(format!(
            "group '{}': element is missing required property '{name}'",
            group.name
        ))
    })?;
    if value.kind() != kind {
        return Err(StoreError::Encoding(format!(
            "group '{}': property '{name}' has kind {:?}, schema declares {kind:?}",
            group.name,
            value.kind()
        )));
    }
    registry.serialiser_for(kind)?.encode(value)
}

/// Encode an element into its physical rows.
///
/// Entities produce one row. Edges produce two rows, one keyed by each
/// endpoint (a single row for self-loops), so that both endpoints can find
/// the edge with a range scan. All rows of one element share the same value
/// bytes.
pub fn encode_rows(
    element: &Element,
    schema: &Schema,
    registry: &SerialiserRegistry,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
    let group = schema.group(&element.group)?;

    let mut group_by = Vec::new();
    for prop in group.group_by_properties() {
        group_by.push(encode_property(group, registry, element, &prop.name, prop.kind)?);
    }
    let mut aggregated = Vec::new();
    for prop in group.aggregated_properties() {
        aggregated.push(encode_property(group, registry, element, &prop.name, prop.kind)?);
    }
    let value = encode_value_fields(&aggregated)?;

    match (&element.id, group.kind) {
        (ElementId::Entity { vertex }, GroupKind::Entity) => {
            let vertex = encode_identifier(group, registry, vertex, "vertex")?;
            Ok(vec![(
                build_key(&group.name, &vertex, FLAG_ENTITY, None, &group_by),
                value,
            )])
        }
        (
            ElementId::Edge {
                source,
                destination,
                directed,
            },
            GroupKind::Edge,
        ) => {
            let src = encode_identifier(group, registry, source, "source")?;
            let dst = encode_identifier(group, registry, destination, "destination")?;
            let (first_flag, second_flag) = if *directed {
                (FLAG_DIRECTED_SOURCE, FLAG_DIRECTED_DEST)
            } else {
                (FLAG_UNDIRECTED, FLAG_UNDIRECTED)
            };
            let mut rows = vec![(
                build_key(&group.name, &src, first_flag, Some(&dst), &group_by),
                value.clone(),
            )];
            // Self-loops get a single row; a second would double-count.
            if src != dst {
                rows.push((
                    build_key(&group.name, &dst, second_flag, Some(&src), &group_by),
                    value,
                ));
            }
            Ok(rows)
        }
        (ElementId::Entity { .. }, GroupKind::Edge) => Err(StoreError::Encoding(format!(
            "group '{}' declares edges but the element is an entity",
            group.name
        ))),
        (ElementId::Edge { .. }, GroupKind::Entity) => Err(StoreError::Encoding(format!(
            "group '{}' declares entities but the element is an edge",
            group.name
        ))),
    }
}

// =============================================================================
// ELEMENT DECODING
// =============================================================================

/// Decode a physical (or merged) record back into an element.
///
/// Dest-first edge rows are re-oriented so the decoded edge always reads
/// source → destination.
pub fn decode_element(
    key: &[u8],
    value: &[u8],
    schema: &Schema,
    registry: &SerialiserRegistry,
) -> Result<Element, StoreError> {
    let parsed = parse_key(key)?;
    let group = schema.group(&parsed.group)?;

    let id = match (parsed.flag, group.kind) {
        (FLAG_ENTITY, GroupKind::Entity) => ElementId::Entity {
            vertex: registry.decode(group.vertex_kind, &parsed.first)?,
        },
        (FLAG_UNDIRECTED | FLAG_DIRECTED_SOURCE | FLAG_DIRECTED_DEST, GroupKind::Edge) => {
            let second = parsed.second.as_deref().ok_or_else(|| {
                StoreError::Decoding("edge key is missing its second endpoint".to_string())
            })?;
            let first = registry.decode(group.vertex_kind, &parsed.first)?;
            let second = registry.decode(group.vertex_kind, second)?;
            let (source, destination) = if parsed.flag == FLAG_DIRECTED_DEST {
                (second, first)
            } else {
                (first, second)
            };
            ElementId::Edge {
                source,
                destination,
                directed: parsed.flag != FLAG_UNDIRECTED,
            }
        }
        (flag, kind) => {
            return Err(StoreError::Decoding(format!(
                "row flag 0x{flag:02x} does not match group '{}' of kind {kind:?}",
                group.name
            )));
        }
    };

    let mut properties = BTreeMap::new();

    let group_by_defs = group.group_by_properties();
    if parsed.group_by.len() != group_by_defs.len() {
        return Err(StoreError::Decoding(format!(
            "group '{}' declares {} group-by properties, key carries {}",
            group.name,
            group_by_defs.len(),
            parsed.group_by.len()
        )));
    }
    for (prop, bytes) in group_by_defs.iter().zip(&parsed.group_by) {
        properties.insert(prop.name.clone(), registry.decode(prop.kind, bytes)?);
    }

    let aggregated_defs = group.aggregated_properties();
    let fields = decode_value_fields(value)?;
    if fields.len() != aggregated_defs.len() {
        return Err(StoreError::Decoding(format!(
            "group '{}' declares {} aggregated properties, value carries {}",
            group.name,
            aggregated_defs.len(),
            fields.len()
        )));
    }
    for (prop, bytes) in aggregated_defs.iter().zip(&fields) {
        properties.insert(prop.name.clone(), registry.decode(prop.kind, bytes)?);
    }

    Ok(Element {
        group: parsed.group,
        id,
        properties,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateFn;
    use crate::schema::PropertyDef;

    fn test_schema(registry: &SerialiserRegistry) -> Schema {
        Schema::new(
            vec![
                GroupDef::entity(
                    "person",
                    PropertyKind::Str,
                    vec![PropertyDef::aggregated("count", PropertyKind::I64, AggregateFn::Sum)],
                ),
                GroupDef::edge(
                    "knows",
                    PropertyKind::Str,
                    vec![
                        PropertyDef::group_by("since", PropertyKind::I32),
                        PropertyDef::aggregated("weight", PropertyKind::I64, AggregateFn::Sum),
                    ],
                ),
            ],
            registry,
        )
        .expect("schema")
    }

    #[test]
    fn escape_roundtrip_and_order() {
        let inputs: [&[u8]; 5] = [b"", &[0x00], &[0x01], &[0x00, 0xFF], b"plain"];
        for input in inputs {
            assert_eq!(unescape(&escape(input)).expect("unescape"), input);
        }
        // escaping preserves unsigned lexicographic order
        let mut raw: Vec<&[u8]> = vec![&[0x00], &[0x00, 0x00], &[0x01], &[0x02], b"ab"];
        raw.sort();
        let escaped: Vec<Vec<u8>> = raw.iter().map(|r| escape(r)).collect();
        let mut sorted = escaped.clone();
        sorted.sort();
        assert_eq!(escaped, sorted);
    }

    #[test]
    fn unescape_rejects_dangling_escape() {
        assert!(unescape(&[0x01]).is_err());
        assert!(unescape(&[0x01, 0x07]).is_err());
    }

    #[test]
    fn entity_roundtrip() {
        let registry = SerialiserRegistry::default();
        let schema = test_schema(&registry);
        let mut props = BTreeMap::new();
        props.insert("count".to_string(), TypedValue::I64(4));
        let element = Element::entity("person", TypedValue::str("alice"), props);

        let rows = encode_rows(&element, &schema, &registry).expect("encode");
        assert_eq!(rows.len(), 1);
        let decoded = decode_element(&rows[0].0, &rows[0].1, &schema, &registry).expect("decode");
        assert_eq!(decoded, element);
    }

    #[test]
    fn directed_edge_produces_two_rows_both_decoding_identically() {
        let registry = SerialiserRegistry::default();
        let schema = test_schema(&registry);
        let mut props = BTreeMap::new();
        props.insert("since".to_string(), TypedValue::I32(2020));
        props.insert("weight".to_string(), TypedValue::I64(1));
        let element = Element::edge(
            "knows",
            TypedValue::str("a"),
            TypedValue::str("b"),
            true,
            props,
        );

        let rows = encode_rows(&element, &schema, &registry).expect("encode");
        assert_eq!(rows.len(), 2);
        assert_eq!(key_flag(&rows[0].0).expect("flag"), FLAG_DIRECTED_SOURCE);
        assert_eq!(key_flag(&rows[1].0).expect("flag"), FLAG_DIRECTED_DEST);
        for (key, value) in &rows {
            let decoded = decode_element(key, value, &schema, &registry).expect("decode");
            assert_eq!(decoded, element);
        }
    }

    #[test]
    fn self_loop_produces_one_row() {
        let registry = SerialiserRegistry::default();
        let schema = test_schema(&registry);
        let mut props = BTreeMap::new();
        props.insert("since".to_string(), TypedValue::I32(1999));
        props.insert("weight".to_string(), TypedValue::I64(1));
        let element = Element::edge(
            "knows",
            TypedValue::str("a"),
            TypedValue::str("a"),
            true,
            props,
        );
        let rows = encode_rows(&element, &schema, &registry).expect("encode");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn identical_identity_yields_identical_keys() {
        let registry = SerialiserRegistry::default();
        let schema = test_schema(&registry);
        let element = |weight: i64| {
            let mut props = BTreeMap::new();
            props.insert("since".to_string(), TypedValue::I32(2020));
            props.insert("weight".to_string(), TypedValue::I64(weight));
            Element::edge(
                "knows",
                TypedValue::str("a"),
                TypedValue::str("b"),
                true,
                props,
            )
        };
        let rows_a = encode_rows(&element(1), &schema, &registry).expect("encode");
        let rows_b = encode_rows(&element(99), &schema, &registry).expect("encode");
        assert_eq!(rows_a[0].0, rows_b[0].0);
        assert_ne!(rows_a[0].1, rows_b[0].1);
    }

    #[test]
    fn differing_group_by_property_yields_different_keys() {
        let registry = SerialiserRegistry::default();
        let schema = test_schema(&registry);
        let element = |since: i32| {
            let mut props = BTreeMap::new();
            props.insert("since".to_string(), TypedValue::I32(since));
            props.insert("weight".to_string(), TypedValue::I64(1));
            Element::edge(
                "knows",
                TypedValue::str("a"),
                TypedValue::str("b"),
                true,
                props,
            )
        };
        let rows_a = encode_rows(&element(2020), &schema, &registry).expect("encode");
        let rows_b = encode_rows(&element(2021), &schema, &registry).expect("encode");
        assert_ne!(rows_a[0].0, rows_b[0].0);
    }

    #[test]
    fn missing_required_property_fails_encoding() {
        let registry = SerialiserRegistry::default();
        let schema = test_schema(&registry);
        let element = Element::edge(
            "knows",
            TypedValue::str("a"),
            TypedValue::str("b"),
            true,
            BTreeMap::new(),
        );
        let err = encode_rows(&element, &schema, &registry).expect_err("missing props");
        assert!(matches!(err, StoreError::Encoding(_)));
    }

    #[test]
    fn mismatched_identifier_kind_fails_encoding() {
        let registry = SerialiserRegistry::default();
        let schema = test_schema(&registry);
        let mut props = BTreeMap::new();
        props.insert("count".to_string(), TypedValue::I64(1));
        let element = Element::entity("person", TypedValue::I64(42), props);
        let err = encode_rows(&element, &schema, &registry).expect_err("kind mismatch");
        assert!(matches!(err, StoreError::Encoding(_)));
    }

    #[test]
    fn entity_in_edge_group_fails_encoding() {
        let registry = SerialiserRegistry::default();
        let schema = test_schema(&registry);
        let mut props = BTreeMap::new();
        props.insert("since".to_string(), TypedValue::I32(1));
        props.insert("weight".to_string(), TypedValue::I64(1));
        let element = Element {
            group: "knows".to_string(),
            id: ElementId::Entity {
                vertex: TypedValue::str("a"),
            },
            properties: props,
        };
        let err = encode_rows(&element, &schema, &registry).expect_err("shape mismatch");
        assert!(matches!(err, StoreError::Encoding(_)));
    }
}
