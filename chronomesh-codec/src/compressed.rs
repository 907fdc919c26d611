//! The compressed archive form.
//!
//! Groups nodes by `node_type` and edges by `relationship_type`, recording
//! each type's ordered key list once and then storing only positional value
//! arrays: declare the shape once, store value tuples after it, aimed at
//! JSON object keys instead of fixed-width words.

use crate::document::{LinkDoc, NodeDoc, NodeLinkDocument};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("[CODEC_MISSING_KEY] relationship type {rel_type:?} has {expected} keys but value row has {actual}")]
    LinkArityMismatch {
        rel_type: String,
        expected: usize,
        actual: usize,
    },
    #[error("[CODEC_MISSING_KEY] node type {node_type:?} has {expected} keys but value row has {actual}")]
    NodeArityMismatch {
        node_type: String,
        expected: usize,
        actual: usize,
    },
    #[error("[CODEC_UNKNOWN_RELATIONSHIP_TYPE] link row has no known relationship_types entry")]
    UnknownRelationshipType,
    #[error("[CODEC_CORRUPT_ARCHIVE] {0}")]
    Corrupt(String),
}

/// The compressed, schema-aware archive form. Carries the same content as a
/// [`NodeLinkDocument`] (law L1: `decompress(compress(x)) == x` up to key
/// order within a type bucket).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressedGraph {
    pub directed: bool,
    pub multigraph: bool,
    #[serde(default)]
    pub graph: Value,
    /// `node_type` -> ordered list of property keys observed for that type.
    pub node_types: BTreeMap<String, Vec<String>>,
    /// `node_type` -> list of value-arrays, positions aligned with `node_types`.
    pub node_values: BTreeMap<String, Vec<Vec<Value>>>,
    /// `relationship_type` -> ordered list of property keys.
    pub relationship_types: BTreeMap<String, Vec<String>>,
    /// Flat list of value-arrays; each array's first position is the
    /// relationship type, which indexes `relationship_types`.
    pub link_values: Vec<Vec<Value>>,
}

/// Builds the ordered key list for a `node_type`: `id`, `node_type`, then
/// the union of property keys observed across every node of that type,
/// sorted (deterministic since it's collected into a `BTreeSet`). A union
/// rather than the first node's keys, so a later node with a key an
/// earlier node of the same type lacks still gets a slot in the row.
fn node_key_order(property_keys: &BTreeSet<String>) -> Vec<String> {
    let mut keys = vec!["id".to_string(), "node_type".to_string()];
    keys.extend(property_keys.iter().cloned());
    keys
}

fn node_value_row(node: &NodeDoc, keys: &[String]) -> Vec<Value> {
    keys.iter()
        .map(|k| match k.as_str() {
            "id" => Value::String(node.node_id.clone()),
            "node_type" => Value::String(node.node_type.clone()),
            other => node.properties.get(other).cloned().unwrap_or(Value::Null),
        })
        .collect()
}

/// Builds the ordered key list for a `relationship_type`: `relationship_type`
/// always comes first (it doubles as the positional discriminant in
/// `link_values`), then `source`, `target`, then the union of property keys
/// observed across every link of that type.
fn link_key_order(property_keys: &BTreeSet<String>) -> Vec<String> {
    let mut keys = vec![
        "relationship_type".to_string(),
        "source".to_string(),
        "target".to_string(),
    ];
    keys.extend(property_keys.iter().cloned());
    keys
}

fn link_value_row(link: &LinkDoc, keys: &[String]) -> Vec<Value> {
    keys.iter()
        .map(|k| match k.as_str() {
            "relationship_type" => Value::String(link.relationship_type.clone()),
            "source" => Value::String(link.source.clone()),
            "target" => Value::String(link.target.clone()),
            other => link.properties.get(other).cloned().unwrap_or(Value::Null),
        })
        .collect()
}

/// Factors `doc` into the compressed archive form.
///
/// Two passes per type: first collect the union of property keys observed
/// across every node/link of that type, then build every row against that
/// fixed key list. A one-pass fold keyed off the first item's shape would
/// silently drop any property a later item has that an earlier one of the
/// same type lacks.
pub fn compress(doc: &NodeLinkDocument) -> CompressedGraph {
    let mut compressed = CompressedGraph {
        directed: doc.directed,
        multigraph: doc.multigraph,
        graph: doc.graph.clone(),
        ..Default::default()
    };

    let mut node_key_sets: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for node in &doc.nodes {
        node_key_sets
            .entry(node.node_type.clone())
            .or_default()
            .extend(node.properties.keys().cloned());
    }
    for (node_type, property_keys) in &node_key_sets {
        compressed.node_types.insert(node_type.clone(), node_key_order(property_keys));
    }
    for node in &doc.nodes {
        let keys = &compressed.node_types[&node.node_type];
        let row = node_value_row(node, keys);
        compressed.node_values.entry(node.node_type.clone()).or_default().push(row);
    }

    let mut link_key_sets: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for link in &doc.links {
        link_key_sets
            .entry(link.relationship_type.clone())
            .or_default()
            .extend(link.properties.keys().cloned());
    }
    for (rel_type, property_keys) in &link_key_sets {
        compressed.relationship_types.insert(rel_type.clone(), link_key_order(property_keys));
    }
    for link in &doc.links {
        let keys = &compressed.relationship_types[&link.relationship_type];
        let row = link_value_row(link, keys);
        compressed.link_values.push(row);
    }

    compressed
}

fn value_as_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reconstructs a [`NodeLinkDocument`] from its compressed form.
pub fn decompress(compressed: &CompressedGraph) -> Result<NodeLinkDocument, CodecError> {
    let mut nodes = Vec::new();
    for (node_type, rows) in &compressed.node_values {
        let keys = compressed
            .node_types
            .get(node_type)
            .ok_or_else(|| CodecError::Corrupt(format!("missing node_types for {node_type:?}")))?;
        for row in rows {
            if row.len() != keys.len() {
                return Err(CodecError::NodeArityMismatch {
                    node_type: node_type.clone(),
                    expected: keys.len(),
                    actual: row.len(),
                });
            }
            let mut node_id = None;
            let mut properties = BTreeMap::new();
            for (k, v) in keys.iter().zip(row.iter()) {
                match k.as_str() {
                    "id" => node_id = Some(value_as_string(v)),
                    "node_type" => {}
                    other => {
                        // A type's key list is the union of keys seen across
                        // every member; a node missing one of those keys was
                        // padded with `Null` at compress time. Drop it back
                        // out so an absent key round-trips as absent, not as
                        // `null`.
                        if !v.is_null() {
                            properties.insert(other.to_string(), v.clone());
                        }
                    }
                }
            }
            let node_id = node_id
                .ok_or_else(|| CodecError::Corrupt("node row missing id".to_string()))?;
            nodes.push(NodeDoc {
                node_id,
                node_type: node_type.clone(),
                properties,
            });
        }
    }

    let mut links = Vec::new();
    for row in &compressed.link_values {
        let rel_type = row
            .first()
            .map(value_as_string)
            .ok_or(CodecError::UnknownRelationshipType)?;
        let keys = compressed
            .relationship_types
            .get(&rel_type)
            .ok_or(CodecError::UnknownRelationshipType)?;
        if row.len() != keys.len() {
            return Err(CodecError::LinkArityMismatch {
                rel_type,
                expected: keys.len(),
                actual: row.len(),
            });
        }
        let mut source = None;
        let mut target = None;
        let mut properties = BTreeMap::new();
        for (k, v) in keys.iter().zip(row.iter()) {
            match k.as_str() {
                "relationship_type" => {}
                "source" => source = Some(value_as_string(v)),
                "target" => target = Some(value_as_string(v)),
                other => {
                    if !v.is_null() {
                        properties.insert(other.to_string(), v.clone());
                    }
                }
            }
        }
        let source = source.ok_or_else(|| CodecError::Corrupt("link row missing source".into()))?;
        let target = target.ok_or_else(|| CodecError::Corrupt("link row missing target".into()))?;
        links.push(LinkDoc {
            source,
            target,
            relationship_type: rel_type,
            properties,
        });
    }

    // Node/link order within a bucket is insertion order (preserved above);
    // round-trip equality is defined up to key order, not element order, so
    // sort both sides the same way the test harness does before comparing.
    nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    links.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

    Ok(NodeLinkDocument {
        directed: compressed.directed,
        multigraph: compressed.multigraph,
        graph: compressed.graph.clone(),
        nodes,
        links,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_doc() -> NodeLinkDocument {
        let mut a_props = BTreeMap::new();
        a_props.insert("units_in_chain".to_string(), json!(3));
        a_props.insert("expiry".to_string(), json!(100));

        let mut b_props = BTreeMap::new();
        b_props.insert("name".to_string(), json!("widget"));

        NodeLinkDocument {
            directed: true,
            multigraph: false,
            graph: json!({}),
            nodes: vec![
                NodeDoc {
                    node_id: "A".into(),
                    node_type: "Parts".into(),
                    properties: a_props,
                },
                NodeDoc {
                    node_id: "B".into(),
                    node_type: "Parts".into(),
                    properties: b_props,
                },
            ],
            links: vec![LinkDoc {
                source: "A".into(),
                target: "B".into(),
                relationship_type: "feeds".into(),
                properties: BTreeMap::new(),
            }],
        }
    }

    #[test]
    fn round_trip_preserves_content() {
        let doc = sample_doc();
        let compressed = compress(&doc);
        let mut decompressed = decompress(&compressed).unwrap();
        let mut expected = doc.clone();
        expected.nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        decompressed.nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        assert_eq!(decompressed, expected);
    }

    #[test]
    fn link_values_index_by_relationship_type() {
        let doc = sample_doc();
        let compressed = compress(&doc);
        assert_eq!(compressed.link_values.len(), 1);
        assert_eq!(compressed.link_values[0][0], json!("feeds"));
        assert!(compressed.relationship_types.contains_key("feeds"));
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let mut compressed = compress(&sample_doc());
        compressed
            .node_values
            .get_mut("Parts")
            .unwrap()
            .first_mut()
            .unwrap()
            .pop();
        let err = decompress(&compressed).unwrap_err();
        assert!(matches!(err, CodecError::NodeArityMismatch { .. }));
    }
}
