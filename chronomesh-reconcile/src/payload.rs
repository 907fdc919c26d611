//! The tagged payload variant: a `{NodeOp, EdgeOp, DirectImport}` enum that
//! malformed envelopes are rejected against at the boundary. Parsing
//! functions run once, at the edge of this crate, so nothing downstream
//! re-inspects raw JSON shape.

use crate::error::ReconcileError;
use chronomesh_base::NodeId;
use chronomesh_codec::NodeLinkDocument;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
pub enum NodeOp {
    Create {
        node_id: NodeId,
        node_type: String,
        properties: BTreeMap<String, Value>,
    },
    Update {
        node_id: NodeId,
        properties: BTreeMap<String, Value>,
    },
    Delete {
        node_id: NodeId,
        cascade: bool,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum EdgeOp {
    Create {
        source_id: NodeId,
        target_id: NodeId,
        edge_type: String,
        properties: BTreeMap<String, Value>,
    },
    Update {
        source_id: NodeId,
        target_id: NodeId,
        edge_type: String,
        properties: BTreeMap<String, Value>,
    },
    Delete {
        source_id: NodeId,
        target_id: NodeId,
        edge_type: Option<String>,
    },
}

/// One unit of mutation work, already discriminated — everything downstream
/// of [`parse_item`] matches on this instead of re-inspecting JSON shape.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Node(NodeOp),
    Edge(EdgeOp),
    DirectImport(Box<NodeLinkDocument>),
}

fn malformed(msg: impl Into<String>) -> ReconcileError {
    ReconcileError::MalformedPayload(msg.into())
}

fn get_str(obj: &Value, key: &str) -> Result<String, ReconcileError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| malformed(format!("missing or non-string {key:?}")))
}

fn get_properties(obj: &Value) -> BTreeMap<String, Value> {
    obj.get("properties")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// True when `obj` has the edge-op shape (`source_id`/`target_id`) rather
/// than the node-op shape (`node_id`). Payload kind is discriminated by
/// field presence; this is the one place that happens.
fn is_edge_shape(obj: &Value) -> bool {
    obj.get("source_id").is_some() && obj.get("target_id").is_some()
}

/// Parses one non-bulk sub-payload for the given base action
/// (`"create"` | `"update"` | `"delete"` — bulk prefixes are stripped by the
/// caller before this is reached).
pub fn parse_item(action: &str, item: &Value) -> Result<Payload, ReconcileError> {
    let obj = item
        .as_object()
        .ok_or_else(|| malformed("payload item is not an object"))?;
    let obj_value = Value::Object(obj.clone());

    if is_edge_shape(&obj_value) {
        let source_id = NodeId(get_str(&obj_value, "source_id")?);
        let target_id = NodeId(get_str(&obj_value, "target_id")?);
        let edge_type = obj_value.get("edge_type").and_then(Value::as_str).map(str::to_owned);
        return Ok(Payload::Edge(match action {
            "create" => EdgeOp::Create {
                source_id,
                target_id,
                edge_type: edge_type.ok_or_else(|| malformed("edge create missing edge_type"))?,
                properties: get_properties(&obj_value),
            },
            "update" => EdgeOp::Update {
                source_id,
                target_id,
                edge_type: edge_type.ok_or_else(|| malformed("edge update missing edge_type"))?,
                properties: get_properties(&obj_value),
            },
            "delete" => EdgeOp::Delete {
                source_id,
                target_id,
                edge_type,
            },
            other => return Err(malformed(format!("unknown action {other:?}"))),
        }));
    }

    let node_id = NodeId(get_str(&obj_value, "node_id")?);
    Ok(Payload::Node(match action {
        "create" => NodeOp::Create {
            node_id,
            node_type: get_str(&obj_value, "node_type")?,
            properties: get_properties(&obj_value),
        },
        "update" => NodeOp::Update {
            node_id,
            properties: get_properties(&obj_value),
        },
        "delete" => NodeOp::Delete {
            node_id,
            cascade: obj_value.get("cascade").and_then(Value::as_bool).unwrap_or(false),
        },
        other => return Err(malformed(format!("unknown action {other:?}"))),
    }))
}

/// Parses a `direct_create` payload: a whole node-link document.
pub fn parse_direct_import(payload: &Value) -> Result<Payload, ReconcileError> {
    let doc: NodeLinkDocument = serde_json::from_value(payload.clone())
        .map_err(|e| malformed(format!("direct_create payload is not a node-link document: {e}")))?;
    Ok(Payload::DirectImport(Box::new(doc)))
}

/// Splits a request-envelope `action` into its base verb and whether it's
/// a bulk action.
pub fn split_action(action: &str) -> Result<(&'static str, bool), ReconcileError> {
    match action {
        "create" => Ok(("create", false)),
        "update" => Ok(("update", false)),
        "delete" => Ok(("delete", false)),
        "bulk_create" => Ok(("create", true)),
        "bulk_update" => Ok(("update", true)),
        "bulk_delete" => Ok(("delete", true)),
        "direct_create" => Ok(("direct_create", false)),
        other => Err(malformed(format!("unknown action {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_node_create() {
        let item = json!({"node_id": "A", "node_type": "Parts", "properties": {"units_in_chain": 3}});
        let payload = parse_item("create", &item).unwrap();
        assert_eq!(
            payload,
            Payload::Node(NodeOp::Create {
                node_id: NodeId("A".into()),
                node_type: "Parts".into(),
                properties: BTreeMap::from([("units_in_chain".to_string(), json!(3))]),
            })
        );
    }

    #[test]
    fn parses_edge_update() {
        let item = json!({"source_id": "A", "target_id": "B", "edge_type": "r", "properties": {"w": 2}});
        let payload = parse_item("update", &item).unwrap();
        assert_eq!(
            payload,
            Payload::Edge(EdgeOp::Update {
                source_id: NodeId("A".into()),
                target_id: NodeId("B".into()),
                edge_type: "r".into(),
                properties: BTreeMap::from([("w".to_string(), json!(2))]),
            })
        );
    }

    #[test]
    fn rejects_node_create_without_node_type() {
        let item = json!({"node_id": "A", "properties": {}});
        let err = parse_item("create", &item).unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedPayload(_)));
    }

    #[test]
    fn splits_bulk_actions() {
        assert_eq!(split_action("bulk_update").unwrap(), ("update", true));
        assert_eq!(split_action("direct_create").unwrap(), ("direct_create", false));
    }
}
