//! In-memory `(schema, state)` graph pair the reconciliation engine operates
//! on. These are the scratch-builder structures: the worker loads one pair
//! per version, the engine mutates it in place, and only the final result
//! is persisted — no per-payload deep copy.

use chronomesh_base::{InstanceId, NodeId};
use chronomesh_codec::{LinkDoc, NodeDoc, NodeLinkDocument};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchemaNode {
    pub node_type: String,
    pub properties: BTreeMap<String, Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SchemaNode {
    pub fn units_in_chain(&self) -> Option<i64> {
        self.properties.get("units_in_chain").and_then(Value::as_i64)
    }

    pub fn expiry(&self) -> Option<i64> {
        self.properties.get("expiry").and_then(Value::as_i64)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchemaEdge {
    pub relationship_type: String,
    pub properties: BTreeMap<String, Value>,
}

/// The declarative schema graph. At most one edge per ordered pair of
/// nodes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchemaGraph {
    pub nodes: BTreeMap<NodeId, SchemaNode>,
    pub edges: BTreeMap<(NodeId, NodeId), SchemaEdge>,
}

impl SchemaGraph {
    pub fn to_document(&self) -> NodeLinkDocument {
        let nodes = self
            .nodes
            .iter()
            .map(|(id, n)| {
                let mut properties = n.properties.clone();
                properties.insert("created_at".to_string(), Value::from(n.created_at));
                properties.insert("updated_at".to_string(), Value::from(n.updated_at));
                NodeDoc {
                    node_id: id.0.clone(),
                    node_type: n.node_type.clone(),
                    properties,
                }
            })
            .collect();
        let links = self
            .edges
            .iter()
            .map(|((s, t), e)| LinkDoc {
                source: s.0.clone(),
                target: t.0.clone(),
                relationship_type: e.relationship_type.clone(),
                properties: e.properties.clone(),
            })
            .collect();
        NodeLinkDocument {
            directed: true,
            multigraph: false,
            graph: Value::Object(Default::default()),
            nodes,
            links,
        }
    }

    pub fn from_document(doc: &NodeLinkDocument) -> Self {
        let mut nodes = BTreeMap::new();
        for n in &doc.nodes {
            let mut properties = n.properties.clone();
            let created_at = properties
                .remove("created_at")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            let updated_at = properties
                .remove("updated_at")
                .and_then(|v| v.as_i64())
                .unwrap_or(created_at);
            nodes.insert(
                NodeId(n.node_id.clone()),
                SchemaNode {
                    node_type: n.node_type.clone(),
                    properties,
                    created_at,
                    updated_at,
                },
            );
        }
        let mut edges = BTreeMap::new();
        for l in &doc.links {
            edges.insert(
                (NodeId(l.source.clone()), NodeId(l.target.clone())),
                SchemaEdge {
                    relationship_type: l.relationship_type.clone(),
                    properties: l.properties.clone(),
                },
            );
        }
        SchemaGraph { nodes, edges }
    }

    /// Every node reachable from `start` by directed edges (exclusive of
    /// `start` itself) — used by cascade delete.
    pub fn descendants(&self, start: &NodeId) -> Vec<NodeId> {
        let mut seen = std::collections::BTreeSet::new();
        let mut stack = vec![start.clone()];
        let mut out = Vec::new();
        while let Some(n) = stack.pop() {
            for (s, t) in self.edges.keys() {
                if s == &n && seen.insert(t.clone()) {
                    out.push(t.clone());
                    stack.push(t.clone());
                }
            }
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StateInstance {
    pub parent_id: NodeId,
    pub node_type: String,
    pub created_at: i64,
    pub valid_from: i64,
    pub valid_to: i64,
}

/// The materialised state graph. State edges are reserved — no code path
/// in this engine populates them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateGraph {
    pub instances: BTreeMap<InstanceId, StateInstance>,
}

impl StateGraph {
    pub fn instances_of(&self, parent_id: &NodeId) -> Vec<&InstanceId> {
        self.instances
            .iter()
            .filter(|(_, inst)| &inst.parent_id == parent_id)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn to_document(&self) -> NodeLinkDocument {
        let nodes = self
            .instances
            .iter()
            .map(|(id, inst)| {
                let mut properties = BTreeMap::new();
                properties.insert("parent_id".to_string(), Value::String(inst.parent_id.0.clone()));
                properties.insert("created_at".to_string(), Value::from(inst.created_at));
                properties.insert("valid_from".to_string(), Value::from(inst.valid_from));
                properties.insert("valid_to".to_string(), Value::from(inst.valid_to));
                NodeDoc {
                    node_id: id.0.clone(),
                    node_type: inst.node_type.clone(),
                    properties,
                }
            })
            .collect();
        NodeLinkDocument {
            directed: true,
            multigraph: false,
            graph: Value::Object(Default::default()),
            nodes,
            links: Vec::new(),
        }
    }

    pub fn from_document(doc: &NodeLinkDocument) -> Self {
        let mut instances = BTreeMap::new();
        for n in &doc.nodes {
            let parent_id = n
                .properties
                .get("parent_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let created_at = n.properties.get("created_at").and_then(Value::as_i64).unwrap_or(0);
            let valid_from = n
                .properties
                .get("valid_from")
                .and_then(Value::as_i64)
                .unwrap_or(created_at);
            let valid_to = n
                .properties
                .get("valid_to")
                .and_then(Value::as_i64)
                .unwrap_or(created_at);
            instances.insert(
                InstanceId(n.node_id.clone()),
                StateInstance {
                    parent_id: NodeId(parent_id),
                    node_type: n.node_type.clone(),
                    created_at,
                    valid_from,
                    valid_to,
                },
            );
        }
        StateGraph { instances }
    }
}
