//! The canonical node-link document: the live, uncompressed wire form.
//!
//! Each node/edge is a handful of recognised fields plus a free-form
//! property bag. `#[serde(flatten)]` gives us the node-link shape — a single
//! flat JSON object per node/edge — without hand-rolling a `Serialize` impl.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A node in the schema or state node-link document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDoc {
    #[serde(rename = "id")]
    pub node_id: String,
    pub node_type: String,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

/// A directed edge (link) in the schema node-link document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkDoc {
    pub source: String,
    pub target: String,
    pub relationship_type: String,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

/// The full node-link document: `{directed, multigraph, graph, nodes, links}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeLinkDocument {
    pub directed: bool,
    pub multigraph: bool,
    #[serde(default = "default_graph_meta")]
    pub graph: Value,
    pub nodes: Vec<NodeDoc>,
    pub links: Vec<LinkDoc>,
}

fn default_graph_meta() -> Value {
    Value::Object(Default::default())
}

impl Default for NodeLinkDocument {
    fn default() -> Self {
        NodeLinkDocument {
            directed: true,
            multigraph: false,
            graph: default_graph_meta(),
            nodes: Vec::new(),
            links: Vec::new(),
        }
    }
}

impl NodeDoc {
    pub fn units_in_chain(&self) -> Option<i64> {
        self.properties.get("units_in_chain").and_then(Value::as_i64)
    }

    pub fn expiry(&self) -> Option<i64> {
        self.properties.get("expiry").and_then(Value::as_i64)
    }
}
