//! Identity types shared across the workspace.
//!
//! `node_id` / `instance_id` / `version` are plain strings at the wire
//! boundary (spec'd that way), but we wrap them so a schema node id can never
//! be passed where an instance id is expected by accident.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A schema node or edge endpoint identifier. Producer-supplied, unique
/// within one version's schema graph.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_owned())
    }
}

/// Opaque identifier for a materialised state instance. Engine-assigned,
/// unique within one version's state graph (I3).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new_v4() -> Self {
        InstanceId(uuid_like::new_v4_string())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        InstanceId(s)
    }
}

/// The name of a version namespace. Required on every request envelope.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionId(pub String);

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VersionId {
    fn from(s: String) -> Self {
        VersionId(s)
    }
}

impl From<&str> for VersionId {
    fn from(s: &str) -> Self {
        VersionId(s.to_owned())
    }
}

/// Thin indirection so instance-id generation has one place to swap out
/// (e.g. for deterministic ids in tests) without pulling `uuid` into every
/// crate that touches `InstanceId`.
mod uuid_like {
    use uuid::Uuid;

    pub fn new_v4_string() -> String {
        Uuid::new_v4().to_string()
    }
}
