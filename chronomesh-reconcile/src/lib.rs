//! The mutation algebra (C4): applies request-envelope payloads to a
//! `(SchemaGraph, StateGraph)` pair, deriving state-instance changes from
//! schema property changes. See [`engine::apply_envelope`] for the entry
//! point the worker calls once per queue item.

mod engine;
mod error;
mod graph;
mod payload;

pub use engine::{apply_envelope, apply_payload, reconcile_instances, BulkItemResult};
pub use error::ReconcileError;
pub use graph::{SchemaEdge, SchemaGraph, SchemaNode, StateGraph, StateInstance};
pub use payload::{parse_direct_import, parse_item, split_action, EdgeOp, NodeOp, Payload};
