//! Reconciliation error taxonomy.
//!
//! Kept as a dedicated `thiserror` enum, not `chronomesh_base::Error`: the
//! worker needs to match on *kind* to decide requeue-vs-poison-vs-drop,
//! which a dynamic backtrace-wrapped error has no room for. Bracketed
//! error codes make each variant greppable in logs.

use chronomesh_base::NodeId;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("[RECONCILE_MISSING_NODE] schema node {0:?} does not exist")]
    MissingNode(NodeId),

    #[error("[RECONCILE_MISSING_ENDPOINT] edge endpoint {0:?} does not exist")]
    MissingEndpoint(NodeId),

    #[error("[RECONCILE_MISSING_EDGE] edge ({0:?}, {1:?}) does not exist")]
    MissingEdge(NodeId, NodeId),

    #[error("[RECONCILE_MALFORMED_PAYLOAD] {0}")]
    MalformedPayload(String),
}

impl ReconcileError {
    /// Whether this kind is worth a bounded retry before poisoning.
    /// `MissingNode` / `MissingEndpoint` / `MissingEdge` can all resolve
    /// themselves if the missing piece arrives on a later queue item, so
    /// they get requeued; if still failing after a small bounded number of
    /// retries, the item is poisoned. `MalformedPayload` is never retried —
    /// it's structurally wrong, not a race with another in-flight payload.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::MalformedPayload(_))
    }
}
