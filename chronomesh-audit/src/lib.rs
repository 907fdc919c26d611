//! Audit log: an interface only. Persistence to a relational store is an
//! external collaborator's job, out of scope here; this crate carries the
//! trait the worker calls into, plus an in-memory double for tests.

use chronomesh_base::{InstanceId, Result, VersionId};
use serde::{Deserialize, Serialize};

/// One record emitted after each successfully applied payload:
/// `(id, timestamp, action, type, payload, version)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: InstanceId,
    pub timestamp: i64,
    pub action: String,
    pub graph_type: String,
    pub payload: serde_json::Value,
    pub version: VersionId,
}

/// The audit collaborator's contract. Implementations must make `record`
/// idempotent under duplicate delivery — the worker may call it more than
/// once for the same entry after a crash-and-retry.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<()>;
}

/// An in-memory `AuditSink` for tests: records every entry it sees,
/// including duplicates (it's the caller's job to prove idempotence, not
/// this double's).
#[derive(Default)]
pub struct InMemoryAuditSink {
    entries: std::sync::Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        InMemoryAuditSink::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit sink mutex poisoned").clone()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<()> {
        self.entries.lock().expect("audit sink mutex poisoned").push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_memory_sink_records_entries_in_order() {
        let sink = InMemoryAuditSink::new();
        for i in 0..3 {
            sink.record(AuditEntry {
                id: InstanceId::new_v4(),
                timestamp: i,
                action: "create".into(),
                graph_type: "schema".into(),
                payload: json!({}),
                version: VersionId("v1".into()),
            })
            .unwrap();
        }
        let entries = sink.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].timestamp, 1);
    }
}
