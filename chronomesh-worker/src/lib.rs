//! Worker loop: the single consumer that drains the durable queue and
//! drives the store, codec, reconcile engine and processing monitor for
//! every item. A single blocking OS thread, no async runtime.

use chronomesh_audit::{AuditEntry, AuditSink};
use chronomesh_base::{Config, InstanceId, Result, Timestamp, VersionId};
use chronomesh_codec::{compress, NodeLinkDocument};
use chronomesh_monitor::ProcessingMonitor;
use chronomesh_queue::{Queue, QueueItem};
use chronomesh_reconcile::{BulkItemResult, SchemaGraph, StateGraph};
use chronomesh_store::VersionStore;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Request envelope fields the worker needs. Everything under `payload`
/// stays opaque `serde_json::Value` until it reaches
/// [`chronomesh_reconcile::apply_envelope`].
#[derive(Clone, Debug, serde::Deserialize)]
struct Envelope {
    action: String,
    #[serde(default)]
    #[allow(dead_code)]
    r#type: String,
    timestamp: i64,
    version: String,
    #[serde(default = "default_payload")]
    payload: serde_json::Value,
}

fn default_payload() -> serde_json::Value {
    serde_json::Value::Null
}

/// Internal-only field stamped onto a re-enqueued envelope so the worker
/// can count consecutive failures of the same logical item even though
/// re-pushing it assigns a fresh queue sequence number each time.
const POISON_ATTEMPTS_FIELD: &str = "_poison_attempts";

fn poison_attempts(raw: &serde_json::Value) -> u32 {
    raw.get(POISON_ATTEMPTS_FIELD).and_then(serde_json::Value::as_u64).unwrap_or(0) as u32
}

fn bump_poison_attempts(raw: &serde_json::Value) -> Vec<u8> {
    let mut bumped = raw.clone();
    if let serde_json::Value::Object(map) = &mut bumped {
        map.insert(POISON_ATTEMPTS_FIELD.to_string(), serde_json::json!(poison_attempts(raw) + 1));
    }
    serde_json::to_vec(&bumped).expect("re-serializing an already-parsed JSON value cannot fail")
}

fn validate_envelope(env: &Envelope) -> std::result::Result<(), String> {
    if env.version.is_empty() {
        return Err("missing version".to_string());
    }
    if Timestamp::from_raw(env.timestamp).is_none() {
        return Err("negative timestamp".to_string());
    }
    let is_bulk = env.action.starts_with("bulk_");
    if is_bulk {
        if !matches!(&env.payload, serde_json::Value::Array(a) if !a.is_empty()) {
            return Err("bulk action requires a non-empty array payload".to_string());
        }
    } else if !matches!(&env.payload, serde_json::Value::Object(o) if !o.is_empty())
        && env.action != "direct_create"
    {
        return Err("non-bulk action requires a non-empty object payload".to_string());
    }
    Ok(())
}

/// Tracks the most recently applied timestamp per version, so the worker
/// knows when to roll archives forward. Kept per-version rather than as a
/// single global value, since versions advance independently.
#[derive(Default)]
struct TimestampTracker {
    current: Mutex<HashMap<VersionId, i64>>,
}

impl TimestampTracker {
    /// Returns `(is_first_observed, advanced)` for `version` at `timestamp`.
    fn observe(&self, version: &VersionId, timestamp: i64) -> (bool, bool) {
        let mut current = self.current.lock().expect("timestamp tracker mutex poisoned");
        match current.get(version).copied() {
            None => {
                current.insert(version.clone(), timestamp);
                (true, true)
            }
            Some(prev) if timestamp > prev => {
                current.insert(version.clone(), timestamp);
                (false, true)
            }
            Some(_) => (false, false),
        }
    }
}

pub struct Worker {
    queue: Queue,
    store: VersionStore,
    monitor: ProcessingMonitor,
    audit: Box<dyn AuditSink>,
    config: Config,
    timestamps: TimestampTracker,
}

impl Worker {
    pub fn new(queue: Queue, store: VersionStore, audit: Box<dyn AuditSink>, config: Config) -> Self {
        Worker {
            queue,
            store,
            monitor: ProcessingMonitor::new(),
            audit,
            config,
            timestamps: TimestampTracker::default(),
        }
    }

    pub fn monitor(&self) -> &ProcessingMonitor {
        &self.monitor
    }

    /// Startup recovery sweep: moves anything left in in-flight back to
    /// pending. Call once before [`Self::run`].
    pub fn recover(&self) -> Result<usize> {
        self.queue.recover_in_flight()
    }

    /// Runs the worker loop forever, taking one item at a time.
    pub fn run(&self) -> Result<()> {
        loop {
            let item = self.queue.take(self.config.queue_poll_interval)?;
            self.process_one(item)?;
        }
    }

    /// Processes exactly one queue item through to ack/requeue. Exposed
    /// separately from [`Self::run`] so tests and a push-and-wait-once path
    /// don't need a live queue loop.
    pub fn process_one(&self, item: QueueItem) -> Result<()> {
        let start = Instant::now();

        let raw: serde_json::Value = match serde_json::from_slice(&item.bytes) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(seq = item.seq, error = %e, "dropping undecodable queue item");
                self.queue.ack(item.seq)?;
                return Ok(());
            }
        };
        let envelope: Envelope = match serde_json::from_value(raw.clone()) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(seq = item.seq, error = %e, "dropping undecodable queue item");
                self.queue.ack(item.seq)?;
                return Ok(());
            }
        };
        if let Err(reason) = validate_envelope(&envelope) {
            tracing::warn!(seq = item.seq, reason, "dropping malformed envelope");
            self.queue.ack(item.seq)?;
            return Ok(());
        }

        let version = VersionId(envelope.version.clone());
        let span = tracing::info_span!("process_item", version = %version, action = %envelope.action, timestamp = envelope.timestamp);
        let _guard = span.enter();

        let is_bulk = envelope.action.starts_with("bulk_");
        let outcome = self.apply_locked(&version, &envelope);
        match outcome {
            Ok(results) => {
                // A non-bulk payload has exactly one result; its failure is
                // fatal for the envelope, not a per-item detail to report
                // and move past — unlike a bulk payload, where each
                // sub-item's outcome is independent and never blocks ack.
                if !is_bulk {
                    if let Some(Err(e)) = results.first().map(|r| &r.outcome) {
                        self.monitor.end(&version);
                        return self.handle_failure(&item, &raw, e, e.is_retryable());
                    }
                }
                self.monitor.end(&version);
                self.queue.ack(item.seq)?;
                self.emit_audit(&version, &envelope, &results);
                let elapsed = start.elapsed();
                if elapsed > self.config.slow_operation_warn_threshold {
                    tracing::warn!(elapsed_ms = elapsed.as_millis(), "slow operation");
                }
                let failed = results.iter().filter(|r| r.outcome.is_err()).count();
                if failed > 0 {
                    tracing::warn!(failed, total = results.len(), "bulk payload had partial failures");
                }
                Ok(())
            }
            Err(e) => {
                self.monitor.end(&version);
                self.handle_failure(&item, &raw, &e, true)
            }
        }
    }

    /// Decides ack/requeue/poison for a failed item. `retryable` gates
    /// whether the poison-after-N-attempts budget applies at all:
    /// non-retryable failures (malformed payloads) are poisoned immediately,
    /// since retrying can't change the outcome.
    fn handle_failure(
        &self,
        item: &QueueItem,
        raw: &serde_json::Value,
        error: &dyn std::fmt::Display,
        retryable: bool,
    ) -> Result<()> {
        if !retryable {
            tracing::error!(%error, "non-retryable failure, item poisoned");
            return Ok(());
        }
        let attempts = poison_attempts(raw) + 1;
        if attempts >= self.config.poison_after_failures {
            tracing::error!(%error, attempts, "item poisoned after repeated failures, left in-flight for inspection");
            // Deliberately neither ack nor requeue: the item stays in the
            // in-flight list where `take` already placed it.
        } else {
            tracing::warn!(%error, attempts, "reconcile/persist failed, requeuing");
            self.queue.ack(item.seq)?;
            self.queue.push(&bump_poison_attempts(raw))?;
        }
        Ok(())
    }

    fn apply_locked(&self, version: &VersionId, envelope: &Envelope) -> Result<Vec<BulkItemResult>> {
        let _lock = self.store.lock(version)?;
        self.monitor.begin(version.clone(), envelope.timestamp);

        let schema_doc = self.store.read_live_schema(version)?;
        let state_doc = self.store.read_live_state(version)?;
        let mut schema = SchemaGraph::from_document(&schema_doc);
        let mut state = StateGraph::from_document(&state_doc);

        let (is_first, advanced) = self.timestamps.observe(version, envelope.timestamp);
        if is_first || advanced {
            self.store
                .write_schema_archive(version, envelope.timestamp, &compress(&schema.to_document()))?;
            self.store
                .write_state_archive(version, envelope.timestamp, &compress(&state.to_document()))?;
        }

        let results = chronomesh_reconcile::apply_envelope(
            &mut schema,
            &mut state,
            &envelope.action,
            envelope.timestamp,
            &envelope.payload,
            &self.config,
        )
        .map_err(|e| chronomesh_base::err(e.to_string()))?;

        // A failed single (non-bulk) payload never mutated schema/state past
        // the point of failure, so nothing needs persisting; the caller
        // treats this as a fatal envelope-level error instead.
        let is_bulk = envelope.action.starts_with("bulk_");
        let single_item_failed = !is_bulk && matches!(results.first().map(|r| &r.outcome), Some(Err(_)));
        if !single_item_failed {
            self.persist(version, &schema, &state, envelope.timestamp)?;
        }
        Ok(results)
    }

    fn persist(&self, version: &VersionId, schema: &SchemaGraph, state: &StateGraph, timestamp: i64) -> Result<()> {
        let schema_doc: NodeLinkDocument = schema.to_document();
        let state_doc: NodeLinkDocument = state.to_document();
        self.store.write_live_schema(version, &schema_doc)?;
        self.store.write_live_state(version, &state_doc)?;
        self.store.write_schema_archive(version, timestamp, &compress(&schema_doc))?;
        self.store.write_state_archive(version, timestamp, &compress(&state_doc))?;
        Ok(())
    }

    fn emit_audit(&self, version: &VersionId, envelope: &Envelope, results: &[BulkItemResult]) {
        for result in results {
            if result.outcome.is_err() {
                continue;
            }
            let entry = AuditEntry {
                id: InstanceId::new_v4(),
                timestamp: envelope.timestamp,
                action: envelope.action.clone(),
                graph_type: envelope.r#type.clone(),
                payload: envelope.payload.clone(),
                version: version.clone(),
            };
            if let Err(e) = self.audit.record(entry) {
                tracing::warn!(error = %e, "audit sink rejected entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronomesh_audit::InMemoryAuditSink;
    use serde_json::json;

    fn worker(dir: &std::path::Path) -> Worker {
        let queue = Queue::open(dir.join("q.redb")).unwrap();
        let store = VersionStore::new(dir.join("versions"));
        Worker::new(queue, store, Box::new(InMemoryAuditSink::new()), Config::default())
    }

    #[test]
    fn processes_a_single_create_and_persists_live_files() {
        let dir = tempfile::tempdir().unwrap();
        let w = worker(dir.path());
        let envelope = json!({
            "action": "create", "type": "schema", "timestamp": 1, "version": "v1",
            "payload": {"node_id": "A", "node_type": "Parts", "properties": {"units_in_chain": 2}}
        });
        let seq = w.queue.push(&serde_json::to_vec(&envelope).unwrap()).unwrap();
        let item = w.queue.try_take().unwrap().unwrap();
        assert_eq!(item.seq, seq);
        w.process_one(item).unwrap();

        let version = VersionId("v1".into());
        let schema = w.store.read_live_schema(&version).unwrap();
        assert_eq!(schema.nodes.len(), 1);
        let state = w.store.read_live_state(&version).unwrap();
        assert_eq!(state.nodes.len(), 2);
        assert_eq!(w.queue.len().unwrap(), 0);
    }

    #[test]
    fn undecodable_item_is_dropped_not_requeued() {
        let dir = tempfile::tempdir().unwrap();
        let w = worker(dir.path());
        w.queue.push(b"not json").unwrap();
        let item = w.queue.try_take().unwrap().unwrap();
        w.process_one(item).unwrap();
        assert_eq!(w.queue.len().unwrap(), 0);
    }

    #[test]
    fn missing_node_update_requeues() {
        let dir = tempfile::tempdir().unwrap();
        let w = worker(dir.path());
        let envelope = json!({
            "action": "update", "type": "schema", "timestamp": 1, "version": "v1",
            "payload": {"node_id": "ghost", "properties": {}}
        });
        w.queue.push(&serde_json::to_vec(&envelope).unwrap()).unwrap();
        let item = w.queue.try_take().unwrap().unwrap();
        w.process_one(item).unwrap();
        // requeued, not acked: still present in the queue
        assert_eq!(w.queue.len().unwrap(), 1);
    }
}
