//! Durable at-least-once mutation queue.
//!
//! Backed by `redb`, an embedded, ordered, crash-safe store well suited to
//! this kind of FIFO list. Two tables hold opaque JSON-envelope bytes keyed
//! by a monotonic sequence number, so FIFO order is key order: `pending`
//! and `in_flight`. Moving an item between them is a single `redb` write
//! transaction, which is what gives `take`/`ack` their atomicity.
//!
//! Items are stored as raw bytes, not parsed structs: a malformed envelope
//! must still round-trip through the queue untouched so an operator can
//! inspect it later, and the queue itself never needs to understand the
//! envelope shape to move bytes between tables.

use chronomesh_base::{err, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::time::Duration;

const PENDING: TableDefinition<u64, &[u8]> = TableDefinition::new("pending");
const IN_FLIGHT: TableDefinition<u64, &[u8]> = TableDefinition::new("in_flight");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
const NEXT_SEQ_KEY: &str = "next_seq";

/// One envelope in the queue: its assigned sequence number plus the raw
/// JSON bytes it was pushed with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueItem {
    pub seq: u64,
    pub bytes: Vec<u8>,
}

pub struct Queue {
    db: Database,
}

impl Queue {
    /// Opens (creating if absent) the queue database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        {
            txn.open_table(PENDING)?;
            txn.open_table(IN_FLIGHT)?;
            txn.open_table(META)?;
        }
        txn.commit()?;
        Ok(Queue { db })
    }

    fn next_seq(&self, txn: &redb::WriteTransaction) -> Result<u64> {
        let mut meta = txn.open_table(META)?;
        let seq = meta.get(NEXT_SEQ_KEY)?.map(|v| v.value()).unwrap_or(0);
        meta.insert(NEXT_SEQ_KEY, seq + 1)?;
        Ok(seq)
    }

    /// `push`: appends `bytes` to the tail of the pending list. At-least-once
    /// durable once this returns — the write transaction has committed.
    pub fn push(&self, bytes: &[u8]) -> Result<u64> {
        let txn = self.db.begin_write()?;
        let seq = self.next_seq(&txn)?;
        {
            let mut pending = txn.open_table(PENDING)?;
            pending.insert(seq, bytes)?;
        }
        txn.commit()?;
        Ok(seq)
    }

    /// `take`: atomically moves the head of pending to the tail of
    /// in-flight and returns it, or `None` if pending is empty. Callers
    /// that want blocking semantics should poll this on
    /// [`Config::queue_poll_interval`](chronomesh_base::Config).
    pub fn try_take(&self) -> Result<Option<QueueItem>> {
        let txn = self.db.begin_write()?;
        let head = {
            let pending = txn.open_table(PENDING)?;
            pending.iter()?.next().transpose()?.map(|(k, v)| (k.value(), v.value().to_vec()))
        };
        let Some((seq, bytes)) = head else {
            txn.commit()?;
            return Ok(None);
        };
        {
            let mut pending = txn.open_table(PENDING)?;
            pending.remove(seq)?;
            let mut in_flight = txn.open_table(IN_FLIGHT)?;
            in_flight.insert(seq, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(Some(QueueItem { seq, bytes }))
    }

    /// Blocking `take`: polls [`Self::try_take`] with `poll_interval`
    /// backoff while pending is empty.
    pub fn take(&self, poll_interval: Duration) -> Result<QueueItem> {
        loop {
            if let Some(item) = self.try_take()? {
                return Ok(item);
            }
            std::thread::sleep(poll_interval);
        }
    }

    /// `ack`: removes one occurrence of `seq` from in-flight.
    pub fn ack(&self, seq: u64) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut in_flight = txn.open_table(IN_FLIGHT)?;
            in_flight.remove(seq)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// `requeue`: removes `seq` from in-flight and re-appends its bytes to
    /// the tail of pending under a fresh sequence number, so FIFO order is
    /// preserved (a requeued item goes to the back of the line, not back to
    /// its old position).
    pub fn requeue(&self, seq: u64) -> Result<()> {
        let txn = self.db.begin_write()?;
        let bytes = {
            let mut in_flight = txn.open_table(IN_FLIGHT)?;
            in_flight
                .remove(seq)?
                .map(|v| v.value().to_vec())
                .ok_or_else(|| err(format!("requeue: seq {seq} not in in-flight")))?
        };
        let new_seq = self.next_seq(&txn)?;
        {
            let mut pending = txn.open_table(PENDING)?;
            pending.insert(new_seq, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Startup recovery sweep: moves every item left in in-flight back to
    /// pending, in in-flight key order.
    /// Returns how many items were recovered.
    pub fn recover_in_flight(&self) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let items: Vec<(u64, Vec<u8>)> = {
            let in_flight = txn.open_table(IN_FLIGHT)?;
            in_flight
                .iter()?
                .map(|r| r.map(|(k, v)| (k.value(), v.value().to_vec())))
                .collect::<std::result::Result<_, _>>()?
        };
        {
            let mut in_flight = txn.open_table(IN_FLIGHT)?;
            let mut pending = txn.open_table(PENDING)?;
            for (seq, bytes) in &items {
                in_flight.remove(*seq)?;
                pending.insert(*seq, bytes.as_slice())?;
            }
        }
        txn.commit()?;
        if !items.is_empty() {
            tracing::info!(recovered = items.len(), "requeued in-flight items left over from a prior run");
        }
        Ok(items.len())
    }

    /// `length_by_version`: scans pending, grouping counts by the
    /// envelope's `version` field. Malformed (unparsable) items are
    /// skipped, not counted against any version.
    pub fn length_by_version(&self) -> Result<std::collections::BTreeMap<String, usize>> {
        let txn = self.db.begin_read()?;
        let pending = txn.open_table(PENDING)?;
        let mut counts = std::collections::BTreeMap::new();
        for row in pending.iter()? {
            let (_, v) = row?;
            if let Some(version) = extract_version(v.value()) {
                *counts.entry(version).or_insert(0usize) += 1;
            }
        }
        Ok(counts)
    }

    /// `truncate`: drops pending items matching `version`, or every
    /// parseable pending item if `version` is `None`. Malformed items that
    /// cannot be parsed to check a version match are always left in place
    /// when `version` is `Some`, so an operator can inspect them; a bare
    /// `truncate(None)` is an unconditional full wipe, malformed items
    /// included, since there's no version predicate left unresolved in
    /// that case.
    pub fn truncate(&self, version: Option<&str>) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let mut removed = 0usize;
        {
            let mut pending = txn.open_table(PENDING)?;
            let keys: Vec<u64> = pending.iter()?.map(|r| r.map(|(k, _)| k.value())).collect::<std::result::Result<_, _>>()?;
            for seq in keys {
                let should_remove = match version {
                    None => true,
                    Some(want) => {
                        let bytes = pending.get(seq)?.map(|v| v.value().to_vec());
                        matches!(bytes.as_deref().and_then(extract_version), Some(v) if v == want)
                    }
                };
                if should_remove {
                    pending.remove(seq)?;
                    removed += 1;
                }
            }
        }
        txn.commit()?;
        Ok(removed)
    }

    /// Total pending + in-flight length, for diagnostics.
    pub fn len(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let pending = txn.open_table(PENDING)?.len()? as usize;
        let in_flight = txn.open_table(IN_FLIGHT)?.len()? as usize;
        Ok(pending + in_flight)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn extract_version(bytes: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    value.get("version")?.as_str().map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(version: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({"action": "create", "version": version, "timestamp": 1})).unwrap()
    }

    #[test]
    fn push_then_take_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let q = Queue::open(dir.path().join("q.redb")).unwrap();
        let seq = q.push(&item("v1")).unwrap();
        let taken = q.try_take().unwrap().unwrap();
        assert_eq!(taken.seq, seq);
        assert_eq!(taken.bytes, item("v1"));
    }

    #[test]
    fn take_is_fifo_and_moves_to_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let q = Queue::open(dir.path().join("q.redb")).unwrap();
        q.push(&item("v1")).unwrap();
        q.push(&item("v2")).unwrap();
        let first = q.try_take().unwrap().unwrap();
        assert_eq!(first.bytes, item("v1"));
        assert_eq!(q.len().unwrap(), 2);
    }

    #[test]
    fn ack_removes_from_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let q = Queue::open(dir.path().join("q.redb")).unwrap();
        q.push(&item("v1")).unwrap();
        let taken = q.try_take().unwrap().unwrap();
        q.ack(taken.seq).unwrap();
        assert_eq!(q.len().unwrap(), 0);
    }

    #[test]
    fn requeue_moves_to_tail_of_pending() {
        let dir = tempfile::tempdir().unwrap();
        let q = Queue::open(dir.path().join("q.redb")).unwrap();
        q.push(&item("v1")).unwrap();
        q.push(&item("v2")).unwrap();
        let first = q.try_take().unwrap().unwrap();
        q.requeue(first.seq).unwrap();
        let next = q.try_take().unwrap().unwrap();
        assert_eq!(next.bytes, item("v2"));
        let after = q.try_take().unwrap().unwrap();
        assert_eq!(after.bytes, item("v1"));
    }

    #[test]
    fn recover_in_flight_restores_pending_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.redb");
        {
            let q = Queue::open(&path).unwrap();
            q.push(&item("v1")).unwrap();
            q.try_take().unwrap();
        }
        let q = Queue::open(&path).unwrap();
        let recovered = q.recover_in_flight().unwrap();
        assert_eq!(recovered, 1);
        assert!(q.try_take().unwrap().is_some());
    }

    #[test]
    fn length_by_version_skips_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let q = Queue::open(dir.path().join("q.redb")).unwrap();
        q.push(&item("v1")).unwrap();
        q.push(&item("v1")).unwrap();
        q.push(b"not json").unwrap();
        let counts = q.length_by_version().unwrap();
        assert_eq!(counts.get("v1"), Some(&2));
        assert_eq!(q.len().unwrap(), 3);
    }

    #[test]
    fn truncate_by_version_keeps_malformed_items() {
        let dir = tempfile::tempdir().unwrap();
        let q = Queue::open(dir.path().join("q.redb")).unwrap();
        q.push(&item("v1")).unwrap();
        q.push(&item("v2")).unwrap();
        q.push(b"not json").unwrap();
        let removed = q.truncate(Some("v1")).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(q.len().unwrap(), 2);
    }

    #[test]
    fn truncate_all_drops_everything() {
        let dir = tempfile::tempdir().unwrap();
        let q = Queue::open(dir.path().join("q.redb")).unwrap();
        q.push(&item("v1")).unwrap();
        q.push(b"not json").unwrap();
        let removed = q.truncate(None).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(q.len().unwrap(), 0);
    }
}
