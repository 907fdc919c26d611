//! Processing monitor: a small process-local registry of which timestamp
//! each version is currently applying, for observability. Keyed by
//! [`VersionId`] rather than a single global value, since versions advance
//! independently of one another.

use chronomesh_base::VersionId;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

struct ProcessingEntry {
    timestamp: i64,
    started_at: Instant,
}

/// A point-in-time copy of one version's processing entry, safe to hand to
/// an external collaborator (the HTTP surface) without holding the mutex.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessingSnapshot {
    pub version: VersionId,
    pub timestamp: i64,
    pub processing_duration_ms: u128,
}

#[derive(Default)]
pub struct ProcessingMonitor {
    entries: Mutex<HashMap<VersionId, ProcessingEntry>>,
}

impl ProcessingMonitor {
    pub fn new() -> Self {
        ProcessingMonitor::default()
    }

    /// Registers `version` as currently processing `timestamp`. Called
    /// right after the worker takes the version lock.
    pub fn begin(&self, version: VersionId, timestamp: i64) {
        let mut entries = self.entries.lock().expect("processing monitor mutex poisoned");
        entries.insert(
            version,
            ProcessingEntry {
                timestamp,
                started_at: Instant::now(),
            },
        );
    }

    /// Clears `version`'s entry. Called on every worker exit path — success
    /// or failure.
    pub fn end(&self, version: &VersionId) {
        let mut entries = self.entries.lock().expect("processing monitor mutex poisoned");
        entries.remove(version);
    }

    /// A snapshot copy of every version currently processing, each with a
    /// computed `processing_duration_ms`.
    pub fn snapshot(&self) -> Vec<ProcessingSnapshot> {
        let entries = self.entries.lock().expect("processing monitor mutex poisoned");
        entries
            .iter()
            .map(|(version, entry)| ProcessingSnapshot {
                version: version.clone(),
                timestamp: entry.timestamp,
                processing_duration_ms: entry.started_at.elapsed().as_millis(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_then_snapshot_reports_entry() {
        let monitor = ProcessingMonitor::new();
        let version = VersionId("v1".into());
        monitor.begin(version.clone(), 42);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].version, version);
        assert_eq!(snapshot[0].timestamp, 42);
    }

    #[test]
    fn end_clears_entry() {
        let monitor = ProcessingMonitor::new();
        let version = VersionId("v1".into());
        monitor.begin(version.clone(), 1);
        monitor.end(&version);
        assert!(monitor.snapshot().is_empty());
    }

    #[test]
    fn entries_are_keyed_per_version() {
        let monitor = ProcessingMonitor::new();
        monitor.begin(VersionId("v1".into()), 1);
        monitor.begin(VersionId("v2".into()), 2);
        let mut snapshot = monitor.snapshot();
        snapshot.sort_by(|a, b| a.version.0.cmp(&b.version.0));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].timestamp, 1);
        assert_eq!(snapshot[1].timestamp, 2);
    }
}
