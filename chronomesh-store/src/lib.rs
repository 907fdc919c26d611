//! Per-version on-disk store.
//!
//! ```text
//! <root>/<version>/
//!   live_schema.json
//!   live_state.json
//!   schema_archive/<ts>.json   (compressed codec)
//!   state_archive/<ts>.json    (compressed codec)
//!   lock
//! ```

mod ioutil;
mod lock;

pub use lock::VersionLock;

use chronomesh_base::{Result, VersionId};
use chronomesh_codec::{CompressedGraph, NodeLinkDocument};
use std::path::{Path, PathBuf};

pub struct VersionStore {
    root: PathBuf,
}

impl VersionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        VersionStore { root: root.into() }
    }

    pub fn version_root(&self, version: &VersionId) -> PathBuf {
        self.root.join(&version.0)
    }

    fn live_schema_path(&self, version: &VersionId) -> PathBuf {
        self.version_root(version).join("live_schema.json")
    }

    fn live_state_path(&self, version: &VersionId) -> PathBuf {
        self.version_root(version).join("live_state.json")
    }

    fn schema_archive_path(&self, version: &VersionId, ts: i64) -> PathBuf {
        self.version_root(version).join("schema_archive").join(format!("{ts}.json"))
    }

    fn state_archive_path(&self, version: &VersionId, ts: i64) -> PathBuf {
        self.version_root(version).join("state_archive").join(format!("{ts}.json"))
    }

    fn lock_path(&self, version: &VersionId) -> PathBuf {
        self.version_root(version).join("lock")
    }

    /// Acquires the exclusive per-version lock. The worker acquires it
    /// before load, holds it through reconcile and persist, and releases
    /// it guaranteed on any exit path.
    pub fn lock(&self, version: &VersionId) -> Result<VersionLock> {
        VersionLock::acquire(&self.lock_path(version))
    }

    /// Reads the live schema document, or an empty one if the file doesn't
    /// exist yet — missing live files yield an empty graph, created lazily.
    /// Lock-free — readers may observe any legal past-write state.
    pub fn read_live_schema(&self, version: &VersionId) -> Result<NodeLinkDocument> {
        read_document(&self.live_schema_path(version))
    }

    pub fn read_live_state(&self, version: &VersionId) -> Result<NodeLinkDocument> {
        read_document(&self.live_state_path(version))
    }

    pub fn write_live_schema(&self, version: &VersionId, doc: &NodeLinkDocument) -> Result<()> {
        ioutil::atomic_write(&self.live_schema_path(version), &chronomesh_codec::encode_document(doc)?)
    }

    pub fn write_live_state(&self, version: &VersionId, doc: &NodeLinkDocument) -> Result<()> {
        ioutil::atomic_write(&self.live_state_path(version), &chronomesh_codec::encode_document(doc)?)
    }

    /// Persists a compressed snapshot for `ts`.
    pub fn write_schema_archive(&self, version: &VersionId, ts: i64, graph: &CompressedGraph) -> Result<()> {
        ioutil::atomic_write(&self.schema_archive_path(version, ts), &chronomesh_codec::encode_compressed(graph)?)
    }

    pub fn write_state_archive(&self, version: &VersionId, ts: i64, graph: &CompressedGraph) -> Result<()> {
        ioutil::atomic_write(&self.state_archive_path(version, ts), &chronomesh_codec::encode_compressed(graph)?)
    }

    pub fn read_schema_archive(&self, version: &VersionId, ts: i64) -> Result<Option<CompressedGraph>> {
        read_compressed(&self.schema_archive_path(version, ts))
    }

    pub fn read_state_archive(&self, version: &VersionId, ts: i64) -> Result<Option<CompressedGraph>> {
        read_compressed(&self.state_archive_path(version, ts))
    }

    /// Lists archived timestamps for a version, ascending — a linearisation
    /// of the applied mutation sequence when read in this order.
    pub fn list_archive_timestamps(&self, version: &VersionId) -> Result<Vec<i64>> {
        list_timestamps(&self.version_root(version).join("schema_archive"))
    }

    pub fn list_versions(&self) -> Result<Vec<VersionId>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    versions.push(VersionId(name.to_string()));
                }
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Removes every sub-path of a version's store: best effort per
    /// sub-path so one failure doesn't block the others.
    pub fn delete_version(&self, version: &VersionId) -> Result<()> {
        let root = self.version_root(version);
        for sub in ["live_schema.json", "live_state.json", "schema_archive", "state_archive", "lock"] {
            let path = root.join(sub);
            let outcome = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(e) = outcome {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "delete_version: sub-path removal failed");
                }
            }
        }
        let _ = std::fs::remove_dir(&root);
        Ok(())
    }
}

fn read_document(path: &Path) -> Result<NodeLinkDocument> {
    match ioutil::read_if_exists(path)? {
        Some(bytes) => chronomesh_codec::decode_document(&bytes),
        None => Ok(NodeLinkDocument::default()),
    }
}

fn read_compressed(path: &Path) -> Result<Option<CompressedGraph>> {
    match ioutil::read_if_exists(path)? {
        Some(bytes) => Ok(Some(chronomesh_codec::decode_compressed(&bytes)?)),
        None => Ok(None),
    }
}

fn list_timestamps(dir: &Path) -> Result<Vec<i64>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut timestamps = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".json") {
            if let Ok(ts) = stem.parse::<i64>() {
                timestamps.push(ts);
            }
        }
    }
    timestamps.sort();
    Ok(timestamps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronomesh_codec::{compress, NodeDoc};
    use std::collections::BTreeMap;

    fn sample_doc() -> NodeLinkDocument {
        NodeLinkDocument {
            directed: true,
            multigraph: false,
            graph: serde_json::json!({}),
            nodes: vec![NodeDoc {
                node_id: "A".into(),
                node_type: "Parts".into(),
                properties: BTreeMap::new(),
            }],
            links: vec![],
        }
    }

    #[test]
    fn missing_live_file_reads_as_empty_graph() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        let version = VersionId("v1".into());
        let doc = store.read_live_schema(&version).unwrap();
        assert!(doc.nodes.is_empty());
    }

    #[test]
    fn live_schema_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        let version = VersionId("v1".into());
        let doc = sample_doc();
        store.write_live_schema(&version, &doc).unwrap();
        let read_back = store.read_live_schema(&version).unwrap();
        assert_eq!(read_back, doc);
    }

    #[test]
    fn archive_round_trips_and_lists_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        let version = VersionId("v1".into());
        let compressed = compress(&sample_doc());
        store.write_schema_archive(&version, 10, &compressed).unwrap();
        store.write_schema_archive(&version, 5, &compressed).unwrap();
        assert_eq!(store.list_archive_timestamps(&version).unwrap(), vec![5, 10]);
        let read_back = store.read_schema_archive(&version, 10).unwrap().unwrap();
        assert_eq!(read_back, compressed);
    }

    #[test]
    fn delete_version_removes_all_subpaths() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        let version = VersionId("v1".into());
        store.write_live_schema(&version, &sample_doc()).unwrap();
        store.write_schema_archive(&version, 1, &compress(&sample_doc())).unwrap();
        let _lock = store.lock(&version).unwrap();
        drop(_lock);
        store.delete_version(&version).unwrap();
        assert!(!store.version_root(&version).exists());
    }

    #[test]
    fn lock_is_per_version_not_global() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        let v1 = VersionId("v1".into());
        let v2 = VersionId("v2".into());
        let _l1 = store.lock(&v1).unwrap();
        // A lock on a different version must not block.
        let _l2 = store.lock(&v2).unwrap();
    }
}
