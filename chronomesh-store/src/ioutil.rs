//! Atomic whole-file replacement: write a temp sibling, flush, `sync_all`,
//! then rename over the destination, so the file is trusted as durable
//! only after the rename succeeds. Readers of this store open the
//! destination path directly rather than sharing a live writer handle.

use chronomesh_base::Result;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes `bytes` to `path` such that a concurrent reader either sees the
/// old contents in full or the new contents in full, never a partial write.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("json")
    ));
    let mut file = File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads `path` whole, returning `None` if it doesn't exist — a missing
/// live file yields an empty graph, created lazily.
pub fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
