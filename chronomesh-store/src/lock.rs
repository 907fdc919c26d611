//! Per-version advisory exclusive lock: one `lock` file per version root,
//! never one lock for all versions, so a future multi-worker deployment
//! could run one worker per version without contention across versions.

use chronomesh_base::Result;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Holds the OS advisory lock on a version's `lock` file for as long as it
/// lives. Dropping it releases the lock — callers acquire it right before
/// load and let it fall out of scope after persist, guaranteeing release on
/// every exit path including early returns via `?`.
pub struct VersionLock {
    file: File,
    path: PathBuf,
}

impl VersionLock {
    /// Blocks until the exclusive lock on `path` is granted.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).write(true).open(path)?;
        file.lock_exclusive()?;
        Ok(VersionLock {
            file,
            path: path.to_owned(),
        })
    }
}

impl Drop for VersionLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release version lock");
        }
    }
}
