//! Process configuration.
//!
//! A hand-rolled struct with environment-variable overrides rather than a
//! configuration-framework crate — a handful of environment variables with
//! explicit defaults is plenty for the knobs this engine actually has.

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the queue, store, and worker. Every default can be
/// overridden by an environment variable so operators never need a rebuild
/// to change them.
#[derive(Clone, Debug)]
pub struct Config {
    /// Root directory under which every version's store lives
    /// (`<root>/<version>/...`).
    pub store_root: PathBuf,
    /// Path to the `redb` database backing the durable queue.
    pub queue_db_path: PathBuf,
    /// How long `take()` sleeps between empty-queue polls.
    pub queue_poll_interval: Duration,
    /// Attempts for the edge-update "wait for missing endpoint" retry loop.
    pub edge_update_retries: u32,
    /// Backoff between edge-update retry attempts.
    pub edge_update_retry_backoff: Duration,
    /// Consecutive failures before an item is left in-flight as POISON.
    pub poison_after_failures: u32,
    /// Log a warning when a single item's processing exceeds this duration.
    pub slow_operation_warn_threshold: Duration,
    /// Log bulk-apply progress every N sub-items.
    pub bulk_progress_log_every: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store_root: PathBuf::from("./data/versions"),
            queue_db_path: PathBuf::from("./data/queue.redb"),
            queue_poll_interval: Duration::from_millis(10),
            edge_update_retries: 3,
            edge_update_retry_backoff: Duration::from_millis(100),
            poison_after_failures: 3,
            slow_operation_warn_threshold: Duration::from_secs(5),
            bulk_progress_log_every: 100,
        }
    }
}

impl Config {
    /// Loads overrides from environment variables on top of [`Config::default`].
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("CHRONOMESH_STORE_ROOT") {
            cfg.store_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CHRONOMESH_QUEUE_DB_PATH") {
            cfg.queue_db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CHRONOMESH_QUEUE_POLL_MS") {
            if let Ok(ms) = v.parse() {
                cfg.queue_poll_interval = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("CHRONOMESH_EDGE_UPDATE_RETRIES") {
            if let Ok(n) = v.parse() {
                cfg.edge_update_retries = n;
            }
        }
        if let Ok(v) = std::env::var("CHRONOMESH_POISON_AFTER_FAILURES") {
            if let Ok(n) = v.parse() {
                cfg.poison_after_failures = n;
            }
        }
        if let Ok(v) = std::env::var("CHRONOMESH_BULK_PROGRESS_LOG_EVERY") {
            if let Ok(n) = v.parse() {
                cfg.bulk_progress_log_every = n;
            }
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.edge_update_retries, 3);
        assert_eq!(cfg.edge_update_retry_backoff, Duration::from_millis(100));
        assert_eq!(cfg.slow_operation_warn_threshold, Duration::from_secs(5));
    }
}
