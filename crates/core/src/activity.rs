//! Access recording and co-occurrence accumulation.
//!
//! Every logged access pairs the file with the set of *other* files accessed
//! within the lookback window ending at the new event. The window read
//! happens before the file's own record is touched, so an access never pairs
//! with itself, and a burst of N distinct files yields N·(N−1)/2 increments
//! spread across the burst rather than all at the last event.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::LogSummary;

/// Shard count for the per-file-id critical sections. Accesses to the same id
/// serialize; accesses to different ids only contend on hash collisions.
const LOCK_SHARDS: usize = 256;

pub struct Activity {
    store: Arc<Store>,
    window: Duration,
    shards: Vec<Mutex<()>>,
}

impl Activity {
    pub fn new(store: Arc<Store>, window_secs: u64) -> Self {
        Self {
            store,
            window: Duration::seconds(window_secs as i64),
            shards: (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Record an access to `path` at `now` and pair it with every other file
    /// accessed inside the window. Fails with `not_found` for paths the store
    /// has never registered.
    pub fn log(&self, path: &str, now: DateTime<Utc>) -> Result<LogSummary> {
        let file = self
            .store
            .get_file_by_path(path)?
            .ok_or_else(|| Error::NotFound(format!("path not indexed: {path}")))?;
        self.log_id(file.id, now)
    }

    /// Same as [`log`](Self::log), keyed by id. Used by the ranker's
    /// self-access step after it has already resolved the query file.
    pub fn log_id(&self, id: i64, now: DateTime<Utc>) -> Result<LogSummary> {
        let shard = &self.shards[(id as u64 as usize) % LOCK_SHARDS];
        let _guard = shard.lock().unwrap();

        // Window read strictly before the file's own update: an access at the
        // same instant must not self-pair.
        let window_set = self.store.accessed_since(id, now - self.window)?;
        let (_prior, access_count_after) = self.store.record_access(id, now)?;

        for other in &window_set {
            self.store.bump_copair(id, *other)?;
        }

        if !window_set.is_empty() {
            debug!(id, pairs = window_set.len(), "Co-occurrence pairs updated");
        }
        Ok(LogSummary { access_count_after, copairs_updated: window_set.len() })
    }
}
