use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::RankWeights;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Registry rows
// ---------------------------------------------------------------------------

/// A registered file. Identity is the absolute normalized path; the id is
/// assigned on first registration and never reused, even after tombstoning.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub mime: Option<String>,
    pub content_hash: String,
    pub scanned_at: DateTime<Utc>,
    pub tombstoned: bool,
}

/// Per-file access history. Created lazily on the first access event;
/// `access_count >= 1` whenever the record exists.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityRecord {
    pub file_id: i64,
    pub first_seen: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u32,
}

// ---------------------------------------------------------------------------
// Operation results
// ---------------------------------------------------------------------------

/// Outcome counts for one scan of one root.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub tombstoned: usize,
    /// Per-file failures (unreadable, decode, extractor, embedder). These
    /// never abort the scan.
    pub failures: usize,
}

/// A scan that aborted partway. The counts accumulated before the abort are
/// preserved so adapters can surface them alongside the error.
#[derive(Debug, Clone)]
pub struct ScanFailure {
    pub error: Error,
    pub partial: ScanReport,
}

impl ScanFailure {
    pub fn new(error: Error, partial: ScanReport) -> Self {
        Self { error, partial }
    }
}

/// Summary returned by an activity log event.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LogSummary {
    pub access_count_after: u32,
    pub copairs_updated: usize,
}

/// The three ranking factors for one candidate, each in [0, 1].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RankFactors {
    pub semantic: f64,
    pub recency: f64,
    pub cooccurrence: f64,
}

/// One ranked recommendation.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub path: String,
    pub final_score: f64,
    pub factors: RankFactors,
    pub weights: RankWeights,
}

/// Snapshot of engine state for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub ok: bool,
    pub config_loaded: bool,
    pub n_files: usize,
    pub n_embedded: usize,
    pub index_dirty: bool,
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation signal threaded through every blocking operation.
/// Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns `Err(Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
