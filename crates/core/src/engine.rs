//! Engine facade: wires the store, scanner, index, activity service, and
//! ranker over one injected configuration and exposes the core API that
//! adapters (HTTP, CLI) forward.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::activity::Activity;
use crate::config::EngineConfig;
use crate::embed::Embedder;
use crate::error::Result;
use crate::extract::TextExtractor;
use crate::index::VectorIndex;
use crate::rank::Ranker;
use crate::scan::Scanner;
use crate::store::Store;
use crate::types::{CancelToken, Health, LogSummary, Recommendation, ScanFailure, ScanReport};

pub struct Engine {
    store: Arc<Store>,
    scanner: Scanner,
    index: Arc<VectorIndex>,
    activity: Arc<Activity>,
    ranker: Ranker,
}

impl Engine {
    /// Build an engine over `config` with injected extraction and embedding
    /// capabilities. Opens (or creates) the store and loads any persisted
    /// index snapshot from the data directory.
    pub fn new(
        config: EngineConfig,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let store = Arc::new(Store::open(&config.data_dir, config.pool_size)?);
        let index = Arc::new(VectorIndex::open(&config.data_dir, config.dim));
        let activity = Arc::new(Activity::new(store.clone(), config.cooccurrence_window_secs));
        let ranker = Ranker::new(store.clone(), index.clone(), activity.clone(), &config);
        let scanner = Scanner::new(store.clone(), extractor, embedder, config.clone());

        let (n_files, n_embedded) = store.counts()?;
        info!(n_files, n_embedded, data_dir = %config.data_dir.display(), "Engine ready");
        Ok(Self { store, scanner, index, activity, ranker })
    }

    /// Reconcile one root with the store. See [`Scanner::scan`].
    pub fn scan(
        &self,
        root: &Path,
        cancel: &CancelToken,
    ) -> std::result::Result<ScanReport, ScanFailure> {
        self.scanner.scan(root, cancel)
    }

    /// Ranked recommendations for a query path.
    pub fn recommend(&self, path: &str, k: usize) -> Result<Vec<Recommendation>> {
        self.ranker.recommend(path, k, Utc::now())
    }

    /// [`recommend`](Self::recommend) with an explicit evaluation time.
    pub fn recommend_at(
        &self,
        path: &str,
        k: usize,
        now: chrono::DateTime<Utc>,
    ) -> Result<Vec<Recommendation>> {
        self.ranker.recommend(path, k, now)
    }

    /// Record an access event for a path.
    pub fn log_activity(&self, path: &str) -> Result<LogSummary> {
        self.activity.log(path, Utc::now())
    }

    /// [`log_activity`](Self::log_activity) with an explicit event time.
    pub fn log_activity_at(&self, path: &str, now: chrono::DateTime<Utc>) -> Result<LogSummary> {
        self.activity.log(path, now)
    }

    /// Engine state snapshot for the health endpoint.
    pub fn health(&self) -> Result<Health> {
        let (n_files, n_embedded) = self.store.counts()?;
        Ok(Health {
            ok: true,
            config_loaded: true,
            n_files,
            n_embedded,
            index_dirty: self.index.is_dirty(&self.store)?,
        })
    }

    /// Shared store handle, for adapters that surface registry state.
    pub fn store(&self) -> &Store {
        &self.store
    }
}
