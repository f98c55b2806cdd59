//! Filesystem reconciliation: walks roots, detects content changes by hash,
//! and keeps the store (registry, snippets, embeddings) in sync.
//!
//! Change detection is two-phase. A cheap `(size, mtime)` pre-screen skips
//! files whose metadata is untouched; only candidates that fail it are read
//! and SHA-256 hashed, and only hash deltas trigger extraction + embedding.
//! Traversal is sorted lexicographically so two scans of an unchanged tree
//! produce identical reports.

use chrono::{DateTime, Utc};
use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::embed::{l2_normalize, Embedder};
use crate::error::{Error, Result};
use crate::extract::{Extracted, TextExtractor};
use crate::store::Store;
use crate::types::{CancelToken, ScanFailure, ScanReport};

/// A file that passed the admissibility filters during the walk.
struct Candidate {
    abs_path: PathBuf,
    path: String,
    size: u64,
    mtime: DateTime<Utc>,
}

/// A candidate that failed the metadata pre-screen and has been hashed.
struct Hashed {
    candidate: Candidate,
    hash: String,
    old_hash: Option<String>,
    is_new: bool,
    was_tombstoned: bool,
}

/// Coalescing point for concurrent scans of the same root. The first caller
/// runs the scan; later callers block here and receive the same outcome.
struct ScanGate {
    outcome: Mutex<Option<std::result::Result<ScanReport, ScanFailure>>>,
    done: Condvar,
}

pub struct Scanner {
    store: Arc<Store>,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    config: EngineConfig,
    inflight: Mutex<HashMap<PathBuf, Arc<ScanGate>>>,
}

impl Scanner {
    pub fn new(
        store: Arc<Store>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        config: EngineConfig,
    ) -> Self {
        Self { store, extractor, embedder, config, inflight: Mutex::new(HashMap::new()) }
    }

    /// Reconcile one root with the store. Per-file failures are counted in
    /// the report; only an unreadable root, a bad ignore glob, a store
    /// failure, or cancellation abort, and the abort still carries the
    /// partial report.
    pub fn scan(
        &self,
        root: &Path,
        cancel: &CancelToken,
    ) -> std::result::Result<ScanReport, ScanFailure> {
        let root = match std::fs::canonicalize(root) {
            Ok(r) => r,
            Err(e) => {
                let err = Error::Io(format!("cannot open scan root {}: {e}", root.display()));
                return Err(ScanFailure::new(err, ScanReport::default()));
            }
        };

        // Same-root coalescing: join an in-flight scan instead of racing it.
        let gate = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(&root) {
                Some(gate) => {
                    let gate = gate.clone();
                    drop(inflight);
                    let mut outcome = gate.outcome.lock().unwrap();
                    while outcome.is_none() {
                        outcome = gate.done.wait(outcome).unwrap();
                    }
                    return outcome.clone().unwrap();
                }
                None => {
                    let gate = Arc::new(ScanGate {
                        outcome: Mutex::new(None),
                        done: Condvar::new(),
                    });
                    inflight.insert(root.clone(), gate.clone());
                    gate
                }
            }
        };

        let mut report = ScanReport::default();
        let outcome = match self.scan_root(&root, cancel, &mut report) {
            Ok(()) => Ok(report),
            Err(e) => Err(ScanFailure::new(e, report)),
        };

        *gate.outcome.lock().unwrap() = Some(outcome.clone());
        gate.done.notify_all();
        self.inflight.lock().unwrap().remove(&root);
        outcome
    }

    fn scan_root(&self, root: &Path, cancel: &CancelToken, report: &mut ScanReport) -> Result<()> {
        let candidates = self.walk(root, cancel, report)?;
        let seen: HashSet<String> = candidates.iter().map(|c| c.path.clone()).collect();

        // Metadata pre-screen: untouched (size, mtime) means untouched bytes.
        let mut to_hash = Vec::new();
        for candidate in candidates {
            cancel.check()?;
            match self.store.get_file_by_path(&candidate.path)? {
                Some(record)
                    if !record.tombstoned
                        && record.size == candidate.size
                        && record.mtime.timestamp_millis()
                            == candidate.mtime.timestamp_millis() =>
                {
                    report.unchanged += 1;
                }
                Some(record) => to_hash.push((candidate, Some(record))),
                None => to_hash.push((candidate, None)),
            }
        }

        cancel.check()?;
        let hashed: Vec<std::result::Result<Hashed, ()>> = to_hash
            .into_par_iter()
            .map(|(candidate, record)| match hash_file(&candidate.abs_path) {
                Ok(hash) => Ok(Hashed {
                    hash,
                    old_hash: record.as_ref().map(|r| r.content_hash.clone()),
                    is_new: record.is_none(),
                    was_tombstoned: record.as_ref().is_some_and(|r| r.tombstoned),
                    candidate,
                }),
                Err(e) => {
                    warn!(path = %candidate.abs_path.display(), error = %e, "Failed to hash file");
                    Err(())
                }
            })
            .collect();

        let mut embed_queue: Vec<(i64, String)> = Vec::new();
        let mut mutated = 0usize;
        for item in hashed {
            cancel.check()?;
            let h = match item {
                Ok(h) => h,
                Err(()) => {
                    report.failures += 1;
                    continue;
                }
            };

            let content_changed = h.old_hash.as_deref() != Some(h.hash.as_str());
            // Revived tombstones lost their content row and need it rebuilt
            // even when the bytes on disk never changed.
            let needs_content = content_changed || h.was_tombstoned;
            let extracted = if needs_content {
                match self.extractor.extract(&h.candidate.abs_path, self.config.snippet_bytes) {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(path = h.candidate.path.as_str(), error = %e, "Extractor failed");
                        report.failures += 1;
                        Extracted::default()
                    }
                }
            } else {
                Extracted::default()
            };

            let (id, changed) = self.store.upsert_file(
                &h.candidate.path,
                h.candidate.size,
                h.candidate.mtime,
                extracted.mime.as_deref(),
                &h.hash,
            )?;

            if h.is_new || h.was_tombstoned {
                report.added += 1;
                mutated += 1;
            } else if changed {
                report.updated += 1;
                mutated += 1;
            } else {
                // Hash matched after all: an mtime-only touch.
                report.unchanged += 1;
            }

            if needs_content {
                let snippet = extracted
                    .text
                    .map(|t| truncate_utf8(&t, self.config.snippet_bytes))
                    .unwrap_or_default();
                if snippet.is_empty() {
                    self.store.put_content(id, "", None)?;
                } else {
                    embed_queue.push((id, snippet));
                }
            }
        }

        self.embed_batches(embed_queue, cancel, report)?;

        // Tombstone sweep: every live file under this root we did not see.
        let prefix = format!("{}{}", root.to_string_lossy(), std::path::MAIN_SEPARATOR);
        for (id, path) in self.store.live_files_under(&prefix)? {
            cancel.check()?;
            if !seen.contains(&path) {
                self.store.tombstone(id)?;
                report.tombstoned += 1;
                mutated += 1;
            }
        }

        if mutated > 0 {
            self.store.bump_scan_epoch()?;
        }

        info!(
            root = %root.display(),
            added = report.added,
            updated = report.updated,
            unchanged = report.unchanged,
            tombstoned = report.tombstoned,
            failures = report.failures,
            "Scan complete"
        );
        Ok(())
    }

    /// Sorted walk of `root`, applying the extension allow-list, the size
    /// ceiling, and the configured ignore globs.
    fn walk(
        &self,
        root: &Path,
        cancel: &CancelToken,
        report: &mut ScanReport,
    ) -> Result<Vec<Candidate>> {
        let mut overrides = OverrideBuilder::new(root);
        for glob in &self.config.ignore_globs {
            overrides
                .add(&format!("!{glob}"))
                .map_err(|e| Error::InvalidInput(format!("bad ignore glob {glob:?}: {e}")))?;
        }
        let overrides = overrides
            .build()
            .map_err(|e| Error::InvalidInput(format!("bad ignore globs: {e}")))?;

        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .follow_links(false)
            .overrides(overrides)
            .sort_by_file_path(|a, b| a.cmp(b))
            .build();

        let mut candidates = Vec::new();
        for entry in walker {
            cancel.check()?;
            let entry = match entry {
                Ok(e) => e,
                Err(_) => {
                    report.failures += 1;
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let abs_path = entry.into_path();
            if !self.config.allowed_extensions.is_empty() {
                let ext = abs_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_ascii_lowercase())
                    .unwrap_or_default();
                if !self.config.allowed_extensions.contains(&ext) {
                    continue;
                }
            }

            let meta = match std::fs::metadata(&abs_path) {
                Ok(m) => m,
                Err(_) => {
                    report.failures += 1;
                    continue;
                }
            };
            if meta.len() > self.config.max_file_bytes {
                continue;
            }
            let mtime: DateTime<Utc> = match meta.modified() {
                Ok(t) => t.into(),
                Err(_) => {
                    report.failures += 1;
                    continue;
                }
            };

            candidates.push(Candidate {
                path: abs_path.to_string_lossy().into_owned(),
                abs_path,
                size: meta.len(),
                mtime,
            });
        }
        Ok(candidates)
    }

    /// Embed queued snippets in fixed-size batches and store the content
    /// rows. An embedder failure costs that batch its embeddings (snippets
    /// are still stored) and counts one failure per file.
    fn embed_batches(
        &self,
        queue: Vec<(i64, String)>,
        cancel: &CancelToken,
        report: &mut ScanReport,
    ) -> Result<()> {
        for batch in queue.chunks(self.config.embed_batch.max(1)) {
            cancel.check()?;
            let texts: Vec<String> = batch.iter().map(|(_, s)| s.clone()).collect();
            match self.embedder.embed(&texts) {
                Ok(vectors) if vectors.len() == batch.len() => {
                    for ((id, snippet), mut vector) in batch.iter().zip(vectors) {
                        if vector.len() != self.config.dim {
                            warn!(id, got = vector.len(), want = self.config.dim,
                                  "Embedder returned wrong dimension");
                            report.failures += 1;
                            self.store.put_content(*id, snippet, None)?;
                            continue;
                        }
                        l2_normalize(&mut vector);
                        self.store.put_content(*id, snippet, Some(&vector))?;
                    }
                }
                Ok(vectors) => {
                    warn!(got = vectors.len(), want = batch.len(),
                          "Embedder returned wrong batch size");
                    report.failures += batch.len();
                    for (id, snippet) in batch {
                        self.store.put_content(*id, snippet, None)?;
                    }
                }
                Err(e) => {
                    warn!(error = %e, files = batch.len(), "Embedder batch failed");
                    report.failures += batch.len();
                    for (id, snippet) in batch {
                        self.store.put_content(*id, snippet, None)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// SHA-256 of the whole file, hex-encoded. Streams in 64 KiB chunks.
fn hash_file(path: &Path) -> std::io::Result<String> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Truncate to at most `max_bytes`, backing off to a char boundary.
fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
