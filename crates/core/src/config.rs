//! Engine configuration — injected into every core constructor.
//!
//! Adapters own the config *file*; the core only ever sees this struct.

use std::collections::HashSet;
use std::path::PathBuf;

/// Weights applied to the three ranking factors. They need not sum to 1 and
/// are never re-normalized.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RankWeights {
    pub semantic: f64,
    pub recency: f64,
    pub cooccurrence: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self { semantic: 0.6, recency: 0.2, cooccurrence: 0.15 }
    }
}

/// Runtime configuration for the engine. Constructed by the adapter (from
/// config.yaml or CLI flags) and passed in whole; there is no global config.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the database file and the serialized vector index.
    pub data_dir: PathBuf,
    /// File extensions admitted by the scanner (lowercase, no dot).
    /// Empty set = admit every extension.
    pub allowed_extensions: HashSet<String>,
    /// Glob patterns excluded from scans (e.g. `**/node_modules/**`).
    pub ignore_globs: Vec<String>,
    /// Files larger than this are skipped by the scanner.
    pub max_file_bytes: u64,
    /// Snippet length stored per file and fed to the embedder.
    pub snippet_bytes: usize,
    /// Embedding dimensionality; must match the injected embedder.
    pub dim: usize,
    /// Number of snippets per embedder invocation.
    pub embed_batch: usize,
    /// Ranking weights.
    pub weights: RankWeights,
    /// Decay constant (days) for the modification-age recency term.
    pub modified_decay_days: f64,
    /// Decay constant (days) for the access-age recency term.
    pub accessed_decay_days: f64,
    /// Lookback window for co-occurrence pairing.
    pub cooccurrence_window_secs: u64,
    /// Store connection pool size.
    pub pool_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".filesense"),
            allowed_extensions: default_extensions(),
            ignore_globs: Vec::new(),
            max_file_bytes: 8 * 1024 * 1024,
            snippet_bytes: 8192,
            dim: 384,
            embed_batch: 32,
            weights: RankWeights::default(),
            modified_decay_days: 30.0,
            accessed_decay_days: 15.0,
            cooccurrence_window_secs: 300,
            pool_size: 4,
        }
    }
}

/// Extensions admitted when the config does not supply its own list.
fn default_extensions() -> HashSet<String> {
    [
        "txt", "md", "rst", "adoc", "rs", "py", "js", "ts", "go", "java", "c", "cpp", "h",
        "toml", "yaml", "yml", "json", "xml", "html", "css", "sh", "sql", "csv", "pdf", "docx",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
