//! `config.yaml` loader. The file is optional; every field has a default, so
//! a bare `filesense` in an empty directory just works.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use filesense_core::{EngineConfig, RankWeights};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory for the database and the serialized vector index.
    pub data_dir: PathBuf,
    /// Roots scanned at startup (and rescannable via the API).
    pub scan_roots: Vec<PathBuf>,
    /// Admitted extensions; empty = the engine's defaults.
    pub allowed_extensions: Vec<String>,
    /// Glob patterns excluded from scans.
    pub ignore: Vec<String>,
    pub max_file_bytes: u64,
    pub snippet_bytes: usize,
    pub embedding: EmbeddingConfig,
    pub weights: WeightsConfig,
    pub recency: RecencyConfig,
    pub cooccurrence_window_secs: u64,
    pub pool_size: u32,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// HuggingFace model id for the static embedding model.
    pub model: String,
    /// Vector dimensionality of that model.
    pub dim: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeightsConfig {
    pub semantic: f64,
    pub recency: f64,
    pub cooccurrence: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecencyConfig {
    pub modified_decay_days: f64,
    pub accessed_decay_days: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".filesense"),
            scan_roots: Vec::new(),
            allowed_extensions: Vec::new(),
            ignore: Vec::new(),
            max_file_bytes: 8 * 1024 * 1024,
            snippet_bytes: 8192,
            embedding: EmbeddingConfig::default(),
            weights: WeightsConfig::default(),
            recency: RecencyConfig::default(),
            cooccurrence_window_secs: 300,
            pool_size: 4,
            port: 8470,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { model: "minishlab/potion-base-8M".to_string(), dim: 256 }
    }
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self { semantic: 0.6, recency: 0.2, cooccurrence: 0.15 }
    }
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self { modified_decay_days: 30.0, accessed_decay_days: 15.0 }
    }
}

/// Load config from `path`, falling back to defaults when the file is absent.
pub fn load(path: &Path) -> anyhow::Result<ServerConfig> {
    if !path.exists() {
        info!(path = %path.display(), "No config file, using defaults");
        return Ok(ServerConfig::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: ServerConfig =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    info!(path = %path.display(), roots = config.scan_roots.len(), "Config loaded");
    Ok(config)
}

impl ServerConfig {
    /// Project this file-level config onto the core's injected config struct.
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        let allowed_extensions: HashSet<String> = if self.allowed_extensions.is_empty() {
            defaults.allowed_extensions
        } else {
            self.allowed_extensions.iter().map(|e| e.to_ascii_lowercase()).collect()
        };
        EngineConfig {
            data_dir: self.data_dir.clone(),
            allowed_extensions,
            ignore_globs: self.ignore.clone(),
            max_file_bytes: self.max_file_bytes,
            snippet_bytes: self.snippet_bytes,
            dim: self.embedding.dim,
            embed_batch: defaults.embed_batch,
            weights: RankWeights {
                semantic: self.weights.semantic,
                recency: self.weights.recency,
                cooccurrence: self.weights.cooccurrence,
            },
            modified_decay_days: self.recency.modified_decay_days,
            accessed_decay_days: self.recency.accessed_decay_days,
            cooccurrence_window_secs: self.cooccurrence_window_secs,
            pool_size: self.pool_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load(&dir.path().join("config.yaml")).unwrap();
        assert_eq!(config.snippet_bytes, 8192);
        assert_eq!(config.cooccurrence_window_secs, 300);
        assert_eq!(config.embedding.dim, 256);
    }

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let yaml = "
data_dir: /tmp/fs-data
scan_roots:
  - /home/me/notes
weights:
  semantic: 0.8
cooccurrence_window_secs: 120
";
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/fs-data"));
        assert_eq!(config.scan_roots.len(), 1);
        assert_eq!(config.weights.semantic, 0.8);
        // Unnamed weights keep their defaults.
        assert_eq!(config.weights.recency, 0.2);
        assert_eq!(config.cooccurrence_window_secs, 120);

        let engine = config.engine_config();
        assert_eq!(engine.weights.semantic, 0.8);
        assert_eq!(engine.cooccurrence_window_secs, 120);
        assert!(!engine.allowed_extensions.is_empty(), "defaults fill the allow-list");
    }
}
