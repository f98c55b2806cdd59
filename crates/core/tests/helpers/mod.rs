//! Shared fixtures for integration tests: a deterministic stub embedder, a
//! plain-text extractor, and an engine builder over a temp data dir.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use filesense_core::{
    Embedder, Engine, EngineConfig, Error, Extracted, Result, TextExtractor,
};

/// Deterministic bag-of-words embedder. Each distinct token is assigned its
/// own dimension (wrapping past `dim`), so texts sharing tokens overlap and
/// disjoint texts are orthogonal: enough structure to exercise the ranking
/// math without a model.
pub struct StubEmbedder {
    dim: usize,
    slots: Mutex<HashMap<String, usize>>,
}

impl StubEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim, slots: Mutex::new(HashMap::new()) }
    }
}

impl Embedder for StubEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut slots = self.slots.lock().unwrap();
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0_f32; self.dim];
                for token in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                    .map(|t| t.to_lowercase())
                {
                    let next = slots.len() % self.dim;
                    let slot = *slots.entry(token).or_insert(next);
                    v[slot] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// An embedder that always fails, for exercising scan failure accounting.
pub struct FailingEmbedder {
    pub dim: usize,
}

impl Embedder for FailingEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::Embedder("model unavailable".into()))
    }
}

/// Reads files as UTF-8 text; anything containing a NUL byte is non-textual.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path, max_bytes: usize) -> Result<Extracted> {
        let bytes = std::fs::read(path).map_err(|e| Error::Io(e.to_string()))?;
        if bytes.contains(&0) {
            return Ok(Extracted { mime: Some("application/octet-stream".into()), text: None });
        }
        let end = bytes.len().min(max_bytes);
        let text = String::from_utf8_lossy(&bytes[..end]).into_owned();
        Ok(Extracted { mime: Some("text/plain".into()), text: Some(text) })
    }
}

pub const TEST_DIM: usize = 64;

/// Engine over a fresh store in `data_dir`, scanning only `.txt` files.
pub fn test_engine(data_dir: &Path) -> Engine {
    test_engine_with(data_dir, EngineConfig::default())
}

pub fn test_engine_with(data_dir: &Path, mut config: EngineConfig) -> Engine {
    config.data_dir = data_dir.to_path_buf();
    config.dim = TEST_DIM;
    config.allowed_extensions = ["txt".to_string()].into_iter().collect();
    Engine::new(
        config,
        Arc::new(PlainTextExtractor),
        Arc::new(StubEmbedder::new(TEST_DIM)),
    )
    .expect("engine should open")
}

/// Write `files` as `(name, contents)` pairs under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (name, contents) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }
}
