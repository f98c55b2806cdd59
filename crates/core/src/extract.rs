//! Text extraction contract. Format-specific parsing lives in the adapter;
//! the core only consumes this trait.

use std::path::Path;

use crate::error::Result;

/// Result of extracting text from one file.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    /// MIME type, when the extractor can determine one.
    pub mime: Option<String>,
    /// Decoded text, `None` for non-textual content.
    pub text: Option<String>,
}

/// Extracts decoded text from a file on disk. Synchronous, no side effects.
pub trait TextExtractor: Send + Sync {
    /// Extract up to `max_bytes` of decoded text from `path`.
    fn extract(&self, path: &Path, max_bytes: usize) -> Result<Extracted>;
}
