//! Bundled plain-text extractor.
//!
//! MIME comes from the file extension; binary content is detected with a NUL
//! sniff over the head of the file (binary files keep their MIME but yield no
//! text). Format-specific extractors (PDF, DOCX, ...) plug in behind the same
//! trait without touching the core.

use std::io::Read;
use std::path::Path;

use filesense_core::{Error, Extracted, Result, TextExtractor};

/// Bytes inspected for NUL when deciding text vs binary.
const SNIFF_BYTES: usize = 8192;

pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path, max_bytes: usize) -> Result<Extracted> {
        let mime = mime_guess::from_path(path).first().map(|m| m.essence_str().to_string());

        let mut file = std::fs::File::open(path)
            .map_err(|e| Error::Io(format!("open {}: {e}", path.display())))?;
        let mut buf = vec![0u8; max_bytes.max(SNIFF_BYTES)];
        let mut filled = 0;
        loop {
            let n = file
                .read(&mut buf[filled..])
                .map_err(|e| Error::Io(format!("read {}: {e}", path.display())))?;
            if n == 0 {
                break;
            }
            filled += n;
            if filled == buf.len() {
                break;
            }
        }
        buf.truncate(filled);

        if buf[..filled.min(SNIFF_BYTES)].contains(&0) {
            return Ok(Extracted { mime, text: None });
        }

        buf.truncate(max_bytes.min(filled));
        let text = String::from_utf8_lossy(&buf).into_owned();
        Ok(Extracted { mime, text: Some(text) })
    }
}
