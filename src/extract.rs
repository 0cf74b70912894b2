//! Content extraction: turning a file into indexable units.
//!
//! Extraction is a seam: the engine only depends on the [`Extractor`]
//! trait, so a document/PDF pipeline can replace the built-in one. The
//! built-in [`PlainTextExtractor`] reads UTF-8-ish text, skips binary
//! content, and chunks with a fixed character window and overlap.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One indexable chunk of extracted content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Relative path of the source file.
    pub source: PathBuf,
    /// File extension, lowercased, without the dot.
    pub file_type: String,
    /// Position of this chunk within the file.
    pub chunk_index: u32,
    pub text: String,
}

/// Per-file extraction failure. These never abort a batch; the engine
/// collects them and indexes the siblings.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("file exceeds size limit ({size} > {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    #[error("failed to read file: {0}")]
    Unreadable(#[from] std::io::Error),
}

/// External extraction capability consumed by the indexing engine.
pub trait Extractor: Send + Sync {
    /// Extract `path` into units. An empty vec is a success (the file
    /// had nothing indexable, e.g. binary content) and is recorded in
    /// the manifest so the file is not re-extracted on every scan.
    fn extract(&self, path: &Path, rel_path: &Path) -> Result<Vec<Unit>, ExtractError>;
}

/// Built-in extractor for plain text files.
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    pub max_file_size: u64,
    pub chunk_chars: usize,
    pub chunk_overlap: usize,
}

impl PlainTextExtractor {
    pub fn new(max_file_size: u64, chunk_chars: usize, chunk_overlap: usize) -> Self {
        Self {
            max_file_size,
            chunk_chars,
            chunk_overlap,
        }
    }
}

impl Extractor for PlainTextExtractor {
    fn extract(&self, path: &Path, rel_path: &Path) -> Result<Vec<Unit>, ExtractError> {
        let size = path.metadata()?.len();
        if size > self.max_file_size {
            return Err(ExtractError::TooLarge {
                size,
                limit: self.max_file_size,
            });
        }

        let content = fs::read(path)?;
        if is_binary(&content) {
            tracing::debug!(path = %rel_path.display(), "skipping binary file");
            return Ok(Vec::new());
        }

        let text = String::from_utf8_lossy(&content);
        let file_type = rel_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let units = chunk_text(&text, self.chunk_chars, self.chunk_overlap)
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| Unit {
                source: rel_path.to_path_buf(),
                file_type: file_type.clone(),
                chunk_index: i as u32,
                text: chunk,
            })
            .collect();

        Ok(units)
    }
}

/// Sniff for binary content: a NUL byte in the first 8KB.
fn is_binary(content: &[u8]) -> bool {
    let probe = &content[..content.len().min(8192)];
    probe.contains(&0)
}

/// Split text into chunks of at most `max_chars` characters, adjacent
/// chunks sharing `overlap` characters.
fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let step = max_chars.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn extractor() -> PlainTextExtractor {
        PlainTextExtractor::new(1024 * 1024, 16, 4)
    }

    #[test]
    fn test_chunk_text_empty() {
        assert!(chunk_text("", 16, 4).is_empty());
    }

    #[test]
    fn test_chunk_text_single_chunk() {
        let chunks = chunk_text("short", 16, 4);
        assert_eq!(chunks, vec!["short".to_string()]);
    }

    #[test]
    fn test_chunk_text_overlap() {
        let text = "abcdefghij"; // 10 chars
        let chunks = chunk_text(text, 6, 2);
        // step = 4: [0..6), [4..10)
        assert_eq!(chunks, vec!["abcdef".to_string(), "efghij".to_string()]);
    }

    #[test]
    fn test_chunk_text_degenerate_overlap() {
        // overlap >= max_chars must still make progress
        let chunks = chunk_text("abcd", 2, 5);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "ab");
    }

    #[test]
    fn test_extract_plain_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("note.md");
        fs::write(&path, "hello incremental world, this is a note").unwrap();

        let units = extractor()
            .extract(&path, Path::new("note.md"))
            .unwrap();
        assert!(!units.is_empty());
        assert_eq!(units[0].source, PathBuf::from("note.md"));
        assert_eq!(units[0].file_type, "md");
        assert_eq!(units[0].chunk_index, 0);
        // chunk indexes are sequential
        for (i, unit) in units.iter().enumerate() {
            assert_eq!(unit.chunk_index, i as u32);
        }
    }

    #[test]
    fn test_extract_binary_yields_no_units() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blob.bin");
        fs::write(&path, [0u8, 159, 146, 150]).unwrap();

        let units = extractor().extract(&path, Path::new("blob.bin")).unwrap();
        assert!(units.is_empty());
    }

    #[test]
    fn test_extract_oversize_is_per_file_failure() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.txt");
        fs::write(&path, "x".repeat(64)).unwrap();

        let small = PlainTextExtractor::new(8, 16, 4);
        let err = small.extract(&path, Path::new("big.txt")).unwrap_err();
        assert!(matches!(err, ExtractError::TooLarge { .. }));
    }

    #[test]
    fn test_extract_missing_file_is_unreadable() {
        let tmp = TempDir::new().unwrap();
        let err = extractor()
            .extract(&tmp.path().join("nope.txt"), Path::new("nope.txt"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Unreadable(_)));
    }
}
