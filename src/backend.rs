//! Append/query contract for the underlying search index.
//!
//! The real index (vector store, inverted index, ...) is an external
//! collaborator; this module defines the narrow seam the engine and the
//! registry consume, plus two built-in implementations: a JSONL unit
//! log for the CLI and an in-memory store for tests. Both tolerate
//! queries running concurrently with an append: readers see some
//! consistent prior state, possibly missing an in-flight batch.

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use thiserror::Error;

use crate::extract::Unit;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to append units: {0}")]
    Append(#[source] std::io::Error),

    #[error("failed to read index: {0}")]
    Read(#[source] std::io::Error),
}

/// One ranked query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHit {
    pub source: PathBuf,
    pub chunk_index: u32,
    pub score: f32,
    pub snippet: String,
}

/// The index backend contract: batched appends, concurrent-safe reads.
pub trait IndexBackend: Send + Sync {
    /// Append one batch of units. All-or-nothing per call.
    fn append(&self, units: &[Unit]) -> Result<(), BackendError>;

    /// Rank stored units against a query string.
    fn query(&self, text: &str, limit: usize) -> Result<Vec<QueryHit>, BackendError>;

    /// Whether the index has any persisted content. Used to detect the
    /// "index exists but manifest is gone" condition.
    fn has_data(&self) -> bool;

    /// Total stored units.
    fn unit_count(&self) -> Result<usize, BackendError>;

    /// Drop all index content (full rebuild).
    fn clear(&self) -> Result<(), BackendError>;
}

/// Append-oriented unit log: one JSON object per line. Appends are
/// serialized by a mutex and written as a single buffered write, so a
/// concurrent reader sees whole lines only.
pub struct JsonlBackend {
    path: PathBuf,
    write: Mutex<()>,
}

impl JsonlBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    fn read_units(&self) -> Result<Vec<Unit>, BackendError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path).map_err(BackendError::Read)?;
        let reader = BufReader::new(file);

        let mut units = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(BackendError::Read)?;
            if line.is_empty() {
                continue;
            }
            // A torn trailing line (crash mid-append) is skipped, not fatal.
            match serde_json::from_str(&line) {
                Ok(unit) => units.push(unit),
                Err(e) => tracing::warn!(error = %e, "skipping unparseable unit log line"),
            }
        }
        Ok(units)
    }
}

impl IndexBackend for JsonlBackend {
    fn append(&self, units: &[Unit]) -> Result<(), BackendError> {
        if units.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for unit in units {
            serde_json::to_writer(&mut buf, unit)
                .map_err(|e| BackendError::Append(e.into()))?;
            buf.push(b'\n');
        }

        let _guard = self.write.lock().unwrap();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(BackendError::Append)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(BackendError::Append)?;
        file.write_all(&buf).map_err(BackendError::Append)?;
        file.flush().map_err(BackendError::Append)?;
        Ok(())
    }

    fn query(&self, text: &str, limit: usize) -> Result<Vec<QueryHit>, BackendError> {
        let units = self.read_units()?;
        Ok(rank_units(&units, text, limit))
    }

    fn has_data(&self) -> bool {
        self.path
            .metadata()
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    fn unit_count(&self) -> Result<usize, BackendError> {
        Ok(self.read_units()?.len())
    }

    fn clear(&self) -> Result<(), BackendError> {
        let _guard = self.write.lock().unwrap();
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(BackendError::Append)?;
        }
        Ok(())
    }
}

/// In-memory backend for tests and small trees.
#[derive(Default)]
pub struct MemoryBackend {
    units: RwLock<Vec<Unit>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexBackend for MemoryBackend {
    fn append(&self, units: &[Unit]) -> Result<(), BackendError> {
        self.units.write().unwrap().extend_from_slice(units);
        Ok(())
    }

    fn query(&self, text: &str, limit: usize) -> Result<Vec<QueryHit>, BackendError> {
        let units = self.units.read().unwrap();
        Ok(rank_units(&units, text, limit))
    }

    fn has_data(&self) -> bool {
        !self.units.read().unwrap().is_empty()
    }

    fn unit_count(&self) -> Result<usize, BackendError> {
        Ok(self.units.read().unwrap().len())
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.units.write().unwrap().clear();
        Ok(())
    }
}

/// Naive term-overlap ranking: fraction of query terms present in the
/// unit, plus a small occurrence bonus. Good enough for the built-in
/// backends; a real vector index replaces this wholesale.
fn rank_units(units: &[Unit], text: &str, limit: usize) -> Vec<QueryHit> {
    let terms: Vec<String> = text
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if terms.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<QueryHit> = units
        .iter()
        .filter_map(|unit| {
            let haystack = unit.text.to_lowercase();
            let mut matched = 0usize;
            let mut occurrences = 0usize;
            for term in &terms {
                let count = haystack.matches(term.as_str()).count();
                if count > 0 {
                    matched += 1;
                    occurrences += count;
                }
            }
            if matched == 0 {
                return None;
            }
            let score =
                matched as f32 / terms.len() as f32 + 0.01 * occurrences as f32;
            Some(QueryHit {
                source: unit.source.clone(),
                chunk_index: unit.chunk_index,
                score,
                snippet: snippet(&unit.text),
            })
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    hits
}

fn snippet(text: &str) -> String {
    const SNIPPET_CHARS: usize = 160;
    if text.chars().count() <= SNIPPET_CHARS {
        text.to_string()
    } else {
        text.chars().take(SNIPPET_CHARS).collect()
    }
}
