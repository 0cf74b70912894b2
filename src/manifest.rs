//! Per-directory manifest: the durable record of what has been indexed.
//!
//! The manifest maps each relative path to the modification time it was
//! last indexed at and the number of units that extraction produced.
//! Absence of a path means "never indexed". A corrupt or unreadable
//! manifest is treated the same as a missing one: it forces a full
//! rebuild for that directory and never blocks startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Current manifest schema version. A future bump gets a migration arm
/// in [`ManifestStore::load`]; unknown versions force a rebuild.
pub const MANIFEST_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";

/// What we knew about one file when it was last indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Modification time at indexing, nanoseconds since the epoch.
    pub mtime: u64,
    /// Number of index units that originated from this file. Retained
    /// for future deletion support; not otherwise consumed.
    pub unit_count: u32,
}

/// Versioned record of every successfully indexed file in a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub entries: BTreeMap<PathBuf, ManifestEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, rel_path: &Path) -> Option<&ManifestEntry> {
        self.entries.get(rel_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pure merge: a new manifest with `updates` inserted or overwritten.
    pub fn merge(&self, updates: BTreeMap<PathBuf, ManifestEntry>) -> Manifest {
        let mut merged = self.clone();
        merged.entries.extend(updates);
        merged
    }
}

/// Loads and saves the manifest for one index directory.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    index_dir: PathBuf,
}

impl ManifestStore {
    pub fn new(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
        }
    }

    fn manifest_path(&self) -> PathBuf {
        self.index_dir.join(MANIFEST_FILE)
    }

    pub fn exists(&self) -> bool {
        self.manifest_path().exists()
    }

    /// Read the persisted manifest. `None` means "no incremental
    /// history": the file is absent, unparseable, or of an unknown
    /// version. Corruption is logged and recovered from, never fatal.
    pub fn load(&self) -> Option<Manifest> {
        let path = self.manifest_path();
        let content = fs::read_to_string(&path).ok()?;

        let manifest: Manifest = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt manifest, falling back to full rebuild");
                return None;
            }
        };

        if manifest.version != MANIFEST_VERSION {
            tracing::warn!(
                path = %path.display(),
                version = manifest.version,
                "unsupported manifest version, falling back to full rebuild"
            );
            return None;
        }

        Some(manifest)
    }

    /// Persist the manifest atomically: write to a temp file in the
    /// same directory, then rename over the old one. A crash mid-write
    /// never leaves a truncated manifest visible to the next load.
    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        fs::create_dir_all(&self.index_dir)?;

        let tmp_path = self.index_dir.join(format!("{}.tmp", MANIFEST_FILE));
        let json = serde_json::to_string_pretty(manifest)
            .expect("manifest serialization cannot fail");

        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, self.manifest_path())?;
        Ok(())
    }
}
