//! Storage layout and configuration.
//!
//! Indexes live in the application data directory, one subdirectory per
//! watched root (hashed folder names, so arbitrary absolute paths map to
//! stable locations). Configuration is layered: built-in defaults, then
//! `config.toml` in the app data directory, then `DIX_*` environment
//! variables.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

const APP_NAME: &str = "dix";
const CONFIG_FILE: &str = "config.toml";
const INFO_FILE: &str = "index.json";

/// File name of the append-oriented unit log inside an index directory.
pub const UNITS_FILE: &str = "units.jsonl";

/// Default debounce window for the file watcher, in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Default per-file size bound for extraction (oversize files fail
/// individually instead of stalling the batch).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_CHARS: usize = 512;

/// Default overlap between adjacent chunks, in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Runtime configuration for indexing and watching.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Debounce window in milliseconds (events within the window are
    /// coalesced into one batch; the window resets on each new event).
    pub debounce_ms: u64,
    /// Maximum file size eligible for extraction.
    pub max_file_size: u64,
    /// Chunk size in characters.
    pub chunk_chars: usize,
    /// Overlap between adjacent chunks in characters.
    pub chunk_overlap: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            chunk_chars: DEFAULT_CHUNK_CHARS,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Config file format (TOML), all fields optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub indexer: IndexerConfigFile,
}

/// Indexer section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexerConfigFile {
    pub debounce_ms: Option<u64>,
    pub max_file_size: Option<u64>,
    pub chunk_chars: Option<usize>,
    pub chunk_overlap: Option<usize>,
}

impl IndexerConfig {
    pub fn debounce_duration(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    fn load_from_file() -> Option<ConfigFile> {
        let app_dir = get_app_data_dir().ok()?;
        let config_path = app_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return None;
        }

        let content = fs::read_to_string(&config_path).ok()?;
        toml::from_str(&content).ok()
    }

    /// Load config with priority: environment variables > config file > defaults.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(file_config) = Self::load_from_file() {
            config.apply_file(&file_config);
        }

        if let Ok(val) = std::env::var("DIX_DEBOUNCE_MS") {
            if let Ok(ms) = val.parse() {
                config.debounce_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("DIX_MAX_FILE_SIZE") {
            if let Ok(size) = val.parse() {
                config.max_file_size = size;
            }
        }

        config
    }

    fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(v) = file.indexer.debounce_ms {
            self.debounce_ms = v;
        }
        if let Some(v) = file.indexer.max_file_size {
            self.max_file_size = v;
        }
        if let Some(v) = file.indexer.chunk_chars {
            self.chunk_chars = v;
        }
        if let Some(v) = file.indexer.chunk_overlap {
            self.chunk_overlap = v;
        }
    }
}

/// Where index directories are rooted. Tests point this at a temp dir;
/// the CLI uses the app data directory.
#[derive(Debug, Clone)]
pub struct Storage {
    data_root: PathBuf,
}

impl Storage {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    /// Storage rooted at the platform app data directory.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(get_app_data_dir()?))
    }

    /// The index directory for a specific watched root. Created on demand.
    pub fn index_dir(&self, root: &Path) -> Result<PathBuf> {
        let indexes_dir = self.data_root.join("indexes");
        fs::create_dir_all(&indexes_dir)?;
        Ok(indexes_dir.join(hash_path(root)))
    }

    /// List all index directories that have a readable info record.
    pub fn list_indexes(&self) -> Result<Vec<IndexInfo>> {
        let indexes_dir = self.data_root.join("indexes");
        if !indexes_dir.exists() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(&indexes_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(info) = IndexInfo::load(&entry.path()) {
                found.push(info);
            }
        }
        Ok(found)
    }

    /// Remove the index directory for a watched root, if present.
    pub fn remove_index(&self, root: &Path) -> Result<()> {
        let index_dir = self.index_dir(root)?;
        if index_dir.exists() {
            fs::remove_dir_all(&index_dir)?;
        }
        Ok(())
    }
}

/// Small sidecar record identifying which root an index directory
/// belongs to (the directory name itself is a one-way hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub root_path: PathBuf,
    pub created_at: u64,
}

impl IndexInfo {
    pub fn write(index_dir: &Path, root: &Path) -> Result<()> {
        let info = IndexInfo {
            root_path: root.to_path_buf(),
            created_at: unix_now(),
        };
        fs::create_dir_all(index_dir)?;
        let content = serde_json::to_string_pretty(&info)
            .expect("info serialization cannot fail");
        fs::write(index_dir.join(INFO_FILE), content)?;
        Ok(())
    }

    pub fn load(index_dir: &Path) -> Option<IndexInfo> {
        let content = fs::read_to_string(index_dir.join(INFO_FILE)).ok()?;
        serde_json::from_str(&content).ok()
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Get the application data directory.
pub fn get_app_data_dir() -> Result<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library").join("Application Support"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
    } else {
        dirs::data_dir()
    };

    let base = base
        .ok_or_else(|| std::io::Error::other("could not determine app data directory"))?;
    let app_dir = base.join(APP_NAME);

    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}

/// Hash a path to create a unique, stable folder name.
/// Format: sanitized dir name + full-path hash.
pub fn hash_path(path: &Path) -> String {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let path_str = canonical.to_string_lossy();

    let dir_name = canonical
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");

    let sanitized: String = dir_name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(16)
        .collect();

    let mut hasher = DefaultHasher::new();
    path_str.hash(&mut hasher);
    let hash = hasher.finish();

    format!("{}-{:016x}", sanitized, hash)
}
