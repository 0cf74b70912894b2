//! Manifest-based change detection.
//!
//! Compares a directory's current filesystem state against its manifest
//! and classifies every file as new, modified, or unchanged. Files that
//! are in the manifest but gone from disk are collected as `missing`
//! for observability; deletion handling is deferred, so they trigger no
//! index mutation.

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::manifest::Manifest;

/// Directory names never worth indexing, on top of gitignore rules.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
];

/// Result of one change-detection pass. The three live sets are
/// disjoint; `missing` records manifest entries with no file on disk.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub new: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
}

impl ChangeSet {
    /// Paths that need indexing: new ∪ modified, in scan order.
    pub fn to_index(&self) -> Vec<PathBuf> {
        let mut paths = self.new.clone();
        paths.extend(self.modified.iter().cloned());
        paths
    }

    /// True when nothing needs indexing.
    pub fn is_clean(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty()
    }
}

/// Modification time as nanoseconds since the epoch. Unreadable
/// metadata collapses to 0, which classifies as unchanged-or-new
/// depending on the manifest.
pub fn file_mtime(path: &Path) -> u64 {
    path.metadata()
        .and_then(|m| m.modified())
        .map(|t| t.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64)
        .unwrap_or(0)
}

/// Enumerate all indexable files under `root`, as sorted relative paths.
/// Respects gitignore rules and skips hidden files and well-known junk
/// directories, mirroring what the watcher skips.
pub fn scan_files(root: &Path) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !SKIP_DIRS.contains(&name.as_ref())
        })
        .build();

    let mut files: Vec<PathBuf> = walker
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(PathBuf::from))
        .collect();

    files.sort();
    files
}

/// Full-scan detection: walk `root` and classify everything against the
/// manifest. Used by the catch-up path.
pub fn detect(root: &Path, manifest: &Manifest) -> ChangeSet {
    let scanned = scan_files(root);
    let mut changes = classify(root, &scanned, manifest);

    for path in manifest.entries.keys() {
        if !scanned.contains(path) {
            changes.missing.push(path.clone());
        }
    }

    changes
}

/// Classify only the supplied relative paths against the manifest.
/// Used by the live path, where the watcher already knows what moved.
/// Paths that no longer exist on disk land in `missing`.
pub fn classify(root: &Path, rel_paths: &[PathBuf], manifest: &Manifest) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for rel_path in rel_paths {
        let full = root.join(rel_path);
        if !full.is_file() {
            changes.missing.push(rel_path.clone());
            continue;
        }

        let mtime = file_mtime(&full);
        match manifest.get(rel_path) {
            None => changes.new.push(rel_path.clone()),
            Some(entry) if mtime > entry.mtime => changes.modified.push(rel_path.clone()),
            // Equal mtime, or older (a re-created file with an earlier
            // mtime stays as-is until an explicit reindex).
            Some(_) => changes.unchanged.push(rel_path.clone()),
        }
    }

    changes
}
