//! Incremental indexing engine.
//!
//! One engine per watched directory. A batch moves through three
//! stages: plan (decide which paths need indexing), prepare (extract
//! units, in parallel, with no locks held), commit (append to the
//! backend and persist the manifest). Only the commit stage requires
//! the caller to hold the directory's write lock, so extraction cost
//! never extends the critical section.

use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::IndexBackend;
use crate::detect::{self, ChangeSet};
use crate::error::{DixError, Result};
use crate::extract::Extractor;
use crate::manifest::{Manifest, ManifestEntry, ManifestStore};

/// Engine for one directory: pairs an extractor with a backend and the
/// directory's manifest store.
pub struct IndexEngine {
    root: PathBuf,
    store: ManifestStore,
    extractor: Arc<dyn Extractor>,
    backend: Arc<dyn IndexBackend>,
    /// Bumped by [`IndexEngine::reset`]. Batches prepared against an
    /// older generation are re-classified at commit time.
    generation: AtomicU64,
}

/// Extraction output for one batch, ready to commit.
pub struct PreparedBatch {
    generation: u64,
    units: Vec<crate::extract::Unit>,
    updates: BTreeMap<PathBuf, ManifestEntry>,
    failed: Vec<(PathBuf, String)>,
}

impl PreparedBatch {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.failed.is_empty()
    }
}

/// What one committed batch did.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Files whose manifest entries were written.
    pub indexed: usize,
    /// Per-file failures, with the reason. The rest of the batch
    /// committed normally.
    pub failed: Vec<(PathBuf, String)>,
    /// Units appended to the backend.
    pub units_appended: usize,
}

impl IndexEngine {
    pub fn new(
        root: impl Into<PathBuf>,
        store: ManifestStore,
        extractor: Arc<dyn Extractor>,
        backend: Arc<dyn IndexBackend>,
    ) -> Self {
        Self {
            root: root.into(),
            store,
            extractor,
            backend,
            generation: AtomicU64::new(0),
        }
    }

    pub fn backend(&self) -> &Arc<dyn IndexBackend> {
        &self.backend
    }

    /// Plan a catch-up pass: scan the whole directory against the
    /// manifest. Fails with [`DixError::FullRebuildRequired`] when the
    /// backend holds data but the manifest is gone or unreadable; the
    /// index contents can no longer be attributed to files, so
    /// incremental updates on top would duplicate units.
    pub fn plan_catch_up(&self) -> Result<ChangeSet> {
        let manifest = match self.store.load() {
            Some(m) => m,
            None if self.backend.has_data() => return Err(DixError::FullRebuildRequired),
            None => Manifest::new(),
        };

        Ok(detect::detect(&self.root, &manifest))
    }

    /// Plan a live batch: classify only the paths the watcher reported.
    pub fn plan_live(&self, rel_paths: &[PathBuf]) -> ChangeSet {
        let manifest = self.store.load().unwrap_or_default();
        detect::classify(&self.root, rel_paths, &manifest)
    }

    /// Extract the given paths into units. Runs without any directory
    /// lock; per-file failures are collected, not propagated. The mtime
    /// recorded per file is read before its content, so a write that
    /// lands mid-extraction shows up as modified on the next pass.
    pub fn prepare(&self, rel_paths: &[PathBuf]) -> PreparedBatch {
        let results: Vec<_> = rel_paths
            .par_iter()
            .map(|rel_path| {
                let full = self.root.join(rel_path);
                let mtime = detect::file_mtime(&full);
                let outcome = self.extractor.extract(&full, rel_path);
                (rel_path.clone(), mtime, outcome)
            })
            .collect();

        let mut batch = PreparedBatch {
            generation: self.generation.load(Ordering::SeqCst),
            units: Vec::new(),
            updates: BTreeMap::new(),
            failed: Vec::new(),
        };

        for (rel_path, mtime, outcome) in results {
            match outcome {
                Ok(units) => {
                    batch.updates.insert(
                        rel_path,
                        ManifestEntry {
                            mtime,
                            unit_count: units.len() as u32,
                        },
                    );
                    batch.units.extend(units);
                }
                Err(e) => {
                    tracing::warn!(path = %rel_path.display(), error = %e, "extraction failed");
                    batch.failed.push((rel_path, e.to_string()));
                }
            }
        }

        batch
    }

    /// Commit a prepared batch: one backend append, then one manifest
    /// save. The caller must hold the directory's write lock; the
    /// manifest is reloaded here so concurrent batches compose (each
    /// commit merges into whatever the previous one persisted).
    ///
    /// A failed append leaves the manifest untouched, so the affected
    /// files stay eligible for re-indexing.
    ///
    /// A batch prepared before a [`IndexEngine::reset`] is re-classified
    /// against the current manifest first: anything the rebuild already
    /// indexed is dropped, so a stale live batch cannot duplicate units
    /// over a completed rebuild.
    pub fn commit(&self, batch: PreparedBatch) -> Result<BatchOutcome> {
        let batch = if batch.generation != self.generation.load(Ordering::SeqCst) {
            self.reclassify(batch)
        } else {
            batch
        };

        let outcome = BatchOutcome {
            indexed: batch.updates.len(),
            failed: batch.failed,
            units_appended: batch.units.len(),
        };

        if !batch.units.is_empty() {
            self.backend.append(&batch.units)?;
        }

        if !batch.updates.is_empty() {
            let current = self.store.load().unwrap_or_default();
            let merged = current.merge(batch.updates);
            self.store.save(&merged)?;
        }

        Ok(outcome)
    }

    /// Drop a stale batch's entries for paths the current manifest
    /// already covers at the same or a newer mtime. Unknown paths keep
    /// their units (they are still new as far as the index knows).
    fn reclassify(&self, batch: PreparedBatch) -> PreparedBatch {
        let manifest = self.store.load().unwrap_or_default();

        let mut kept_updates = BTreeMap::new();
        for (path, entry) in batch.updates {
            match manifest.get(&path) {
                Some(recorded) if entry.mtime <= recorded.mtime => {
                    tracing::debug!(path = %path.display(), "dropping superseded batch entry");
                }
                _ => {
                    kept_updates.insert(path, entry);
                }
            }
        }

        let units = batch
            .units
            .into_iter()
            .filter(|unit| kept_updates.contains_key(&unit.source))
            .collect();

        PreparedBatch {
            generation: self.generation.load(Ordering::SeqCst),
            units,
            updates: kept_updates,
            failed: batch.failed,
        }
    }

    /// Drop all index state for this directory, leaving an empty
    /// manifest behind. Used for full rebuilds.
    pub fn reset(&self) -> Result<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.backend.clear()?;
        self.store.save(&Manifest::new())?;
        Ok(())
    }
}
