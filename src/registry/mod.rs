//! Directory lifecycle management.
//!
//! The registry owns every watched directory: registration, the
//! indexing-to-ready state machine, per-directory write locking, live
//! watching, and teardown. Queries are answered only from `Ready`
//! entries and never wait on indexing work.
//!
//! Locking layers, innermost last:
//!   - `inner`: the registry list itself, held only for lookups and
//!     membership changes, never across indexing work.
//!   - per-entry `state`: snapshot fields, held for reads/writes only.
//!   - per-entry `write_lock`: serializes index mutation (commit,
//!     rebuild). Catch-up and live batches extract before taking it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::backend::{IndexBackend, JsonlBackend, QueryHit};
use crate::config::{self, IndexerConfig, IndexInfo, Storage, UNITS_FILE};
use crate::engine::{BatchOutcome, IndexEngine};
use crate::error::{DixError, Result};
use crate::events::{emit, EventSender, StatusEvent};
use crate::extract::{Extractor, PlainTextExtractor};
use crate::manifest::ManifestStore;
use crate::stats::{self, DirStats};
use crate::watch::{spawn_watcher, WatcherHandle};

/// Lifecycle state of one registered directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirState {
    Indexing,
    Ready,
    Error,
}

/// Mutable status fields, guarded by one mutex per entry.
#[derive(Debug)]
struct StateInner {
    state: DirState,
    error: Option<String>,
    stats: DirStats,
    summary: Option<String>,
}

/// One registered directory.
pub struct DirEntry {
    pub id: String,
    pub root: PathBuf,
    engine: Arc<IndexEngine>,
    state: Mutex<StateInner>,
    /// Serializes all index mutation for this directory.
    write_lock: Arc<Mutex<()>>,
    watcher: Mutex<Option<WatcherHandle>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    removed: AtomicBool,
}

impl DirEntry {
    fn set_state(&self, state: DirState, error: Option<String>, events: &EventSender) {
        {
            let mut inner = self.state.lock().unwrap();
            inner.state = state;
            inner.error = error.clone();
        }
        emit(
            events,
            StatusEvent::StateChanged {
                dir_id: self.id.clone(),
                state,
                error,
            },
        );
    }

    fn refresh_stats(&self, events: &EventSender) {
        let stats = stats::collect(&self.root);
        self.state.lock().unwrap().stats = stats.clone();
        emit(
            events,
            StatusEvent::StatsUpdated {
                dir_id: self.id.clone(),
                stats,
            },
        );
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        let inner = self.state.lock().unwrap();
        DirectorySnapshot {
            id: self.id.clone(),
            root: self.root.clone(),
            state: inner.state,
            error: inner.error.clone(),
            stats: inner.stats.clone(),
            summary: inner.summary.clone(),
        }
    }
}

/// Point-in-time copy of an entry's status, safe to hold without locks.
#[derive(Debug, Clone, Serialize)]
pub struct DirectorySnapshot {
    pub id: String,
    pub root: PathBuf,
    pub state: DirState,
    pub error: Option<String>,
    pub stats: DirStats,
    pub summary: Option<String>,
}

/// Directory roots that are never indexed, even on explicit request.
fn is_sensitive(path: &Path) -> bool {
    let fixed = [PathBuf::from("/etc"), PathBuf::from("/private/etc")];
    if fixed.iter().any(|p| path == p) {
        return true;
    }
    if let Some(home) = dirs::home_dir() {
        let guarded = [
            home.join(".ssh"),
            home.join(".gnupg"),
            home.join(".aws"),
            home.join("Library").join("Keychains"),
        ];
        if guarded.iter().any(|p| path == p) {
            return true;
        }
    }
    false
}

/// Registry of all watched directories. Cheap to share behind an `Arc`.
pub struct DirectoryRegistry {
    inner: Mutex<Vec<Arc<DirEntry>>>,
    config: IndexerConfig,
    storage: Storage,
    events: EventSender,
    extractor: Arc<dyn Extractor>,
}

impl DirectoryRegistry {
    pub fn new(config: IndexerConfig, storage: Storage, events: EventSender) -> Self {
        let extractor = Arc::new(PlainTextExtractor::new(
            config.max_file_size,
            config.chunk_chars,
            config.chunk_overlap,
        ));
        Self {
            inner: Mutex::new(Vec::new()),
            config,
            storage,
            events,
            extractor,
        }
    }

    /// Register a directory and start its catch-up pass in the
    /// background. Returns the directory id immediately; poll
    /// [`DirectoryRegistry::status`] or listen for events to learn when
    /// it becomes ready. Registering an already-registered root is a
    /// no-op that returns the existing id.
    pub fn register(&self, path: &Path, watch: bool) -> Result<String> {
        let root = path
            .canonicalize()
            .map_err(|_| DixError::NotADirectory(path.to_path_buf()))?;
        if !root.is_dir() {
            return Err(DixError::NotADirectory(root));
        }
        if is_sensitive(&root) {
            return Err(DixError::SensitiveDirectory(root));
        }

        let id = config::hash_path(&root);

        {
            let entries = self.inner.lock().unwrap();
            if let Some(existing) = entries.iter().find(|e| e.root == root) {
                tracing::debug!(root = %root.display(), "already registered");
                return Ok(existing.id.clone());
            }
        }

        let index_dir = self.storage.index_dir(&root)?;
        IndexInfo::write(&index_dir, &root)?;

        let backend: Arc<dyn IndexBackend> =
            Arc::new(JsonlBackend::new(index_dir.join(UNITS_FILE)));
        let engine = Arc::new(IndexEngine::new(
            root.clone(),
            ManifestStore::new(&index_dir),
            Arc::clone(&self.extractor),
            backend,
        ));

        let entry = Arc::new(DirEntry {
            id: id.clone(),
            root: root.clone(),
            engine,
            state: Mutex::new(StateInner {
                state: DirState::Indexing,
                error: None,
                stats: DirStats::default(),
                summary: None,
            }),
            write_lock: Arc::new(Mutex::new(())),
            watcher: Mutex::new(None),
            worker: Mutex::new(None),
            removed: AtomicBool::new(false),
        });

        // Racing registrations of the same root resolve here: the
        // check and the insert happen under one acquisition, so the
        // loser returns the winner's id without inserting.
        {
            let mut entries = self.inner.lock().unwrap();
            if let Some(existing) = entries.iter().find(|e| e.root == root) {
                return Ok(existing.id.clone());
            }
            // Insertion order is the listing order.
            entries.push(Arc::clone(&entry));
        }
        emit(
            &self.events,
            StatusEvent::StateChanged {
                dir_id: id.clone(),
                state: DirState::Indexing,
                error: None,
            },
        );

        let worker_entry = Arc::clone(&entry);
        let events = self.events.clone();
        let debounce = self.config.debounce_duration();
        let worker = std::thread::spawn(move || {
            run_catch_up(&worker_entry, &events);

            // The watcher attaches only once the directory is ready, so
            // the catch-up scan and live events never interleave.
            let ready = worker_entry.state.lock().unwrap().state == DirState::Ready;
            if watch && ready && !worker_entry.removed.load(Ordering::SeqCst) {
                start_watcher(&worker_entry, debounce, &events);
            }
        });
        *entry.worker.lock().unwrap() = Some(worker);

        Ok(id)
    }

    fn find(&self, path: &Path) -> Result<Arc<DirEntry>> {
        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let entries = self.inner.lock().unwrap();
        entries
            .iter()
            .find(|e| e.root == root)
            .cloned()
            .ok_or_else(|| DixError::UnknownDirectory(root.display().to_string()))
    }

    fn entry_by_id(&self, id: &str) -> Result<Arc<DirEntry>> {
        let entries = self.inner.lock().unwrap();
        entries
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| DixError::UnknownDirectory(id.to_string()))
    }

    /// Status snapshot for one registered directory.
    pub fn status(&self, path: &Path) -> Result<DirectorySnapshot> {
        Ok(self.find(path)?.snapshot())
    }

    /// Status snapshot, keyed by the id that `register` returned.
    pub fn get(&self, id: &str) -> Result<DirectorySnapshot> {
        Ok(self.entry_by_id(id)?.snapshot())
    }

    /// Snapshots of all registered directories, in registration order.
    pub fn list(&self) -> Vec<DirectorySnapshot> {
        let entries = self.inner.lock().unwrap();
        entries.iter().map(|e| e.snapshot()).collect()
    }

    /// Query one directory's index. Only `Ready` directories are
    /// queryable; the query itself takes no write lock, so live
    /// indexing never blocks it.
    pub fn query(&self, path: &Path, text: &str, limit: usize) -> Result<Vec<QueryHit>> {
        let entry = self.find(path)?;
        Self::query_entry(&entry, text, limit)
    }

    /// Same as [`DirectoryRegistry::query`], keyed by directory id.
    pub fn query_by_id(&self, id: &str, text: &str, limit: usize) -> Result<Vec<QueryHit>> {
        let entry = self.entry_by_id(id)?;
        Self::query_entry(&entry, text, limit)
    }

    fn query_entry(entry: &Arc<DirEntry>, text: &str, limit: usize) -> Result<Vec<QueryHit>> {
        let state = entry.state.lock().unwrap().state;
        if state != DirState::Ready {
            return Err(DixError::NotReady(entry.root.display().to_string()));
        }
        Ok(entry.engine.backend().query(text, limit)?)
    }

    /// Attach or replace the human-written summary for a directory.
    pub fn set_summary(&self, path: &Path, summary: Option<String>) -> Result<()> {
        let entry = self.find(path)?;
        entry.state.lock().unwrap().summary = summary;
        Ok(())
    }

    /// Discard a directory's index and rebuild it from scratch in the
    /// background. Waits for any in-flight catch-up worker first, then
    /// the rebuild holds the write lock for its whole duration.
    pub fn reindex(&self, path: &Path) -> Result<()> {
        let entry = self.find(path)?;
        self.reindex_entry(entry);
        Ok(())
    }

    /// Same as [`DirectoryRegistry::reindex`], keyed by directory id.
    pub fn reindex_by_id(&self, id: &str) -> Result<()> {
        let entry = self.entry_by_id(id)?;
        self.reindex_entry(entry);
        Ok(())
    }

    fn reindex_entry(&self, entry: Arc<DirEntry>) {
        // A catch-up still running for this entry would race the
        // rebuild and could publish Ready over it; wait it out before
        // replacing the worker slot.
        if let Some(previous) = entry.worker.lock().unwrap().take() {
            let _ = previous.join();
        }

        entry.set_state(DirState::Indexing, None, &self.events);

        let events = self.events.clone();
        let worker_entry = Arc::clone(&entry);
        let worker = std::thread::spawn(move || {
            let entry = worker_entry;
            let result = {
                let _guard = entry.write_lock.lock().unwrap();
                entry.engine.reset().and_then(|_| {
                    let changes = entry.engine.plan_catch_up()?;
                    let batch = entry.engine.prepare(&changes.to_index());
                    entry.engine.commit(batch)
                })
            };

            match result {
                Ok(outcome) => {
                    report_batch(&entry, &outcome, &events);
                    entry.refresh_stats(&events);
                    entry.set_state(DirState::Ready, None, &events);
                }
                Err(e) => {
                    tracing::error!(root = %entry.root.display(), error = %e, "rebuild failed");
                    entry.set_state(DirState::Error, Some(e.to_string()), &events);
                }
            }
        });

        *entry.worker.lock().unwrap() = Some(worker);
    }

    /// Remove a directory: stop its watcher, wait out any in-flight
    /// batch, drop it from the registry, and delete its index files.
    pub fn unregister(&self, path: &Path) -> Result<()> {
        let entry = self.find(path)?;
        self.unregister_entry(entry)
    }

    /// Same as [`DirectoryRegistry::unregister`], keyed by directory id.
    pub fn unregister_by_id(&self, id: &str) -> Result<()> {
        let entry = self.entry_by_id(id)?;
        self.unregister_entry(entry)
    }

    fn unregister_entry(&self, entry: Arc<DirEntry>) -> Result<()> {
        entry.removed.store(true, Ordering::SeqCst);
        // The worker is what attaches the watcher, so it is joined
        // first; only then is the watcher slot final.
        if let Some(worker) = entry.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
        if let Some(mut handle) = entry.watcher.lock().unwrap().take() {
            handle.stop();
        }
        // Waits for a live batch that started before the removed flag.
        drop(entry.write_lock.lock().unwrap());

        self.inner.lock().unwrap().retain(|e| e.id != entry.id);
        self.storage.remove_index(&entry.root)?;

        tracing::info!(root = %entry.root.display(), "unregistered");
        Ok(())
    }

    /// Stop all watchers and wait for background workers to finish.
    pub fn shutdown(&self) {
        let entries: Vec<_> = self.inner.lock().unwrap().clone();
        for entry in entries {
            if let Some(worker) = entry.worker.lock().unwrap().take() {
                let _ = worker.join();
            }
            if let Some(mut handle) = entry.watcher.lock().unwrap().take() {
                handle.stop();
            }
        }
    }

    /// Block until a directory leaves `Indexing`, up to `timeout`.
    /// Returns the final snapshot.
    pub fn wait_ready(&self, path: &Path, timeout: Duration) -> Result<DirectorySnapshot> {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self.status(path)?;
            if snapshot.state != DirState::Indexing {
                return Ok(snapshot);
            }
            if Instant::now() >= deadline {
                return Err(DixError::NotReady(path.display().to_string()));
            }
            std::thread::sleep(Duration::from_millis(25));
        }
    }
}

/// Attach a live watcher to a ready entry. Startup failure is logged
/// and reported; the directory stays queryable without live updates.
fn start_watcher(entry: &Arc<DirEntry>, debounce: Duration, events: &EventSender) {
    let flush_entry = Arc::clone(entry);
    let flush_events = events.clone();
    match spawn_watcher(
        entry.root.clone(),
        debounce,
        Box::new(move |changed, deleted| {
            run_live_batch(&flush_entry, changed, deleted, &flush_events);
        }),
    ) {
        Ok(handle) => {
            *entry.watcher.lock().unwrap() = Some(handle);
        }
        Err(e) => {
            tracing::error!(root = %entry.root.display(), error = %e, "failed to start watcher");
            emit(
                events,
                StatusEvent::WatcherError {
                    dir_id: entry.id.clone(),
                    message: e.to_string(),
                },
            );
        }
    }
}

fn report_batch(entry: &DirEntry, outcome: &BatchOutcome, events: &EventSender) {
    emit(
        events,
        StatusEvent::BatchApplied {
            dir_id: entry.id.clone(),
            indexed: outcome.indexed,
            failed: outcome.failed.len(),
        },
    );
}

/// Catch-up worker body. A missing manifest over a non-empty index
/// falls back to a full rebuild instead of surfacing an error.
fn run_catch_up(entry: &Arc<DirEntry>, events: &EventSender) {
    let result = match entry.engine.plan_catch_up() {
        Ok(changes) => {
            for path in &changes.missing {
                emit(
                    events,
                    StatusEvent::FileMissing {
                        dir_id: entry.id.clone(),
                        path: path.clone(),
                    },
                );
            }
            let batch = entry.engine.prepare(&changes.to_index());
            let _guard = entry.write_lock.lock().unwrap();
            entry.engine.commit(batch)
        }
        Err(DixError::FullRebuildRequired) => {
            tracing::warn!(
                root = %entry.root.display(),
                "manifest missing for existing index, rebuilding"
            );
            let _guard = entry.write_lock.lock().unwrap();
            entry.engine.reset().and_then(|_| {
                let changes = entry.engine.plan_catch_up()?;
                let batch = entry.engine.prepare(&changes.to_index());
                entry.engine.commit(batch)
            })
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => {
            if !outcome.failed.is_empty() {
                tracing::warn!(
                    root = %entry.root.display(),
                    failed = outcome.failed.len(),
                    "some files failed extraction"
                );
            }
            report_batch(entry, &outcome, events);
            entry.refresh_stats(events);
            entry.set_state(DirState::Ready, None, events);
        }
        Err(e) => {
            tracing::error!(root = %entry.root.display(), error = %e, "catch-up failed");
            entry.set_state(DirState::Error, Some(e.to_string()), events);
        }
    }
}

/// Live batch body, invoked from the watcher thread on each debounced
/// flush. Failures are per-file and the directory stays `Ready`.
fn run_live_batch(
    entry: &Arc<DirEntry>,
    changed: &[PathBuf],
    deleted: &[PathBuf],
    events: &EventSender,
) {
    if entry.removed.load(Ordering::SeqCst) {
        return;
    }

    for path in deleted {
        emit(
            events,
            StatusEvent::FileMissing {
                dir_id: entry.id.clone(),
                path: path.clone(),
            },
        );
    }

    let changes = entry.engine.plan_live(changed);
    if changes.is_clean() {
        return;
    }

    let batch = entry.engine.prepare(&changes.to_index());
    let result = {
        let _guard = entry.write_lock.lock().unwrap();
        if entry.removed.load(Ordering::SeqCst) {
            return;
        }
        entry.engine.commit(batch)
    };

    match result {
        Ok(outcome) => {
            report_batch(entry, &outcome, events);
            entry.refresh_stats(events);
        }
        Err(e) => {
            // The manifest was not updated, so the files will be picked
            // up again; the directory stays queryable.
            tracing::error!(root = %entry.root.display(), error = %e, "live batch failed");
            emit(
                events,
                StatusEvent::WatcherError {
                    dir_id: entry.id.clone(),
                    message: e.to_string(),
                },
            );
        }
    }
}
