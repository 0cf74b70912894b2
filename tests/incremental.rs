//! End-to-end behavior of the incremental indexing pipeline: catch-up,
//! live updates, failure isolation, and concurrent commits.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use dix::backend::{BackendError, IndexBackend, MemoryBackend, QueryHit};
use dix::config::{IndexerConfig, Storage};
use dix::engine::IndexEngine;
use dix::error::DixError;
use dix::events;
use dix::extract::{PlainTextExtractor, Unit};
use dix::manifest::ManifestStore;
use dix::registry::{DirState, DirectoryRegistry};

/// Backend wrapper that counts appended units, for idempotence checks.
struct CountingBackend {
    inner: MemoryBackend,
    appended: AtomicUsize,
}

impl CountingBackend {
    fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            appended: AtomicUsize::new(0),
        }
    }
}

impl IndexBackend for CountingBackend {
    fn append(&self, units: &[Unit]) -> Result<(), BackendError> {
        self.appended.fetch_add(units.len(), Ordering::SeqCst);
        self.inner.append(units)
    }
    fn query(&self, text: &str, limit: usize) -> Result<Vec<QueryHit>, BackendError> {
        self.inner.query(text, limit)
    }
    fn has_data(&self) -> bool {
        self.inner.has_data()
    }
    fn unit_count(&self) -> Result<usize, BackendError> {
        self.inner.unit_count()
    }
    fn clear(&self) -> Result<(), BackendError> {
        self.inner.clear()
    }
}

fn engine_with(root: &Path, index_dir: &Path, backend: Arc<dyn IndexBackend>) -> IndexEngine {
    IndexEngine::new(
        root,
        ManifestStore::new(index_dir),
        Arc::new(PlainTextExtractor::new(1024 * 1024, 512, 50)),
        backend,
    )
}

fn run_catch_up(engine: &IndexEngine) -> dix::engine::BatchOutcome {
    let changes = engine.plan_catch_up().unwrap();
    let batch = engine.prepare(&changes.to_index());
    engine.commit(batch).unwrap()
}

#[test]
fn test_catch_up_without_changes_appends_nothing() {
    let root = TempDir::new().unwrap();
    let idx = TempDir::new().unwrap();
    fs::write(root.path().join("a.txt"), "alpha").unwrap();
    fs::write(root.path().join("b.txt"), "beta").unwrap();

    let backend = Arc::new(CountingBackend::new());
    let engine = engine_with(root.path(), idx.path(), backend.clone());

    run_catch_up(&engine);
    let after_first = backend.appended.load(Ordering::SeqCst);
    assert!(after_first > 0);

    // Same filesystem state, second pass must be a no-op.
    run_catch_up(&engine);
    assert_eq!(backend.appended.load(Ordering::SeqCst), after_first);
}

#[test]
fn test_only_modified_files_reindexed() {
    let root = TempDir::new().unwrap();
    let idx = TempDir::new().unwrap();
    fs::write(root.path().join("stable.txt"), "stable").unwrap();
    fs::write(root.path().join("moving.txt"), "v1").unwrap();

    let engine = engine_with(root.path(), idx.path(), Arc::new(MemoryBackend::new()));
    run_catch_up(&engine);

    // Push the mtime forward explicitly so the test does not depend on
    // filesystem timestamp granularity.
    fs::write(root.path().join("moving.txt"), "v2").unwrap();
    let future = std::time::SystemTime::now() + Duration::from_secs(5);
    let file = fs::File::open(root.path().join("moving.txt")).unwrap();
    file.set_modified(future).unwrap();

    let changes = engine.plan_catch_up().unwrap();
    assert_eq!(changes.modified, vec![PathBuf::from("moving.txt")]);
    assert_eq!(changes.unchanged, vec![PathBuf::from("stable.txt")]);
}

#[test]
fn test_manifest_survives_restart() {
    let root = TempDir::new().unwrap();
    let idx = TempDir::new().unwrap();
    fs::write(root.path().join("a.txt"), "alpha").unwrap();

    {
        let engine = engine_with(root.path(), idx.path(), Arc::new(MemoryBackend::new()));
        run_catch_up(&engine);
    }

    // A fresh process over the same index dir sees the prior manifest.
    let manifest = ManifestStore::new(idx.path()).load().unwrap();
    assert_eq!(manifest.len(), 1);
    assert!(manifest.get(Path::new("a.txt")).is_some());
}

#[test]
fn test_corrupt_manifest_with_index_data_demands_rebuild() {
    let root = TempDir::new().unwrap();
    let idx = TempDir::new().unwrap();
    fs::write(root.path().join("a.txt"), "alpha").unwrap();

    let backend = Arc::new(MemoryBackend::new());
    let engine = engine_with(root.path(), idx.path(), backend.clone());
    run_catch_up(&engine);

    fs::write(idx.path().join("manifest.json"), "garbage").unwrap();

    let err = engine.plan_catch_up().unwrap_err();
    assert!(matches!(err, DixError::FullRebuildRequired));

    // Reset makes incremental planning possible again.
    engine.reset().unwrap();
    let outcome = run_catch_up(&engine);
    assert_eq!(outcome.indexed, 1);
    assert_eq!(backend.unit_count().unwrap(), 1);
}

#[test]
fn test_concurrent_commits_compose_to_union() {
    let root = TempDir::new().unwrap();
    let idx = TempDir::new().unwrap();
    fs::write(root.path().join("a.txt"), "alpha").unwrap();
    fs::write(root.path().join("b.txt"), "beta").unwrap();

    let engine = Arc::new(engine_with(
        root.path(),
        idx.path(),
        Arc::new(MemoryBackend::new()),
    ));
    let write_lock = Arc::new(Mutex::new(()));

    // Two batches prepared from the same starting manifest, committed
    // concurrently under the write lock.
    let batch_a = engine.prepare(&[PathBuf::from("a.txt")]);
    let batch_b = engine.prepare(&[PathBuf::from("b.txt")]);

    let handles: Vec<_> = [batch_a, batch_b]
        .into_iter()
        .map(|batch| {
            let engine = Arc::clone(&engine);
            let write_lock = Arc::clone(&write_lock);
            std::thread::spawn(move || {
                let _guard = write_lock.lock().unwrap();
                engine.commit(batch).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Neither commit clobbered the other's manifest entries.
    let manifest = ManifestStore::new(idx.path()).load().unwrap();
    assert!(manifest.get(Path::new("a.txt")).is_some());
    assert!(manifest.get(Path::new("b.txt")).is_some());
}

fn test_registry(data_root: &Path, max_file_size: u64) -> DirectoryRegistry {
    let (tx, _rx) = events::channel();
    DirectoryRegistry::new(
        IndexerConfig {
            debounce_ms: 100,
            max_file_size,
            ..IndexerConfig::default()
        },
        Storage::new(data_root),
        tx,
    )
}

#[test]
fn test_registry_partial_failure_stays_ready() {
    let data = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("ok.txt"), "fits the limit").unwrap();
    fs::write(root.path().join("big.txt"), "x".repeat(256)).unwrap();

    let registry = test_registry(data.path(), 32);
    registry.register(root.path(), false).unwrap();

    let snapshot = registry
        .wait_ready(root.path(), Duration::from_secs(10))
        .unwrap();
    assert_eq!(snapshot.state, DirState::Ready);

    // The good file is queryable despite its oversized sibling.
    let hits = registry.query(root.path(), "limit", 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source, PathBuf::from("ok.txt"));
    registry.shutdown();
}

#[test]
fn test_live_change_indexed_after_debounce() {
    let data = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("first.txt"), "first file").unwrap();

    let registry = test_registry(data.path(), 1024 * 1024);
    registry.register(root.path(), true).unwrap();
    registry
        .wait_ready(root.path(), Duration::from_secs(10))
        .unwrap();

    // Generous deadline; watcher delivery latency varies by platform.
    // The file is re-written each round in case the first write lands
    // before the watcher has attached.
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        fs::write(root.path().join("later.md"), "arrives while watching").unwrap();
        let hits = registry.query(root.path(), "arrives", 5).unwrap();
        if !hits.is_empty() {
            assert_eq!(hits[0].source, PathBuf::from("later.md"));
            break;
        }
        if std::time::Instant::now() > deadline {
            panic!("live change never became queryable");
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    registry.shutdown();
}

#[test]
fn test_deleted_file_keeps_index_queryable() {
    let data = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("keep.txt"), "kept content").unwrap();
    fs::write(root.path().join("gone.txt"), "doomed content").unwrap();

    let registry = test_registry(data.path(), 1024 * 1024);
    registry.register(root.path(), false).unwrap();
    registry
        .wait_ready(root.path(), Duration::from_secs(10))
        .unwrap();

    fs::remove_file(root.path().join("gone.txt")).unwrap();

    // Deletions do not mutate the index; stale hits are acceptable and
    // the directory stays queryable.
    let hits = registry.query(root.path(), "kept", 5).unwrap();
    assert_eq!(hits.len(), 1);
    registry.shutdown();
}
