//! Live file watching with debounced delivery.
//!
//! A watcher thread owns the OS watcher and a debouncer. Raw events are
//! filtered (directories, hidden files, junk dirs), converted to
//! root-relative paths, and held until the debounce window closes; the
//! whole quiet batch is then handed to the `on_flush` callback in one
//! call. Watcher errors are logged and the thread keeps running; only
//! shutdown stops it.

pub mod debouncer;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::Result;
use debouncer::{ChangeKind, EventDebouncer};

pub use debouncer::ChangeBatch;

/// Poll interval while idle; bounds shutdown latency.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Callback invoked with each debounced batch: changed paths first,
/// deleted paths second, both root-relative and sorted.
pub type FlushFn = Box<dyn Fn(&[PathBuf], &[PathBuf]) + Send>;

/// Handle to a running watcher thread. Dropping it stops the thread.
pub struct WatcherHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Signal the thread to stop and wait for it to exit.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start watching `root` recursively. Runs until the handle is stopped.
pub fn spawn_watcher(
    root: PathBuf,
    debounce: Duration,
    on_flush: FlushFn,
) -> Result<WatcherHandle> {
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(tx)?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let thread_shutdown = Arc::clone(&shutdown);

    let thread = std::thread::spawn(move || {
        // Owns the watcher so it lives as long as the loop.
        let _watcher = watcher;
        let mut debouncer = EventDebouncer::new(debounce);

        while !thread_shutdown.load(Ordering::SeqCst) {
            let timeout = debouncer
                .time_until_ready()
                .map(|d| d.min(IDLE_POLL))
                .unwrap_or(IDLE_POLL);

            match rx.recv_timeout(timeout) {
                Ok(Ok(event)) => {
                    if let Some(kind) = map_kind(&event.kind) {
                        for path in &event.paths {
                            if let Some(rel) = relevant_rel_path(&root, path) {
                                debouncer.record(rel, kind);
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(root = %root.display(), error = %e, "watcher error");
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if debouncer.is_ready() {
                let batch = debouncer.flush();
                if !batch.is_empty() {
                    tracing::debug!(
                        root = %root.display(),
                        changed = batch.changed.len(),
                        deleted = batch.deleted.len(),
                        "flushing debounced batch"
                    );
                    on_flush(&batch.changed, &batch.deleted);
                }
            }
        }
    });

    Ok(WatcherHandle {
        shutdown,
        thread: Some(thread),
    })
}

fn map_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        _ => None,
    }
}

/// Convert an absolute event path to a root-relative one, dropping
/// anything the scanner would also skip. Deleted files cannot be
/// stat-ed, so the file/dir distinction relies on path shape alone.
fn relevant_rel_path(root: &Path, path: &Path) -> Option<PathBuf> {
    let rel = path.strip_prefix(root).ok()?;
    if rel.as_os_str().is_empty() {
        return None;
    }

    for component in rel.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.starts_with('.') || crate::detect::SKIP_DIRS.contains(&name.as_ref()) {
            return None;
        }
    }

    // Existing directories produce events too; skip them.
    if path.is_dir() {
        return None;
    }

    Some(rel.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_rel_path_filtering() {
        let root = Path::new("/watch/root");

        assert_eq!(
            relevant_rel_path(root, Path::new("/watch/root/docs/a.md")),
            Some(PathBuf::from("docs/a.md"))
        );
        // Outside the root.
        assert_eq!(relevant_rel_path(root, Path::new("/elsewhere/a.md")), None);
        // Hidden components and junk dirs.
        assert_eq!(relevant_rel_path(root, Path::new("/watch/root/.git/HEAD")), None);
        assert_eq!(
            relevant_rel_path(root, Path::new("/watch/root/node_modules/x.js")),
            None
        );
        assert_eq!(
            relevant_rel_path(root, Path::new("/watch/root/sub/.hidden.txt")),
            None
        );
        // The root itself.
        assert_eq!(relevant_rel_path(root, root), None);
    }

    #[test]
    fn test_map_kind() {
        assert_eq!(
            map_kind(&EventKind::Create(notify::event::CreateKind::File)),
            Some(ChangeKind::Created)
        );
        assert_eq!(
            map_kind(&EventKind::Remove(notify::event::RemoveKind::File)),
            Some(ChangeKind::Deleted)
        );
        assert_eq!(map_kind(&EventKind::Access(notify::event::AccessKind::Read)), None);
    }

    // Timing-sensitive; uses a generous window and only asserts
    // eventual delivery.
    #[test]
    fn test_watcher_delivers_debounced_batch() {
        let root = TempDir::new().unwrap();
        let seen: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);

        let mut handle = spawn_watcher(
            root.path().to_path_buf(),
            Duration::from_millis(100),
            Box::new(move |changed, _deleted| {
                seen_cb.lock().unwrap().extend_from_slice(changed);
            }),
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(200));
        fs::write(root.path().join("note.txt"), "hello").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if seen.lock().unwrap().contains(&PathBuf::from("note.txt")) {
                break;
            }
            if std::time::Instant::now() > deadline {
                panic!("watcher never delivered the change");
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        handle.stop();
    }
}
