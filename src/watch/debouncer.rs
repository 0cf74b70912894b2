//! Event debouncing for the file watcher.
//!
//! Editors and build tools emit bursts of events for one logical save.
//! The debouncer holds events until the directory has been quiet for
//! the configured window; every new event resets the window. Repeated
//! events for the same path collapse to a single normalized kind.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Normalized kind of change for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// One debounced flush: paths to (re)index and paths that vanished.
/// Deleted paths are reported for observability only.
#[derive(Debug, Default)]
pub struct ChangeBatch {
    pub changed: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// Collects raw events and releases them after a quiet period.
pub struct EventDebouncer {
    window: Duration,
    pending: HashMap<PathBuf, ChangeKind>,
    last_event: Option<Instant>,
}

impl EventDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            last_event: None,
        }
    }

    /// Record one raw event. Resets the quiet window.
    pub fn record(&mut self, path: PathBuf, kind: ChangeKind) {
        self.last_event = Some(Instant::now());

        match self.pending.get(&path).copied() {
            None => {
                self.pending.insert(path, kind);
            }
            Some(prev) => match normalize(prev, kind) {
                Some(merged) => {
                    self.pending.insert(path, merged);
                }
                // Created then deleted within one window: a no-op.
                None => {
                    self.pending.remove(&path);
                }
            },
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Whether the quiet window has elapsed since the last event.
    pub fn is_ready(&self) -> bool {
        match self.last_event {
            Some(t) => self.has_pending() && t.elapsed() >= self.window,
            None => false,
        }
    }

    /// Time left until the pending batch becomes ready. `None` when
    /// nothing is pending.
    pub fn time_until_ready(&self) -> Option<Duration> {
        if !self.has_pending() {
            return None;
        }
        let last = self.last_event?;
        Some(self.window.saturating_sub(last.elapsed()))
    }

    /// Take the pending batch, sorted for deterministic processing.
    pub fn flush(&mut self) -> ChangeBatch {
        let mut batch = ChangeBatch::default();
        for (path, kind) in self.pending.drain() {
            match kind {
                ChangeKind::Created | ChangeKind::Modified => batch.changed.push(path),
                ChangeKind::Deleted => batch.deleted.push(path),
            }
        }
        self.last_event = None;

        batch.changed.sort();
        batch.deleted.sort();
        batch
    }
}

/// Merge two successive kinds for the same path. `None` means the pair
/// cancels out entirely.
fn normalize(prev: ChangeKind, next: ChangeKind) -> Option<ChangeKind> {
    use ChangeKind::*;
    match (prev, next) {
        (Created, Modified) => Some(Created),
        (Created, Deleted) => None,
        (Deleted, Created) => Some(Modified),
        (Modified, Deleted) => Some(Deleted),
        (_, next) => Some(next),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn path(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn test_empty_debouncer_never_ready() {
        let d = EventDebouncer::new(Duration::from_millis(10));
        assert!(!d.is_ready());
        assert!(!d.has_pending());
        assert!(d.time_until_ready().is_none());
    }

    #[test]
    fn test_single_event_flushes_after_window() {
        let mut d = EventDebouncer::new(Duration::from_millis(10));
        d.record(path("a.txt"), ChangeKind::Modified);

        assert!(d.has_pending());
        sleep(Duration::from_millis(20));
        assert!(d.is_ready());

        let batch = d.flush();
        assert_eq!(batch.changed, vec![path("a.txt")]);
        assert!(!d.has_pending());
    }

    #[test]
    fn test_new_event_resets_window() {
        let mut d = EventDebouncer::new(Duration::from_millis(50));
        d.record(path("a.txt"), ChangeKind::Modified);
        sleep(Duration::from_millis(30));
        d.record(path("b.txt"), ChangeKind::Modified);

        // 30ms after the first event, but only just after the second.
        assert!(!d.is_ready());
    }

    #[test]
    fn test_burst_collapses_to_one_entry() {
        let mut d = EventDebouncer::new(Duration::from_millis(1));
        for _ in 0..10 {
            d.record(path("a.txt"), ChangeKind::Modified);
        }

        sleep(Duration::from_millis(5));
        let batch = d.flush();
        assert_eq!(batch.changed.len(), 1);
    }

    #[test]
    fn test_created_then_modified_stays_created() {
        let mut d = EventDebouncer::new(Duration::from_millis(1));
        d.record(path("a.txt"), ChangeKind::Created);
        d.record(path("a.txt"), ChangeKind::Modified);

        sleep(Duration::from_millis(5));
        let batch = d.flush();
        assert_eq!(batch.changed, vec![path("a.txt")]);
    }

    #[test]
    fn test_created_then_deleted_cancels() {
        let mut d = EventDebouncer::new(Duration::from_millis(1));
        d.record(path("tmp.swp"), ChangeKind::Created);
        d.record(path("tmp.swp"), ChangeKind::Deleted);

        assert!(!d.has_pending());
        assert!(d.flush().is_empty());
    }

    #[test]
    fn test_deleted_then_created_is_modification() {
        // Atomic-save editors delete and recreate.
        let mut d = EventDebouncer::new(Duration::from_millis(1));
        d.record(path("a.txt"), ChangeKind::Deleted);
        d.record(path("a.txt"), ChangeKind::Created);

        sleep(Duration::from_millis(5));
        let batch = d.flush();
        assert_eq!(batch.changed, vec![path("a.txt")]);
        assert!(batch.deleted.is_empty());
    }

    #[test]
    fn test_modified_then_deleted_reports_deletion() {
        let mut d = EventDebouncer::new(Duration::from_millis(1));
        d.record(path("a.txt"), ChangeKind::Modified);
        d.record(path("a.txt"), ChangeKind::Deleted);

        sleep(Duration::from_millis(5));
        let batch = d.flush();
        assert!(batch.changed.is_empty());
        assert_eq!(batch.deleted, vec![path("a.txt")]);
    }

    #[test]
    fn test_flush_is_sorted() {
        let mut d = EventDebouncer::new(Duration::from_millis(1));
        d.record(path("z.txt"), ChangeKind::Modified);
        d.record(path("a.txt"), ChangeKind::Created);
        d.record(path("m.txt"), ChangeKind::Modified);

        sleep(Duration::from_millis(5));
        let batch = d.flush();
        assert_eq!(batch.changed, vec![path("a.txt"), path("m.txt"), path("z.txt")]);
    }
}
