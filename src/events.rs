//! Status events emitted by the registry and its workers.
//!
//! Observers (the CLI watch loop, tests) receive these over a plain
//! mpsc channel. Senders never block and never fail the indexing path:
//! a dropped receiver just means nobody is listening.

use std::path::PathBuf;
use std::sync::mpsc;

use crate::registry::DirState;
use crate::stats::DirStats;

/// One observable state transition or progress notification.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    /// A directory entered a new lifecycle state.
    StateChanged {
        dir_id: String,
        state: DirState,
        error: Option<String>,
    },
    /// Fresh stats were collected for a directory.
    StatsUpdated { dir_id: String, stats: DirStats },
    /// An indexing batch finished (catch-up or live).
    BatchApplied {
        dir_id: String,
        indexed: usize,
        failed: usize,
    },
    /// The watcher hit a non-fatal error and keeps running.
    WatcherError { dir_id: String, message: String },
    /// A path was reported missing from disk during detection.
    FileMissing { dir_id: String, path: PathBuf },
}

pub type EventSender = mpsc::Sender<StatusEvent>;
pub type EventReceiver = mpsc::Receiver<StatusEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::channel()
}

/// Send without caring whether anyone listens.
pub fn emit(tx: &EventSender, event: StatusEvent) {
    let _ = tx.send(event);
}
