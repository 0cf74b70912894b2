//! Error taxonomy for the indexing engine and the directory registry.

use std::path::PathBuf;
use thiserror::Error;

use crate::backend::BackendError;

/// Errors surfaced by the library. Per-file extraction failures are
/// deliberately *not* here: they are collected in batch outcomes so a
/// single bad file never aborts its siblings.
#[derive(Debug, Error)]
pub enum DixError {
    /// No entry in the registry for this directory id.
    #[error("unknown directory: {0}")]
    UnknownDirectory(String),

    /// The directory is still indexing or in an error state.
    #[error("directory not ready: {0}")]
    NotReady(String),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("refusing to index sensitive directory: {0}")]
    SensitiveDirectory(PathBuf),

    /// An index exists on disk but there is no manifest to diff
    /// against; the caller must perform a full rebuild.
    #[error("index has no manifest; full rebuild required")]
    FullRebuildRequired,

    #[error("watcher failed: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DixError>;
