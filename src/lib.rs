//! # dix - Incremental Directory Indexing
//!
//! dix keeps a per-directory search index current as files change,
//! without re-processing unchanged content. Each watched directory
//! carries a manifest recording what was indexed and at which
//! modification time; catch-up passes diff the filesystem against it,
//! and a debounced file watcher feeds live changes through the same
//! batch pipeline.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`manifest`] - Durable per-directory record of indexed files
//! - [`detect`] - Filesystem scan and change classification
//! - [`extract`] - File-to-unit extraction (trait + plain text impl)
//! - [`backend`] - Index backend contract (trait + JSONL/memory impls)
//! - [`engine`] - Plan/prepare/commit incremental batches
//! - [`watch`] - Debounced recursive file watching
//! - [`registry`] - Directory lifecycle, locking, queries
//!
//! ## Quick Start
//!
//! ```ignore
//! use dix::config::{IndexerConfig, Storage};
//! use dix::registry::DirectoryRegistry;
//! use std::time::Duration;
//!
//! let (events, _rx) = dix::events::channel();
//! let registry = DirectoryRegistry::new(
//!     IndexerConfig::load(),
//!     Storage::default_location().unwrap(),
//!     events,
//! );
//!
//! registry.register(std::path::Path::new("./docs"), true).unwrap();
//! registry.wait_ready(std::path::Path::new("./docs"), Duration::from_secs(60)).unwrap();
//! let hits = registry.query(std::path::Path::new("./docs"), "release notes", 10).unwrap();
//! ```

pub mod backend;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod events;
pub mod extract;
pub mod manifest;
pub mod registry;
pub mod stats;
pub mod watch;
