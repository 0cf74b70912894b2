//! Directory statistics shown in status output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::detect::scan_files;

/// Aggregate counts for one watched directory, computed from the same
/// file set the indexer sees (gitignore and junk dirs excluded).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirStats {
    pub file_count: u64,
    pub total_size: u64,
    /// File count per extension (lowercased, no dot).
    pub types: BTreeMap<String, u64>,
}

pub fn collect(root: &Path) -> DirStats {
    let mut stats = DirStats::default();

    for rel_path in scan_files(root) {
        let full = root.join(&rel_path);
        let size = full.metadata().map(|m| m.len()).unwrap_or(0);

        stats.file_count += 1;
        stats.total_size += size;

        let ext = rel_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("(none)")
            .to_lowercase();
        *stats.types.entry(ext).or_insert(0) += 1;
    }

    stats
}
