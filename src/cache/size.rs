//! Directory size estimation
//!
//! Sums the sizes of every entry under a path, counting each inode once so
//! hard links are not double counted.

use crate::error::{SetupError, SetupResult};
use std::collections::HashMap;
use std::path::Path;
use walkdir::WalkDir;

/// Largest size reported, matching the integer range of the cache service
pub const MAX_SAFE_SIZE: u64 = (1 << 53) - 1;

#[cfg(unix)]
fn identity(meta: &std::fs::Metadata, _index: usize) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (meta.dev(), meta.ino())
}

#[cfg(not(unix))]
fn identity(_meta: &std::fs::Metadata, index: usize) -> (u64, u64) {
    (0, index as u64)
}

/// Total size in bytes of `path` and everything below it.
///
/// Symbolic links are not followed; unreadable entries are skipped. A path
/// that does not exist has size zero.
pub fn folder_size(path: &Path) -> SetupResult<u64> {
    let mut sizes: HashMap<(u64, u64), u64> = HashMap::new();

    for (index, entry) in WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .enumerate()
    {
        if let Ok(meta) = entry.metadata() {
            sizes.insert(identity(&meta, index), meta.len());
        }
    }

    let mut total: u64 = 0;
    for size in sizes.values() {
        total = total
            .checked_add(*size)
            .filter(|t| *t <= MAX_SAFE_SIZE)
            .ok_or_else(|| SetupError::SizeOverflow {
                path: path.to_path_buf(),
            })?;
    }
    Ok(total)
}

/// Size in megabytes
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
