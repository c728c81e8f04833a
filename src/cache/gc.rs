//! Size-bounded garbage collection for a local cache directory
//!
//! Keeps the most recently modified files up to the size budget and deletes
//! the rest. A cheap identity hash over the sorted file list, written before
//! the build and compared after collection, tells the caller whether the
//! cache changed and deserves a fresh save.

use crate::config::CacheCategory;
use crate::error::{SetupError, SetupResult};
use crate::ui;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// One file seen during a collection run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcFileRecord {
    pub path: PathBuf,
    pub mtime: SystemTime,
    pub size_bytes: u64,
}

/// Result of planning an eviction
#[derive(Debug, Default)]
pub struct EvictionPlan {
    /// Files kept, most recent first
    pub retained: Vec<GcFileRecord>,
    /// Files to delete, most recent first
    pub evicted: Vec<GcFileRecord>,
}

impl EvictionPlan {
    /// Bytes kept by the plan
    pub fn retained_bytes(&self) -> u64 {
        self.retained.iter().map(|f| f.size_bytes).sum()
    }

    /// Bytes reclaimed by the plan
    pub fn evicted_bytes(&self) -> u64 {
        self.evicted.iter().map(|f| f.size_bytes).sum()
    }
}

/// Path of the identity hash file for a cache directory
pub fn hash_file_path(cache_path: &Path) -> PathBuf {
    let mut name: OsString = cache_path.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

fn regular_files(root: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
}

/// Identity hash of a directory: SHA256 over its sorted relative file paths.
///
/// Only the set of paths matters; contents and timestamps do not. A missing
/// directory hashes like an empty one.
pub fn compute_content_hash(root: &Path) -> String {
    let mut files: Vec<String> = regular_files(root)
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();

    info!("Collected {} files", files.len());

    let mut hasher = Sha256::new();
    hasher.update(files.join("\n").as_bytes());
    hex::encode(hasher.finalize())
}

/// Enumerate files with their modification time and size
pub fn scan(root: &Path) -> Vec<GcFileRecord> {
    regular_files(root)
        .filter_map(|entry| {
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    debug!("Skipping {}: {}", entry.path().display(), e);
                    return None;
                }
            };
            Some(GcFileRecord {
                path: entry.into_path(),
                mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size_bytes: meta.len(),
            })
        })
        .collect()
}

/// Split files into the recent head that fits `max_size_bytes` and the tail.
///
/// Files are ordered newest first. The first file whose addition would make
/// the running total meet or exceed the budget is evicted together with
/// every older file.
pub fn plan_eviction(mut files: Vec<GcFileRecord>, max_size_bytes: u64) -> EvictionPlan {
    files.sort_by(|a, b| b.mtime.cmp(&a.mtime).then_with(|| a.path.cmp(&b.path)));

    let mut total: u64 = 0;
    let cut = files
        .iter()
        .position(|file| {
            let next = total.saturating_add(file.size_bytes);
            if next >= max_size_bytes {
                true
            } else {
                total = next;
                false
            }
        })
        .unwrap_or(files.len());

    let evicted = files.split_off(cut);
    EvictionPlan {
        retained: files,
        evicted,
    }
}

fn cache_root(category: &CacheCategory) -> SetupResult<&Path> {
    category
        .mount_paths
        .first()
        .map(PathBuf::as_path)
        .ok_or_else(|| SetupError::Internal(format!("{} cache has no path", category.name)))
}

/// Write the baseline identity hash before any build activity
pub fn init(category: &CacheCategory) -> SetupResult<()> {
    let _group = ui::group(format!("Computing initial {} cache hash", category.name));
    let root = cache_root(category)?;
    let hash_file = hash_file_path(root);

    if let Some(parent) = hash_file.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| SetupError::io(format!("creating {}", parent.display()), e))?;
    }
    fs::write(&hash_file, compute_content_hash(root))
        .map_err(|e| SetupError::io(format!("writing {}", hash_file.display()), e))?;
    Ok(())
}

/// Collect garbage, then report the new identity hash if the cache changed.
///
/// Returns `None` when there is no cache directory, no budget, or the file
/// set is unchanged since [`init`].
pub fn run(category: &CacheCategory) -> SetupResult<Option<String>> {
    let root = cache_root(category)?;
    if !root.exists() {
        ui::warning(&format!("No {} cache present", category.name));
        return Ok(None);
    }
    let Some(max_size_bytes) = category.max_size_bytes else {
        debug!("{} cache has no size budget", category.name);
        return Ok(None);
    };

    {
        let _group = ui::group(format!(
            "Running {} cache garbage collection",
            category.name
        ));
        let plan = plan_eviction(scan(root), max_size_bytes);
        let mut reclaimed = 0usize;
        for file in &plan.evicted {
            match fs::remove_file(&file.path) {
                Ok(()) => reclaimed += 1,
                Err(e) => warn!("Failed to delete {}: {}", file.path.display(), e),
            }
        }
        info!(
            "Reclaimed {} files ({}), kept {}",
            reclaimed,
            crate::cache::size::format_bytes(plan.evicted_bytes()),
            crate::cache::size::format_bytes(plan.retained_bytes())
        );
    }

    Ok(cache_changed(category.name.as_str(), root))
}

fn cache_changed(name: &str, root: &Path) -> Option<String> {
    let _group = ui::group(format!("Checking {} cache for changes", name));
    let hash = compute_content_hash(root);
    let previous = fs::read_to_string(hash_file_path(root)).ok();
    let changed = previous.as_deref().map(str::trim) != Some(hash.as_str());
    info!("Cache has changes: {}", changed);
    changed.then_some(hash)
}
