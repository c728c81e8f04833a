//! Blob cache backed by a local directory
//!
//! Each entry is a gzipped tarball named after the SHA256 of its key plus a
//! JSON metadata file. Path `i` of a save is archived under the prefix `i/`,
//! so restoring into the same ordered path list puts every file back.
//!
//! Extraction runs on a blocking thread. When the awaiting future is dropped
//! (for example by the gateway's restore timeout) the extraction stops at the
//! next read instead of writing into the cache paths behind the caller's back.

use crate::cache::gateway::BlobCache;
use crate::cache::key::validate_key;
use crate::error::{SetupError, SetupResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Metadata stored next to each archive
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub key: String,
    pub created_at: DateTime<Utc>,
}

/// Cache entries stored as tarballs under one directory
#[derive(Debug, Clone)]
pub struct LocalBlobCache {
    dir: PathBuf,
}

impl LocalBlobCache {
    /// Create a cache rooted at `dir`; the directory is created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the entries
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stem(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    fn archive_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.tar.gz", Self::stem(key)))
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::stem(key)))
    }

    /// All entries, newest first
    pub fn entries(&self) -> SetupResult<Vec<EntryMetadata>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let read_dir = fs::read_dir(&self.dir)
            .map_err(|e| SetupError::io(format!("reading {}", self.dir.display()), e))?;

        let mut entries: Vec<EntryMetadata> = read_dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| {
                let content = fs::read_to_string(&path).ok()?;
                match serde_json::from_str(&content) {
                    Ok(meta) => Some(meta),
                    Err(e) => {
                        debug!("Ignoring unreadable entry {}: {}", path.display(), e);
                        None
                    }
                }
            })
            .collect();

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    /// Pick the key to restore: exact match first, then the newest entry
    /// matching any of the prefixes in order.
    fn resolve_key(&self, primary_key: &str, restore_keys: &[String]) -> SetupResult<Option<String>> {
        if self.metadata_path(primary_key).exists() && self.archive_path(primary_key).exists() {
            return Ok(Some(primary_key.to_string()));
        }
        let entries = self.entries()?;
        for prefix in restore_keys {
            if let Some(found) = entries
                .iter()
                .find(|meta| meta.key.starts_with(prefix.as_str()))
            {
                return Ok(Some(found.key.clone()));
            }
        }
        Ok(None)
    }

    fn restore_blocking(
        &self,
        paths: &[PathBuf],
        primary_key: &str,
        restore_keys: &[String],
        cancelled: Arc<AtomicBool>,
    ) -> SetupResult<Option<String>> {
        let Some(key) = self.resolve_key(primary_key, restore_keys)? else {
            return Ok(None);
        };

        let archive_path = self.archive_path(&key);
        let file = File::open(&archive_path)
            .map_err(|e| SetupError::io(format!("opening {}", archive_path.display()), e))?;
        let reader = Cancellable {
            inner: file,
            cancelled: cancelled.clone(),
        };
        let mut archive = tar::Archive::new(GzDecoder::new(reader));
        archive.set_preserve_mtime(true);

        let entries = archive
            .entries()
            .map_err(|e| SetupError::io("reading cache archive", e))?;
        for entry in entries {
            if cancelled.load(Ordering::Relaxed) {
                return Err(SetupError::io(
                    format!("extracting {}", key),
                    io::Error::other(RESTORE_CANCELLED),
                ));
            }
            let mut entry = entry.map_err(|e| SetupError::io("reading cache archive", e))?;
            let name = entry
                .path()
                .map_err(|e| SetupError::io("reading cache archive entry", e))?
                .into_owned();
            let Some(target) = target_path(paths, &name) else {
                debug!("Skipping archive entry {}", name.display());
                continue;
            };
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| SetupError::io(format!("creating {}", parent.display()), e))?;
            }
            entry
                .unpack(&target)
                .map_err(|e| SetupError::io(format!("extracting {}", target.display()), e))?;
        }

        info!("Restored {} from {}", key, archive_path.display());
        Ok(Some(key))
    }

    fn save_blocking(&self, paths: &[PathBuf], key: &str) -> SetupResult<()> {
        validate_key(key)?;
        let meta_path = self.metadata_path(key);
        if meta_path.exists() {
            return Err(SetupError::CacheKeyExists(key.to_string()));
        }
        if !paths.iter().any(|p| p.exists()) {
            return Err(SetupError::CacheNothingToSave {
                key: key.to_string(),
            });
        }

        fs::create_dir_all(&self.dir)
            .map_err(|e| SetupError::io(format!("creating {}", self.dir.display()), e))?;

        let archive_path = self.archive_path(key);
        let partial = archive_path.with_extension(format!("partial-{}", std::process::id()));
        let file = File::create(&partial)
            .map_err(|e| SetupError::io(format!("creating {}", partial.display()), e))?;

        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        builder.follow_symlinks(false);
        for (index, path) in paths.iter().enumerate() {
            let prefix = index.to_string();
            let result = if path.is_dir() {
                builder.append_dir_all(&prefix, path)
            } else if path.exists() {
                builder.append_path_with_name(path, &prefix)
            } else {
                debug!("Skipping missing cache path {}", path.display());
                continue;
            };
            result.map_err(|e| SetupError::io(format!("archiving {}", path.display()), e))?;
        }
        builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .map_err(|e| SetupError::io("finishing cache archive", e))?;

        fs::rename(&partial, &archive_path)
            .map_err(|e| SetupError::io(format!("moving {}", archive_path.display()), e))?;

        let meta = EntryMetadata {
            key: key.to_string(),
            created_at: Utc::now(),
        };
        fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)
            .map_err(|e| SetupError::io(format!("writing {}", meta_path.display()), e))?;

        info!("Saved {} to {}", key, archive_path.display());
        Ok(())
    }
}

const RESTORE_CANCELLED: &str = "restore cancelled";

/// Archive reader that fails every read once its restore is abandoned
struct Cancellable<R> {
    inner: R,
    cancelled: Arc<AtomicBool>,
}

impl<R: Read> Read for Cancellable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(io::Error::other(RESTORE_CANCELLED));
        }
        self.inner.read(buf)
    }
}

/// Raises the flag when the restore future is dropped
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Map an archive entry `i/rest` back to `paths[i]/rest`
fn target_path(paths: &[PathBuf], name: &Path) -> Option<PathBuf> {
    let mut components = name.components();
    let index: usize = match components.next()? {
        Component::Normal(first) => first.to_str()?.parse().ok()?,
        _ => return None,
    };
    let base = paths.get(index)?;
    let rest = components.as_path();
    if rest
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    if rest.as_os_str().is_empty() {
        Some(base.clone())
    } else {
        Some(base.join(rest))
    }
}

#[async_trait]
impl BlobCache for LocalBlobCache {
    async fn restore(
        &self,
        paths: &[PathBuf],
        primary_key: &str,
        restore_keys: &[String],
    ) -> SetupResult<Option<String>> {
        let cache = self.clone();
        let paths = paths.to_vec();
        let primary_key = primary_key.to_string();
        let restore_keys = restore_keys.to_vec();
        let cancelled = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(cancelled.clone());
        tokio::task::spawn_blocking(move || {
            cache.restore_blocking(&paths, &primary_key, &restore_keys, cancelled)
        })
        .await
        .map_err(|e| SetupError::Internal(format!("restore task failed: {}", e)))?
    }

    async fn save(&self, paths: &[PathBuf], key: &str) -> SetupResult<()> {
        let cache = self.clone();
        let paths = paths.to_vec();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || cache.save_blocking(&paths, &key))
            .await
            .map_err(|e| SetupError::Internal(format!("save task failed: {}", e)))?
    }
}
