//! Sticky disk lifecycle
//!
//! Per mount path: acquire from the provisioning service, format if needed,
//! mount, and record. The post-phase unmounts every recorded path and either
//! commits or discards the disk. A failure at any stage only affects its own
//! path.

use crate::config::CacheCategory;
use crate::error::{SetupError, SetupResult};
use crate::stickydisk::host::{HostOps, Owner, FILESYSTEM};
use crate::stickydisk::record::{MountMap, MountRecord};
use crate::stickydisk::service::{CommitRequest, StickyDiskService};
use crate::ui;
use futures_util::future::join_all;
use sha2::{Digest, Sha256};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bound on a single acquire call
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(15);

/// Bound on a single commit or discard call
pub const COMMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle stage of one mount path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStage {
    Unacquired,
    Acquiring,
    Formatting,
    Mounting,
    Mounted,
    Unmounting,
    Finalized,
    Failed,
}

impl fmt::Display for MountStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unacquired => "unacquired",
            Self::Acquiring => "acquire",
            Self::Formatting => "format",
            Self::Mounting => "mount",
            Self::Mounted => "mounted",
            Self::Unmounting => "unmount",
            Self::Finalized => "finalized",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Fixed-delay retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(300),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or attempts run out; returns the last error
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> SetupResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SetupResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    warn!(
                        "{} failed, retrying ({}/{}): {}",
                        label, attempt, self.max_attempts, e
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// How the post-phase ended for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalization {
    /// Path was not mounted; nothing to do
    NotMounted,
    Committed,
    Discarded,
}

/// Per-path disk key: the category key plus 8 hex digits of the path hash
pub fn sticky_disk_key(category_key: &str, path: &Path) -> String {
    let digest = hex::encode(Sha256::digest(path.to_string_lossy().as_bytes()));
    format!("{}-{}", category_key, &digest[..8])
}

/// Drives mounts in the pre-phase and teardown in the post-phase
#[derive(Clone)]
pub struct StickyDiskController {
    service: Arc<dyn StickyDiskService>,
    host: Arc<dyn HostOps>,
    owner: Owner,
    retry: RetryPolicy,
    acquire_timeout: Duration,
    commit_timeout: Duration,
}

impl StickyDiskController {
    /// Create a controller acting as the current user
    pub fn new(service: Arc<dyn StickyDiskService>, host: Arc<dyn HostOps>) -> Self {
        Self {
            service,
            host,
            owner: Owner::current(),
            retry: RetryPolicy::default(),
            acquire_timeout: ACQUIRE_TIMEOUT,
            commit_timeout: COMMIT_TIMEOUT,
        }
    }

    /// Override the owner of mounted disks
    pub fn with_owner(mut self, owner: Owner) -> Self {
        self.owner = owner;
        self
    }

    /// Override the unmount retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Mount a disk at every path of `category`, concurrently.
    ///
    /// Paths that fail are logged and left out of the result.
    pub async fn acquire_and_mount(&self, category: &CacheCategory, category_key: &str) -> MountMap {
        if !category.enabled {
            return MountMap::new();
        }

        let attempts = category.mount_paths.iter().map(|path| async move {
            let key = sticky_disk_key(category_key, path);
            (path.clone(), self.mount_path(path, &key).await)
        });

        let mut mounts = MountMap::new();
        for (path, result) in join_all(attempts).await {
            match result {
                Ok(record) => {
                    info!(
                        "{} mounted at {} (expose ID {})",
                        record.device,
                        path.display(),
                        record.expose_id
                    );
                    mounts.insert(path, record);
                }
                Err(e) => ui::warning(&format!(
                    "Sticky disk for {} not mounted: {}",
                    path.display(),
                    e
                )),
            }
        }
        mounts
    }

    /// Acquire, format and mount one path
    async fn mount_path(&self, path: &Path, key: &str) -> SetupResult<MountRecord> {
        let mut stage = MountStage::Unacquired;
        debug!("{}: {}", path.display(), stage);

        stage = MountStage::Acquiring;
        let disk = tokio::time::timeout(self.acquire_timeout, self.service.get_sticky_disk(key))
            .await
            .map_err(|_| SetupError::StickyDiskTimeout {
                operation: format!("acquire of {}", key),
                secs: self.acquire_timeout.as_secs(),
            })?
            .map_err(|e| SetupError::sticky(path, stage, e))?;

        stage = MountStage::Formatting;
        self.ensure_filesystem(&disk.device)
            .await
            .map_err(|e| SetupError::sticky(path, stage, e))?;

        stage = MountStage::Mounting;
        self.mount_device(&disk.device, path)
            .await
            .map_err(|e| SetupError::sticky(path, stage, e))?;

        stage = MountStage::Mounted;
        debug!("{}: {}", path.display(), stage);
        Ok(MountRecord {
            device: disk.device,
            expose_id: disk.expose_id,
            sticky_disk_key: key.to_string(),
        })
    }

    /// Format unless the device already carries the expected filesystem
    async fn ensure_filesystem(&self, device: &str) -> SetupResult<()> {
        match self.host.filesystem_type(device).await {
            Ok(Some(fs_type)) if fs_type == FILESYSTEM => {
                debug!("Device {} is already formatted with {}", device, FILESYSTEM);
                if let Err(e) = self.host.grow_filesystem(device).await {
                    ui::warning(&format!("Error resizing filesystem on {}: {}", device, e));
                }
                return Ok(());
            }
            Ok(_) => debug!("No {} filesystem on {}, formatting", FILESYSTEM, device),
            Err(e) => debug!("Probing {} failed ({}), formatting", device, e),
        }
        self.host.format(device, self.owner).await?;
        debug!("Formatted {} with {}", device, FILESYSTEM);
        Ok(())
    }

    async fn mount_device(&self, device: &str, path: &Path) -> SetupResult<()> {
        // Mount point must be runner-owned before anything is mounted on it
        self.host.create_mount_point(path).await?;
        self.host.mount(device, path).await?;
        self.host.chown(path, self.owner).await
    }

    /// Unmount one recorded path, then commit or discard its disk.
    ///
    /// Only an unmount that still fails after every retry is an error;
    /// commit problems are logged.
    pub async fn unmount_and_finalize(
        &self,
        path: &Path,
        record: &MountRecord,
        run_failed: bool,
    ) -> SetupResult<Finalization> {
        if !self.host.is_mounted(path).await.unwrap_or(false) {
            debug!("{} is not mounted, skipping unmount", path.display());
            return Ok(Finalization::NotMounted);
        }

        let usage = if run_failed {
            None
        } else {
            self.measure_usage(path).await
        };

        let stage = MountStage::Unmounting;
        self.retry
            .run(&format!("Unmount of {}", path.display()), || {
                self.host.unmount(path)
            })
            .await
            .map_err(|e| SetupError::sticky(path, stage, e))?;
        info!("Successfully unmounted {}", path.display());

        let request = CommitRequest {
            expose_id: record.expose_id.clone(),
            sticky_disk_key: record.sticky_disk_key.clone(),
            should_commit: !run_failed,
            fs_usage_bytes: usage,
        };
        self.commit(request).await;

        Ok(if run_failed {
            Finalization::Discarded
        } else {
            Finalization::Committed
        })
    }

    /// Filesystem usage hint; `None` when unknown or not positive
    async fn measure_usage(&self, path: &Path) -> Option<u64> {
        match self.host.used_bytes(path).await {
            Ok(bytes) if bytes > 0 => {
                info!(
                    "Filesystem usage: {} bytes ({:.2} GB)",
                    bytes,
                    bytes as f64 / (1u64 << 30) as f64
                );
                Some(bytes)
            }
            Ok(bytes) => {
                warn!("Invalid filesystem usage {}, not reporting it", bytes);
                None
            }
            Err(e) => {
                warn!("Failed to get filesystem usage: {}", e);
                None
            }
        }
    }

    async fn commit(&self, request: CommitRequest) {
        if request.expose_id.is_empty() || request.sticky_disk_key.is_empty() {
            ui::warning("No expose ID or sticky disk key found, cannot report sticky disk");
            return;
        }
        let action = if request.should_commit {
            "Committing"
        } else {
            "Discarding"
        };
        info!(
            "{} sticky disk {} with expose ID {}",
            action, request.sticky_disk_key, request.expose_id
        );

        let key = request.sticky_disk_key.clone();
        match tokio::time::timeout(self.commit_timeout, self.service.commit_sticky_disk(request))
            .await
        {
            Ok(Ok(())) => info!("Reported sticky disk {}", key),
            Ok(Err(e)) => ui::warning(&format!("Error reporting sticky disk {}: {}", key, e)),
            Err(_) => ui::warning(&format!(
                "Reporting sticky disk {} timed out after {}s",
                key,
                self.commit_timeout.as_secs()
            )),
        }
    }

    /// Tear down every recorded mount concurrently; errors are logged
    pub async fn finalize_all(
        &self,
        mounts: &MountMap,
        run_failed: bool,
    ) -> Vec<(PathBuf, MountStage)> {
        let teardowns = mounts.iter().map(|(path, record)| async move {
            let _group = ui::group(format!("Finalize sticky disk {}", path.display()));
            let stage = match self.unmount_and_finalize(path, record, run_failed).await {
                Ok(_) => MountStage::Finalized,
                Err(e) => {
                    ui::warning(&format!(
                        "Failed to clean up sticky disk at {}: {}",
                        path.display(),
                        e
                    ));
                    MountStage::Failed
                }
            };
            (path.clone(), stage)
        });
        join_all(teardowns).await
    }
}
