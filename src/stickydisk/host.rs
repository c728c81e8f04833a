//! Privileged host operations behind sticky disk mounts
//!
//! Device-level commands run through `sudo`. The mount point itself is
//! created without it so the runner user owns the empty directory.

use crate::error::{SetupError, SetupResult};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Filesystem every sticky disk is formatted with
pub const FILESYSTEM: &str = "ext4";

/// User and group owning mounted disks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    /// The user running this process
    #[cfg(unix)]
    pub fn current() -> Self {
        // SAFETY: getuid and getgid cannot fail and touch no memory
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self { uid, gid }
    }

    /// The user running this process
    #[cfg(not(unix))]
    pub fn current() -> Self {
        Self { uid: 0, gid: 0 }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// Operating system boundary of the mount lifecycle
#[async_trait]
pub trait HostOps: Send + Sync {
    /// Filesystem type on `device`, `None` when unformatted
    async fn filesystem_type(&self, device: &str) -> SetupResult<Option<String>>;

    /// Grow the filesystem to the size of the device
    async fn grow_filesystem(&self, device: &str) -> SetupResult<()>;

    /// Format `device` without reserved blocks, root owned by `owner`
    async fn format(&self, device: &str, owner: Owner) -> SetupResult<()>;

    /// Create the mount point as the invoking user
    async fn create_mount_point(&self, path: &Path) -> SetupResult<()>;

    async fn mount(&self, device: &str, path: &Path) -> SetupResult<()>;

    async fn chown(&self, path: &Path, owner: Owner) -> SetupResult<()>;

    async fn is_mounted(&self, path: &Path) -> SetupResult<bool>;

    async fn unmount(&self, path: &Path) -> SetupResult<()>;

    /// Bytes used on the filesystem mounted at `path`
    async fn used_bytes(&self, path: &Path) -> SetupResult<u64>;
}

/// [`HostOps`] implemented with system commands
#[derive(Debug, Clone, Default)]
pub struct SudoHostOps;

impl SudoHostOps {
    /// Create a new host operations handle
    pub fn new() -> Self {
        Self
    }

    /// Execute a command and return its output
    async fn exec(&self, program: &str, args: &[&str]) -> SetupResult<std::process::Output> {
        debug!("Executing: {} {:?}", program, args);

        Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SetupError::command_failed(format!("{} {:?}", program, args), e))
    }

    /// Execute a command and fail on a non-zero exit
    async fn exec_ok(&self, program: &str, args: &[&str]) -> SetupResult<String> {
        let output = self.exec(program, args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(SetupError::command_exec(
                format!("{} {}", program, args.join(" ")),
                String::from_utf8_lossy(&output.stderr).trim(),
            ))
        }
    }
}

fn path_arg(path: &Path) -> SetupResult<&str> {
    path.to_str()
        .ok_or_else(|| SetupError::Internal(format!("non UTF-8 path {}", path.display())))
}

/// Undo the octal escapes used in `/proc/mounts`
fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

/// Whether `path` is a mount target in `/proc/mounts` formatted content
pub fn mounts_contain(mounts: &str, path: &Path) -> bool {
    mounts.lines().any(|line| {
        line.split_whitespace()
            .nth(1)
            .map(|target| Path::new(&unescape_mount_field(target)) == path)
            .unwrap_or(false)
    })
}

/// Last line of `df --output=used` as bytes
pub fn parse_df_used(stdout: &str) -> Option<u64> {
    stdout.lines().last()?.trim().parse().ok()
}

#[async_trait]
impl HostOps for SudoHostOps {
    async fn filesystem_type(&self, device: &str) -> SetupResult<Option<String>> {
        // blkid exits non-zero when no filesystem is found
        let output = self
            .exec("sudo", &["blkid", "-o", "value", "-s", "TYPE", device])
            .await?;
        let fs_type = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((output.status.success() && !fs_type.is_empty()).then_some(fs_type))
    }

    async fn grow_filesystem(&self, device: &str) -> SetupResult<()> {
        self.exec_ok("sudo", &["resize2fs", "-f", device]).await?;
        Ok(())
    }

    async fn format(&self, device: &str, owner: Owner) -> SetupResult<()> {
        let root_owner = format!("root_owner={}", owner);
        self.exec_ok(
            "sudo",
            &[
                "mkfs.ext4",
                "-m0",
                "-E",
                root_owner.as_str(),
                "-Enodiscard,lazy_itable_init=1,lazy_journal_init=1",
                "-F",
                device,
            ],
        )
        .await?;
        Ok(())
    }

    async fn create_mount_point(&self, path: &Path) -> SetupResult<()> {
        self.exec_ok("mkdir", &["-p", path_arg(path)?]).await?;
        Ok(())
    }

    async fn mount(&self, device: &str, path: &Path) -> SetupResult<()> {
        self.exec_ok("sudo", &["mount", device, path_arg(path)?])
            .await?;
        Ok(())
    }

    async fn chown(&self, path: &Path, owner: Owner) -> SetupResult<()> {
        let spec = owner.to_string();
        self.exec_ok("sudo", &["chown", spec.as_str(), path_arg(path)?])
            .await?;
        Ok(())
    }

    async fn is_mounted(&self, path: &Path) -> SetupResult<bool> {
        match tokio::fs::read_to_string("/proc/mounts").await {
            Ok(mounts) => Ok(mounts_contain(&mounts, path)),
            Err(e) => {
                debug!("/proc/mounts unavailable ({}), asking mount", e);
                let listing = self.exec_ok("mount", &[]).await?;
                let needle = format!(" on {} ", path.display());
                Ok(listing.lines().any(|line| line.contains(&needle)))
            }
        }
    }

    async fn unmount(&self, path: &Path) -> SetupResult<()> {
        self.exec_ok("sudo", &["umount", path_arg(path)?]).await?;
        Ok(())
    }

    async fn used_bytes(&self, path: &Path) -> SetupResult<u64> {
        let stdout = self
            .exec_ok("df", &["-B1", "--output=used", path_arg(path)?])
            .await?;
        parse_df_used(&stdout).ok_or_else(|| {
            SetupError::command_exec("df", format!("unexpected output '{}'", stdout.trim()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTS: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/vda1 / ext4 rw,relatime 0 0
/dev/vdb /home/runner/.cache/bazel-repo ext4 rw,relatime 0 0
/dev/vdc /home/runner/with\\040space ext4 rw,relatime 0 0
";

    #[test]
    fn finds_mount_targets() {
        assert!(mounts_contain(MOUNTS, Path::new("/home/runner/.cache/bazel-repo")));
        assert!(mounts_contain(MOUNTS, Path::new("/home/runner/with space")));
        assert!(!mounts_contain(MOUNTS, Path::new("/home/runner/.cache")));
        assert!(!mounts_contain(MOUNTS, Path::new("/home/runner/.cache/bazel-disk")));
    }

    #[test]
    fn parses_df_output() {
        assert_eq!(parse_df_used("     Used\n123456789\n"), Some(123_456_789));
        assert_eq!(parse_df_used("Used\n"), None);
        assert_eq!(parse_df_used(""), None);
    }

    #[test]
    fn owner_formats_as_chown_spec() {
        let owner = Owner { uid: 1001, gid: 118 };
        assert_eq!(owner.to_string(), "1001:118");
    }
}
