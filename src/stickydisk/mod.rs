//! Sticky disks: persistent block devices mounted over cache directories
//!
//! In sticky disk mode the pre-phase mounts a remotely provisioned volume on
//! each cache path instead of restoring an archive. The mount map is the
//! only thing the post-phase learns about those mounts.

pub mod controller;
pub mod host;
pub mod record;
pub mod service;

pub use controller::{
    sticky_disk_key, Finalization, MountStage, RetryPolicy, StickyDiskController,
};
pub use host::{HostOps, Owner, SudoHostOps};
pub use record::{load_mounts, save_mounts, MountMap, MountRecord};
pub use service::{GrpcStickyDiskService, StickyDiskContext, StickyDiskService};
