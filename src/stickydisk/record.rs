//! Mount records handed from the pre-phase to the post-phase

use crate::error::SetupResult;
use crate::state::{StateStore, STICKY_DISK_MOUNTS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// A mounted sticky disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountRecord {
    /// Block device the disk was exposed as
    pub device: String,
    /// Handle used to commit or discard the disk
    pub expose_id: String,
    pub sticky_disk_key: String,
}

/// Every mounted disk of a run, keyed by mount path
pub type MountMap = BTreeMap<PathBuf, MountRecord>;

/// Persist the mount map for the post-phase
pub fn save_mounts(state: &dyn StateStore, mounts: &MountMap) -> SetupResult<()> {
    let json = serde_json::to_string(mounts)?;
    debug!("Persisting {} sticky disk mounts", mounts.len());
    state.set(STICKY_DISK_MOUNTS, &json)
}

/// Read the mount map written by the pre-phase; absent state is empty
pub fn load_mounts(state: &dyn StateStore) -> SetupResult<MountMap> {
    match state.get(STICKY_DISK_MOUNTS) {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(MountMap::new()),
    }
}
