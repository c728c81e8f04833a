//! Cross-phase state
//!
//! The pre-phase and post-phase run as separate processes. The only channel
//! between them is a flat string-keyed store written by the first and read
//! by the second.

mod store;

pub use store::{ActionsState, FileState, MemoryState};

use crate::error::SetupResult;
use std::sync::Arc;

/// Serialized sticky disk mount map
pub const STICKY_DISK_MOUNTS: &str = "sticky-disk-mounts";

/// Set to `true` when the run failed
pub const ACTION_FAILED: &str = "action-failed";

/// Path of the written google credentials file
pub const GOOGLE_CREDENTIALS_PATH: &str = "google-credentials-path";

/// Flat key-value store persisted between phases
pub trait StateStore: Send + Sync {
    /// Read a value; missing and empty values are both `None`
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, overwriting any previous one
    fn set(&self, key: &str, value: &str) -> SetupResult<()>;
}

/// Shared handle to a state store
pub type SharedState = Arc<dyn StateStore>;

/// State key recording an exact restore hit for a category
pub fn cache_hit_key(category: &str) -> String {
    format!("{}-cache-hit", category)
}

/// Record that `category` was restored from its primary key
pub fn mark_exact_hit(state: &dyn StateStore, category: &str) -> SetupResult<()> {
    state.set(&cache_hit_key(category), "true")
}

/// Whether `category` was restored from its primary key in this run
pub fn is_exact_hit(state: &dyn StateStore, category: &str) -> bool {
    state.get(&cache_hit_key(category)).as_deref() == Some("true")
}

/// Record that the run failed
pub fn mark_run_failed(state: &dyn StateStore) -> SetupResult<()> {
    state.set(ACTION_FAILED, "true")
}

/// Whether the run was marked failed
pub fn run_failed(state: &dyn StateStore) -> bool {
    state.get(ACTION_FAILED).as_deref() == Some("true")
}

/// Pick the store for this process: the runner's state file when present,
/// otherwise a JSON file.
pub fn detect() -> SetupResult<SharedState> {
    if let Some(state) = ActionsState::from_env() {
        return Ok(Arc::new(state));
    }
    Ok(Arc::new(FileState::open(FileState::default_path())?))
}
