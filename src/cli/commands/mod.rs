//! CLI command implementations

pub mod gc;
pub mod hash;
pub mod post;
pub mod pre;

pub use gc::execute as gc;
pub use hash::execute as hash;
pub use post::execute as post;
pub use pre::execute as pre;

use crate::cache::{BlobCache, CacheGateway, LocalBlobCache};
use crate::config::Config;
use crate::error::SetupResult;
use crate::state::{self, MemoryState, SharedState};
use crate::stickydisk::{
    GrpcStickyDiskService, StickyDiskContext, StickyDiskController, SudoHostOps,
};
use crate::ui;
use std::sync::Arc;
use tracing::debug;

/// Collaborators shared by the pre- and post-phase
pub struct PhaseServices {
    pub state: SharedState,
    pub gateway: CacheGateway,
    /// Present only in sticky disk mode
    pub sticky: Option<StickyDiskController>,
}

impl PhaseServices {
    /// Wire up the production services for `config`.
    ///
    /// Neither an unreadable state store nor an unreachable sticky disk
    /// service fails the phase: they degrade to in-memory state and to no
    /// sticky disks respectively.
    pub fn from_env(config: &Config) -> Self {
        let state = match state::detect() {
            Ok(state) => state,
            Err(e) => {
                ui::warning(&format!("Failed to open run state, continuing without it: {}", e));
                Arc::new(MemoryState::new())
            }
        };
        let blobs: Arc<dyn BlobCache> = Arc::new(LocalBlobCache::new(&config.blob_cache_dir));
        debug!("Blob cache at {}", config.blob_cache_dir.display());

        let sticky = if config.sticky_disk {
            match GrpcStickyDiskService::connect_lazy(StickyDiskContext::from_env()) {
                Ok(service) => Some(StickyDiskController::new(
                    Arc::new(service),
                    Arc::new(SudoHostOps::new()),
                )),
                Err(e) => {
                    ui::warning(&format!("Sticky disk service unavailable: {}", e));
                    None
                }
            }
        } else {
            None
        };

        Self::new(state, blobs, config, sticky)
    }

    /// Assemble services from parts
    pub fn new(
        state: SharedState,
        blobs: Arc<dyn BlobCache>,
        config: &Config,
        sticky: Option<StickyDiskController>,
    ) -> Self {
        Self {
            gateway: CacheGateway::new(blobs, state.clone(), config),
            state,
            sticky,
        }
    }
}

/// Keep a phase result only if it is fatal; anything else becomes a warning
/// so that caching never fails the build
pub fn absorb_non_fatal(result: SetupResult<()>) -> SetupResult<()> {
    match result {
        Err(e) if !e.is_fatal() => {
            ui::warning(&format!("Continuing without caches: {}", e));
            Ok(())
        }
        other => other,
    }
}
