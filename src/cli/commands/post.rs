//! Post-phase: collect garbage, then save caches or finalize sticky disks

use crate::cache::{external, gc};
use crate::cli::commands::PhaseServices;
use crate::config::{CacheCategory, Config};
use crate::credentials::GoogleCredentials;
use crate::error::SetupResult;
use crate::state;
use crate::stickydisk::{load_mounts, MountMap, MountStage, StickyDiskController};
use crate::ui::{self, UiContext};
use tracing::{debug, info};

/// Execute the post-phase with production services
pub async fn execute(config: Config) -> SetupResult<()> {
    let services = PhaseServices::from_env(&config);
    run(config, &services).await
}

/// Run the post-phase against the given services.
///
/// Every step is best effort: failures are reported as warnings so that one
/// broken cache never hides the result of the build.
pub async fn run(config: Config, services: &PhaseServices) -> SetupResult<()> {
    let ctx = UiContext::detect();
    let failed = state::run_failed(services.state.as_ref());
    if failed {
        ui::step_info(&ctx, "Run was marked failed");
    }

    match &services.sticky {
        Some(controller) => finalize_sticky_disks(&config, controller, services, failed).await,
        None => save_categories(&config, services).await,
    }

    match external::save_all(&services.gateway, &config.external).await {
        Ok(saved) if !saved.is_empty() => info!("Saved {} external caches", saved.len()),
        Ok(_) => {}
        Err(e) => ui::warning(&format!("External cache save failed: {}", e)),
    }

    if let Err(e) = GoogleCredentials::remove(services.state.as_ref()) {
        ui::warning(&format!("Failed to remove google credentials: {}", e));
    }

    ui::step_ok(&ctx, "Caches finalized");
    Ok(())
}

/// Collect garbage in a bounded category; returns the new identity hash if
/// the content changed since the pre-phase
fn collect_garbage(category: &CacheCategory) -> Option<String> {
    match gc::run(category) {
        Ok(hash) => hash,
        Err(e) => {
            ui::warning(&format!(
                "Garbage collection of {} cache failed: {}",
                category.name, e
            ));
            None
        }
    }
}

async fn save_categories(config: &Config, services: &PhaseServices) {
    let mut unbounded = Vec::new();

    for category in config.categories() {
        if !category.enabled {
            continue;
        }
        if category.max_size_bytes.is_none() {
            unbounded.push(category.clone());
            continue;
        }

        let Some(hash) = collect_garbage(category) else {
            info!("{} cache unchanged, not saving", category.name);
            continue;
        };
        match services.gateway.save_with_hash(category, &hash).await {
            Ok(outcome) => debug!("{}: {:?}", category.name, outcome),
            Err(e) => ui::warning(&format!("Failed to save {} cache: {}", category.name, e)),
        }
    }

    services.gateway.save_batch(&unbounded).await;
}

async fn finalize_sticky_disks(
    config: &Config,
    controller: &StickyDiskController,
    services: &PhaseServices,
    failed: bool,
) {
    let mounts = match load_mounts(services.state.as_ref()) {
        Ok(mounts) => mounts,
        Err(e) => {
            ui::warning(&format!("Failed to read sticky disk mounts: {}", e));
            MountMap::new()
        }
    };
    if mounts.is_empty() {
        debug!("No sticky disks to finalize");
        return;
    }

    // Evict before the volume is unmounted and committed
    for category in config.categories() {
        if category.enabled && category.max_size_bytes.is_some() {
            collect_garbage(category);
        }
    }

    let results = controller.finalize_all(&mounts, failed).await;
    let finalized = results
        .iter()
        .filter(|(_, stage)| *stage == MountStage::Finalized)
        .count();
    info!("Finalized {} of {} sticky disks", finalized, results.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::gateway::tests::FakeBlobCache;
    use crate::cache::{BlobCache, LocalBlobCache};
    use crate::cli::commands::pre;
    use crate::cli::commands::pre::tests::{config, services, sticky_inputs};
    use crate::stickydisk::controller::tests::{controller, FakeHost, FakeService};
    use crate::config::{Inputs, OptionValue};
    use crate::state::{MemoryState, SharedState, StateStore, GOOGLE_CREDENTIALS_PATH};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn round_trip_restores_saved_repository_cache() {
        let dir = TempDir::new().unwrap();
        let config = config(
            dir.path(),
            Inputs {
                repository_cache: Some(OptionValue::Bool(true)),
                bazelisk_cache: Some(OptionValue::Bool(false)),
                ..Default::default()
            },
        );
        let blobs: Arc<dyn BlobCache> = Arc::new(LocalBlobCache::new(dir.path().join("blobs")));
        let repo = config.repository.mount_paths[0].clone();

        // First run: miss, build populates the cache, post saves it
        let first = services(Arc::new(MemoryState::new()), blobs.clone(), &config);
        pre::run(config.clone(), &first).await.unwrap();
        fs::create_dir_all(repo.join("content_addressable")).unwrap();
        fs::write(repo.join("content_addressable/blob"), "dep").unwrap();
        run(config.clone(), &first).await.unwrap();

        // Second run on a clean machine restores it
        fs::remove_dir_all(&repo).unwrap();
        let second_state: SharedState = Arc::new(MemoryState::new());
        let second = services(second_state.clone(), blobs, &config);
        pre::run(config.clone(), &second).await.unwrap();
        assert_eq!(
            fs::read_to_string(repo.join("content_addressable/blob")).unwrap(),
            "dep"
        );
        assert!(state::is_exact_hit(second_state.as_ref(), "repository"));
    }

    #[tokio::test]
    async fn unchanged_bounded_disk_cache_is_not_saved() {
        let dir = TempDir::new().unwrap();
        let config = config(
            dir.path(),
            Inputs {
                disk_cache: Some(OptionValue::Bool(true)),
                disk_cache_max_size: Some(1.0),
                bazelisk_cache: Some(OptionValue::Bool(false)),
                ..Default::default()
            },
        );
        let disk = config.disk.mount_paths[0].clone();
        fs::create_dir_all(&disk).unwrap();
        fs::write(disk.join("ac"), "x").unwrap();

        let blobs = Arc::new(FakeBlobCache::default());
        let services = services(Arc::new(MemoryState::new()), blobs.clone(), &config);
        pre::run(config.clone(), &services).await.unwrap();
        run(config.clone(), &services).await.unwrap();
        assert!(blobs.saves.lock().unwrap().is_empty());

        fs::write(disk.join("cas"), "y").unwrap();
        run(config, &services).await.unwrap();
        let saves = blobs.saves.lock().unwrap().clone();
        assert_eq!(saves.len(), 1);
        assert!(saves[0].starts_with("setup-bazel-1-linux-disk-"));
    }

    #[tokio::test]
    async fn removes_google_credentials() {
        let dir = TempDir::new().unwrap();
        let config = config(
            dir.path(),
            Inputs {
                google_credentials: Some("{\"type\":\"service_account\"}".to_string()),
                ..Default::default()
            },
        );
        let state: SharedState = Arc::new(MemoryState::new());
        let services = services(state.clone(), Arc::new(FakeBlobCache::default()), &config);

        pre::run(config.clone(), &services).await.unwrap();
        let key = PathBuf::from(state.get(GOOGLE_CREDENTIALS_PATH).unwrap());
        assert!(key.exists());

        run(config, &services).await.unwrap();
        assert!(!key.exists());
    }

    #[tokio::test]
    async fn failed_run_discards_sticky_disks() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path(), sticky_inputs());
        let store: SharedState = Arc::new(MemoryState::new());
        let service = Arc::new(FakeService::default());
        let host = Arc::new(FakeHost {
            mounted: true,
            used: 4096,
            ..Default::default()
        });
        let services = PhaseServices::new(
            store.clone(),
            Arc::new(FakeBlobCache::default()),
            &config,
            Some(controller(service.clone(), host)),
        );

        pre::run(config.clone(), &services).await.unwrap();
        state::mark_run_failed(store.as_ref()).unwrap();
        run(config, &services).await.unwrap();

        let commits = service.commits.lock().unwrap();
        assert_eq!(commits.len(), 3);
        assert!(commits.iter().all(|c| !c.should_commit));
        assert!(commits.iter().all(|c| c.fs_usage_bytes.is_none()));
    }

    #[tokio::test]
    async fn successful_run_commits_sticky_disks() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path(), sticky_inputs());
        let service = Arc::new(FakeService::default());
        let host = Arc::new(FakeHost {
            mounted: true,
            used: 4096,
            ..Default::default()
        });
        let services = PhaseServices::new(
            Arc::new(MemoryState::new()),
            Arc::new(FakeBlobCache::default()),
            &config,
            Some(controller(service.clone(), host)),
        );

        pre::run(config.clone(), &services).await.unwrap();
        run(config, &services).await.unwrap();

        let commits = service.commits.lock().unwrap();
        assert_eq!(commits.len(), 3);
        assert!(commits.iter().all(|c| c.should_commit));
        assert!(commits.iter().all(|c| c.fs_usage_bytes == Some(4096)));
    }
}
