//! Pre-phase: configure bazel, then restore or mount caches

use crate::bazelrc;
use crate::cache::{external, gc};
use crate::cli::commands::PhaseServices;
use crate::config::Config;
use crate::credentials::GoogleCredentials;
use crate::error::SetupResult;
use crate::stickydisk::{save_mounts, MountMap, StickyDiskController};
use crate::ui::{self, UiContext};
use futures_util::future::join_all;
use tracing::{debug, info};

/// Execute the pre-phase with production services
pub async fn execute(config: Config) -> SetupResult<()> {
    let services = PhaseServices::from_env(&config);
    run(config, &services).await
}

/// Run the pre-phase against the given services
pub async fn run(mut config: Config, services: &PhaseServices) -> SetupResult<()> {
    let ctx = UiContext::detect();

    {
        let _group = ui::group("Configure Bazel");
        print_summary(&ctx, &config);

        if let Some(credentials) = config.google_credentials.clone() {
            match GoogleCredentials::install(&credentials, &config.temp_dir, services.state.as_ref())
            {
                Ok(Some(path)) => config.bazelrc.push(GoogleCredentials::bazelrc_line(&path)),
                Ok(None) => {}
                Err(e) => ui::warning(&format!("Failed to write google credentials: {}", e)),
            }
        }

        bazelrc::write_all(
            &config.paths.bazelrc,
            &config.paths.output_base,
            &config.bazelrc,
        )?;
    }

    match &services.sticky {
        Some(controller) => mount_categories(&config, controller, services).await,
        None => {
            let categories: Vec<_> = config
                .categories()
                .into_iter()
                .filter(|c| c.enabled)
                .cloned()
                .collect();
            services.gateway.restore_batch(&categories).await;
        }
    }

    if config.disk.enabled && config.disk.max_size_bytes.is_some() {
        if let Err(e) = gc::init(&config.disk) {
            ui::warning(&format!("Failed to record {} cache hash: {}", config.disk.name, e));
        }
    }

    if let Err(e) = external::restore_all(&services.gateway, &config.external).await {
        ui::warning(&format!("External cache restore failed: {}", e));
    }

    ui::step_ok(&ctx, "Bazel configured");
    Ok(())
}

/// Mount a sticky disk on every enabled category path and persist the map.
///
/// Disks are keyed by the category's full cache key, so a change to the
/// category's file set provisions a fresh volume.
async fn mount_categories(
    config: &Config,
    controller: &StickyDiskController,
    services: &PhaseServices,
) {
    let attempts = config
        .categories()
        .into_iter()
        .filter(|category| category.enabled)
        .map(|category| async move {
            let key = match services.gateway.key_for(category).await {
                Ok(key) => key,
                Err(e) => {
                    ui::warning(&format!(
                        "Cannot derive {} cache key, not mounting: {}",
                        category.name, e
                    ));
                    return MountMap::new();
                }
            };
            controller.acquire_and_mount(category, &key.full()).await
        });

    let mut mounts = MountMap::new();
    for mounted in join_all(attempts).await {
        mounts.extend(mounted);
    }
    info!("Mounted {} sticky disks", mounts.len());

    if let Err(e) = save_mounts(services.state.as_ref(), &mounts) {
        ui::warning(&format!("Failed to persist sticky disk mounts: {}", e));
    }
}

fn print_summary(ctx: &UiContext, config: &Config) {
    ui::key_value(ctx, "base key", &config.base_key);
    ui::key_value(ctx, "output base", &config.paths.output_base.display().to_string());
    ui::key_value(ctx, "module root", &config.module_root.display().to_string());
    if let Some(version) = &config.bazelisk_version {
        ui::key_value(ctx, "bazelisk version", version);
    }
    for category in config.categories() {
        let status = if category.enabled { "enabled" } else { "disabled" };
        ui::key_value(ctx, &format!("{} cache", category.name), status);
    }
    if config.external.enabled {
        ui::key_value(ctx, "external manifest", &config.external.manifest.name);
    }
    ui::key_value(
        ctx,
        "mode",
        if config.sticky_disk { "sticky disk" } else { "cache" },
    );
    debug!("Resolved configuration: {:#?}", config);
}
