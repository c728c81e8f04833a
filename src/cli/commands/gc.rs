//! Gc command - collect garbage in a cache directory outside of a run

use crate::cache::gc;
use crate::cli::args::GcArgs;
use crate::config::resolve::gib_to_bytes;
use crate::config::CacheCategory;
use crate::error::{SetupError, SetupResult};
use crate::ui::{self, UiContext};

/// Execute the gc command
pub async fn execute(args: GcArgs) -> SetupResult<()> {
    if !(args.max_size > 0.0 && args.max_size.is_finite()) {
        return Err(SetupError::InputInvalid {
            name: "max-size".to_string(),
            reason: format!("expected a positive size in GiB, got {}", args.max_size),
        });
    }

    let ctx = UiContext::detect();
    let category = CacheCategory {
        enabled: true,
        name: args
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "disk".to_string()),
        file_patterns: vec![],
        mount_paths: vec![args.dir.clone()],
        max_size_bytes: Some(gib_to_bytes(args.max_size)),
    };

    let init = args.init;
    let changed = tokio::task::spawn_blocking(move || {
        if init {
            gc::init(&category).map(|()| None)
        } else {
            gc::run(&category)
        }
    })
    .await
    .map_err(|e| SetupError::Internal(format!("gc task failed: {}", e)))??;

    if init {
        ui::step_ok(&ctx, &format!("Recorded baseline for {}", args.dir.display()));
    } else {
        match changed {
            Some(hash) => ui::key_value(&ctx, "changed", &hash),
            None => ui::step_info(&ctx, "unchanged"),
        }
    }
    Ok(())
}
