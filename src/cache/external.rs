//! Caches for external repositories discovered through a manifest
//!
//! The set of external repositories is only known after a build, so the
//! post-phase writes the list of saved names into a manifest which is itself
//! cached. The next pre-phase restores the manifest first and then one cache
//! per listed name.

use crate::cache::gateway::{CacheGateway, RestoreOutcome, SaveOutcome};
use crate::cache::size::{bytes_to_mb, folder_size};
use crate::config::{CacheCategory, ExternalCacheConfig};
use crate::error::{SetupError, SetupResult};
use std::fs;
use tracing::{debug, info, warn};

/// Parse manifest content into names, one per line
pub fn parse_manifest(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Restore the manifest and every external cache it lists.
///
/// Returns the names whose restore was attempted.
pub async fn restore_all(
    gateway: &CacheGateway,
    external: &ExternalCacheConfig,
) -> SetupResult<Vec<String>> {
    if !external.enabled {
        return Ok(vec![]);
    }

    let outcome = gateway.restore_category(&external.manifest).await?;
    if outcome.matched_key().is_none() {
        info!("No external cache manifest found");
        return Ok(vec![]);
    }

    let manifest_path = external.manifest_path();
    let content = match fs::read_to_string(manifest_path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read {}: {}", manifest_path.display(), e);
            return Ok(vec![]);
        }
    };

    let mut names = Vec::new();
    let mut categories: Vec<CacheCategory> = Vec::new();
    for name in parse_manifest(&content) {
        let category = external.category_for(&name);
        if category.enabled {
            names.push(name);
            categories.push(category);
        } else {
            info!("Skipping disabled external cache {}", name);
        }
    }

    let outcomes = gateway.restore_batch(&categories).await;
    for (category, outcome) in categories.iter().zip(&outcomes) {
        if let RestoreOutcome::Miss = outcome {
            debug!("No cache for {}", category.name);
        }
    }

    Ok(names)
}

/// Save every external repository above the size threshold, then the
/// manifest listing them.
///
/// Returns the names written to the manifest.
pub async fn save_all(
    gateway: &CacheGateway,
    external: &ExternalCacheConfig,
) -> SetupResult<Vec<String>> {
    if !external.enabled {
        return Ok(vec![]);
    }

    let mut names = discover(external)?;
    names.sort();

    let categories: Vec<CacheCategory> = names
        .iter()
        .map(|name| external.category_for(name))
        .collect();
    let outcomes = gateway.save_batch(&categories).await;
    for (category, outcome) in categories.iter().zip(&outcomes) {
        if let Some(SaveOutcome::Saved(key)) = outcome {
            debug!("Saved {} as {}", category.name, key);
        }
    }

    if names.is_empty() {
        info!("No external repositories above {} MB", external.min_size_mb);
        return Ok(names);
    }

    let manifest_path = external.manifest_path();
    if let Some(parent) = manifest_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| SetupError::io(format!("creating {}", parent.display()), e))?;
    }
    fs::write(manifest_path, names.join("\n"))
        .map_err(|e| SetupError::io(format!("writing {}", manifest_path.display()), e))?;

    gateway.save_category(&external.manifest).await?;
    Ok(names)
}

/// Names of external repositories worth caching
fn discover(external: &ExternalCacheConfig) -> SetupResult<Vec<String>> {
    let dir = &external.external_dir;
    if !dir.exists() {
        info!("No external repositories under {}", dir.display());
        return Ok(vec![]);
    }
    let read_dir =
        fs::read_dir(dir).map_err(|e| SetupError::io(format!("reading {}", dir.display()), e))?;

    let mut names = Vec::new();
    for entry in read_dir.filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };

        let size_mb = match folder_size(&path) {
            Ok(bytes) => bytes_to_mb(bytes),
            Err(e) => {
                warn!("Skipping {}: {}", name, e);
                continue;
            }
        };
        if size_mb < external.min_size_mb {
            debug!("Skipping {} ({:.2} MB)", name, size_mb);
            continue;
        }
        if !external.category_for(&name).enabled {
            info!("Skipping disabled external cache {}", name);
            continue;
        }
        names.push(name);
    }
    Ok(names)
}
