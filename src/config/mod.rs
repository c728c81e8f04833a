//! Configuration management for setup-bazel

pub mod resolve;
pub mod schema;

pub use resolve::{CacheCategory, Config, ExternalCacheConfig, HostEnv, Platform};
pub use schema::{ExternalCacheInput, Inputs, OptionValue, SavePolicy};

use crate::error::{SetupError, SetupResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Configuration manager
///
/// Loads raw inputs from an optional TOML file, overlays action inputs from
/// the environment and resolves them into a [`Config`].
pub struct ConfigManager {
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create a config manager without a config file
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a config manager reading a TOML file
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            config_path: Some(path),
        }
    }

    /// Load raw inputs from the config file, or defaults when there is none
    pub async fn load(&self) -> SetupResult<Inputs> {
        match &self.config_path {
            Some(path) if path.exists() => self.load_from_file(path).await,
            Some(path) => Err(SetupError::PathNotFound(path.clone())),
            None => {
                debug!("No config file given, using defaults");
                Ok(Inputs::default())
            }
        }
    }

    /// Load raw inputs from a specific file
    pub async fn load_from_file(&self, path: &Path) -> SetupResult<Inputs> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| SetupError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| SetupError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load, overlay process environment, and resolve
    pub async fn load_resolved(&self) -> SetupResult<Config> {
        let inputs = self.load().await?;
        let inputs = apply_action_inputs(inputs, |name| std::env::var(name).ok())?;
        Config::resolve(inputs, &HostEnv::detect()?)
    }

    /// Get the config file path
    pub fn path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Look up an action input, `INPUT_<NAME>` with hyphens kept or underscored.
///
/// Empty values count as unset, as the runner exports every declared input.
fn action_input(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    let upper = name.to_uppercase();
    lookup(&format!("INPUT_{}", upper))
        .or_else(|| lookup(&format!("INPUT_{}", upper.replace('-', "_"))))
        .filter(|v| !v.trim().is_empty())
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> SetupResult<T> {
    raw.trim().parse().map_err(|_| SetupError::InputInvalid {
        name: name.to_string(),
        reason: format!("expected a number, got '{}'", raw.trim()),
    })
}

/// Overlay action inputs onto inputs loaded from file.
///
/// `lookup` reads an environment variable; tests inject a map.
pub fn apply_action_inputs(
    mut inputs: Inputs,
    lookup: impl Fn(&str) -> Option<String>,
) -> SetupResult<Inputs> {
    let get = |name: &str| action_input(&lookup, name);

    if let Some(v) = get("bazelisk-version") {
        inputs.bazelisk_version = Some(v.trim().to_string());
    }
    if let Some(v) = get("cache-version") {
        inputs.cache_version = Some(v.trim().to_string());
    }
    if let Some(v) = get("key-prefix") {
        inputs.key_prefix = Some(v.trim().to_string());
    }
    if let Some(v) = get("bazelrc") {
        inputs.bazelrc = v
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(v) = get("google-credentials") {
        inputs.google_credentials = Some(v);
    }
    if let Some(v) = get("output-base") {
        inputs.output_base = Some(PathBuf::from(v.trim()));
    }
    if let Some(v) = get("module-root") {
        inputs.module_root = Some(PathBuf::from(v.trim()));
    }
    if let Some(v) = get("blob-cache-dir") {
        inputs.blob_cache_dir = Some(PathBuf::from(v.trim()));
    }

    for (name, slot) in [
        ("key-include-arch", &mut inputs.key_include_arch),
        ("bazelisk-cache", &mut inputs.bazelisk_cache),
        ("disk-cache", &mut inputs.disk_cache),
        ("repository-cache", &mut inputs.repository_cache),
        ("sticky-disk", &mut inputs.sticky_disk),
        ("follow-symlinks", &mut inputs.follow_symlinks),
    ] {
        if let Some(v) = get(name) {
            *slot = Some(OptionValue::from_input(&v));
        }
    }

    if let Some(v) = get("disk-cache-max-size") {
        inputs.disk_cache_max_size = Some(parse_number("disk-cache-max-size", &v)?);
    }
    if let Some(v) = get("restore-timeout-secs") {
        inputs.restore_timeout_secs = Some(parse_number("restore-timeout-secs", &v)?);
    }
    if let Some(v) = get("save-policy") {
        inputs.save_policy = Some(SavePolicy::from_input(&v)?);
    }
    if let Some(v) = get("external-cache") {
        inputs.external_cache = ExternalCacheInput::from_input(&v)?;
    }

    Ok(inputs)
}
