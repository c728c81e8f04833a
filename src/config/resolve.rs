//! Canonical configuration
//!
//! [`Config`] is built once from [`Inputs`] and the host environment and is
//! passed explicitly to every component afterwards.

use crate::config::schema::{ExternalCacheInput, Inputs, OptionValue, SavePolicy};
use crate::error::{SetupError, SetupResult};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bazel module marker files, used as the default file set for module caches
pub const MODULE_FILES: &[&str] = &[
    "MODULE.bazel",
    "WORKSPACE.bazel",
    "WORKSPACE.bzlmod",
    "WORKSPACE",
];

/// Default external cache size threshold in MB
pub const DEFAULT_EXTERNAL_MIN_SIZE_MB: f64 = 10.0;

/// Default transfer timeout for a single restore
pub const DEFAULT_RESTORE_TIMEOUT_SECS: u64 = 300;

/// Operating system, named the way cache keys have always named it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Darwin,
    Win32,
    Other(String),
}

impl Platform {
    /// Detect the current platform
    pub fn detect() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    /// Map a Rust target OS name
    pub fn from_os(os: &str) -> Self {
        match os {
            "linux" => Self::Linux,
            "macos" => Self::Darwin,
            "windows" => Self::Win32,
            other => Self::Other(other.to_string()),
        }
    }

    /// Name used inside cache keys
    pub fn key_name(&self) -> &str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Win32 => "win32",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_name())
    }
}

/// Map a Rust target arch name to the name used in cache keys
pub fn key_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "ia32",
        other => other,
    }
}

/// Facts about the host that configuration depends on
#[derive(Debug, Clone)]
pub struct HostEnv {
    pub home: PathBuf,
    pub cache_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub platform: Platform,
    pub arch: String,
    pub workspace: PathBuf,
    pub workflow: String,
    pub job: String,
    /// `$HOME` when it differs from the profile directory (Windows runners)
    pub home_env: Option<PathBuf>,
}

impl HostEnv {
    /// Detect the host environment of the current process
    pub fn detect() -> SetupResult<Self> {
        let home = dirs::home_dir().ok_or(SetupError::HomeDirMissing)?;
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| home.join(".cache"));
        let workspace = match std::env::var_os("GITHUB_WORKSPACE") {
            Some(ws) => PathBuf::from(ws),
            None => std::env::current_dir()
                .map_err(|e| SetupError::io("getting current directory", e))?,
        };

        Ok(Self {
            home,
            cache_dir,
            temp_dir: std::env::temp_dir(),
            platform: Platform::detect(),
            arch: std::env::consts::ARCH.to_string(),
            workspace,
            workflow: std::env::var("GITHUB_WORKFLOW").unwrap_or_default(),
            job: std::env::var("GITHUB_JOB").unwrap_or_default(),
            home_env: std::env::var_os("HOME").map(PathBuf::from),
        })
    }
}

/// One logical named cache
#[derive(Debug, Clone, PartialEq)]
pub struct CacheCategory {
    pub enabled: bool,
    pub name: String,
    pub file_patterns: Vec<String>,
    pub mount_paths: Vec<PathBuf>,
    pub max_size_bytes: Option<u64>,
}

impl CacheCategory {
    /// A disabled placeholder category
    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            enabled: false,
            name: name.into(),
            file_patterns: vec![],
            mount_paths: vec![],
            max_size_bytes: None,
        }
    }
}

/// Per-name override for an external cache
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalOverride {
    pub enabled: Option<bool>,
    pub files: Option<Vec<String>>,
}

/// External dependency caches discovered through a manifest
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalCacheConfig {
    pub enabled: bool,
    pub min_size_mb: f64,
    /// Category holding the newline-delimited list of names
    pub manifest: CacheCategory,
    pub default_files: Vec<String>,
    /// `<output-base>/external`
    pub external_dir: PathBuf,
    pub overrides: BTreeMap<String, ExternalOverride>,
}

impl ExternalCacheConfig {
    /// Category for one discovered external repository
    pub fn category_for(&self, name: &str) -> CacheCategory {
        let entry = self.overrides.get(name);
        CacheCategory {
            enabled: entry.and_then(|o| o.enabled).unwrap_or(true),
            name: format!("external-{}", name),
            file_patterns: entry
                .and_then(|o| o.files.clone())
                .unwrap_or_else(|| self.default_files.clone()),
            mount_paths: vec![
                self.external_dir.join(format!("@{}.marker", name)),
                self.external_dir.join(name),
            ],
            max_size_bytes: None,
        }
    }

    /// Path of the manifest file
    pub fn manifest_path(&self) -> &Path {
        &self.manifest.mount_paths[0]
    }
}

/// Well-known paths
#[derive(Debug, Clone, PartialEq)]
pub struct Paths {
    pub output_base: PathBuf,
    pub external: PathBuf,
    pub bazelrc: Vec<PathBuf>,
}

/// Fully resolved, immutable configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub base_key: String,
    pub bazelisk_version: Option<String>,
    pub bazelrc: Vec<String>,
    pub bazelisk: CacheCategory,
    pub disk: CacheCategory,
    pub repository: CacheCategory,
    pub external: ExternalCacheConfig,
    pub paths: Paths,
    pub platform: Platform,
    pub module_root: PathBuf,
    pub temp_dir: PathBuf,
    pub google_credentials: Option<String>,
    pub sticky_disk: bool,
    pub follow_symlinks: bool,
    pub restore_timeout: Duration,
    pub save_policy: SavePolicy,
    pub blob_cache_dir: PathBuf,
}

impl Config {
    /// Resolve raw inputs into the canonical configuration
    pub fn resolve(inputs: Inputs, env: &HostEnv) -> SetupResult<Self> {
        let cache_version = inputs.cache_version.unwrap_or_else(|| "1".to_string());
        let prefix = inputs
            .key_prefix
            .unwrap_or_else(|| "setup-bazel".to_string());
        let include_arch = bool_input(&inputs.key_include_arch, "key-include-arch", false)?;

        let mut base_key = format!("{}-{}-{}", prefix, cache_version, env.platform);
        if include_arch {
            base_key = format!("{}-{}", base_key, key_arch(&env.arch));
        }

        let (disk_path, repo_path, output_base) = match env.platform {
            Platform::Win32 => (
                PathBuf::from("D:/_bazel-disk"),
                PathBuf::from("D:/_bazel-repo"),
                PathBuf::from("D:/_bazel"),
            ),
            _ => (
                env.home.join(".cache").join("bazel-disk"),
                env.home.join(".cache").join("bazel-repo"),
                env.home.join(".bazel"),
            ),
        };
        let output_base = inputs.output_base.unwrap_or(output_base);
        let external_dir = output_base.join("external");

        let mut bazelrc_paths = vec![env.home.join(".bazelrc")];
        if env.platform == Platform::Win32 {
            if let Some(home) = &env.home_env {
                let extra = home.join(".bazelrc");
                if !bazelrc_paths.contains(&extra) {
                    bazelrc_paths.push(extra);
                }
            }
        }

        let mut bazelrc = inputs.bazelrc;

        let bazelisk = CacheCategory {
            enabled: bool_input(&inputs.bazelisk_cache, "bazelisk-cache", true)?,
            name: "bazelisk".to_string(),
            file_patterns: vec![".bazelversion".to_string()],
            mount_paths: vec![env.cache_dir.join("bazelisk")],
            max_size_bytes: None,
        };

        let disk = match inputs.disk_cache.map(OptionValue::normalized) {
            None | Some(OptionValue::Bool(false)) => CacheCategory::disabled("disk"),
            Some(OptionValue::Bool(true)) => disk_category("disk".to_string(), &disk_path),
            Some(OptionValue::Text(suffix)) if suffix.is_empty() => {
                CacheCategory::disabled("disk")
            }
            Some(OptionValue::Text(suffix)) => {
                disk_category(format!("disk-{}", suffix), &disk_path)
            }
            Some(OptionValue::List(_)) => {
                return Err(SetupError::InputInvalid {
                    name: "disk-cache".to_string(),
                    reason: "expected a boolean or a cache name, got a list".to_string(),
                })
            }
        };
        let disk = CacheCategory {
            max_size_bytes: match inputs.disk_cache_max_size {
                Some(gib) if gib <= 0.0 || !gib.is_finite() => {
                    return Err(SetupError::InputInvalid {
                        name: "disk-cache-max-size".to_string(),
                        reason: format!("expected a positive size in GiB, got {}", gib),
                    })
                }
                Some(gib) => Some(gib_to_bytes(gib)),
                None => None,
            },
            ..disk
        };
        if disk.enabled {
            bazelrc.push(format!("build --disk_cache={}", disk_path.display()));
        }

        let repository = match inputs.repository_cache.map(OptionValue::normalized) {
            None | Some(OptionValue::Bool(false)) => CacheCategory::disabled("repository"),
            Some(value) => CacheCategory {
                enabled: true,
                name: "repository".to_string(),
                file_patterns: value
                    .as_files()
                    .unwrap_or_else(|| MODULE_FILES.iter().map(|s| s.to_string()).collect()),
                mount_paths: vec![repo_path.clone()],
                max_size_bytes: None,
            },
        };
        if repository.enabled {
            bazelrc.push(format!("build --repository_cache={}", repo_path.display()));
        }

        let external = resolve_external(inputs.external_cache, env, &external_dir)?;

        Ok(Self {
            base_key,
            bazelisk_version: inputs.bazelisk_version.filter(|v| !v.is_empty()),
            bazelrc,
            bazelisk,
            disk,
            repository,
            external,
            paths: Paths {
                output_base,
                external: external_dir,
                bazelrc: bazelrc_paths,
            },
            platform: env.platform.clone(),
            module_root: inputs
                .module_root
                .unwrap_or_else(|| env.workspace.clone()),
            temp_dir: env.temp_dir.clone(),
            google_credentials: inputs.google_credentials.filter(|c| !c.is_empty()),
            sticky_disk: bool_input(&inputs.sticky_disk, "sticky-disk", false)?,
            follow_symlinks: bool_input(&inputs.follow_symlinks, "follow-symlinks", false)?,
            restore_timeout: Duration::from_secs(
                inputs
                    .restore_timeout_secs
                    .unwrap_or(DEFAULT_RESTORE_TIMEOUT_SECS),
            ),
            save_policy: inputs.save_policy.unwrap_or_default(),
            blob_cache_dir: inputs
                .blob_cache_dir
                .unwrap_or_else(|| env.cache_dir.join("setup-bazel").join("blobs")),
        })
    }

    /// The fixed categories restored or mounted in the pre-phase
    pub fn categories(&self) -> [&CacheCategory; 3] {
        [&self.bazelisk, &self.disk, &self.repository]
    }
}

fn bool_input(value: &Option<OptionValue>, name: &str, default: bool) -> SetupResult<bool> {
    match value {
        Some(v) => v.as_bool(name),
        None => Ok(default),
    }
}

fn disk_category(name: String, path: &Path) -> CacheCategory {
    CacheCategory {
        enabled: true,
        name,
        file_patterns: vec!["**/BUILD.bazel".to_string(), "**/BUILD".to_string()],
        mount_paths: vec![path.to_path_buf()],
        max_size_bytes: None,
    }
}

/// Convert GiB to bytes
pub fn gib_to_bytes(gib: f64) -> u64 {
    (gib * 1024.0 * 1024.0 * 1024.0) as u64
}

/// Default manifest name: `<workflow>-<job>` with spaces and slashes dashed
fn default_manifest_name(workflow: &str, job: &str) -> String {
    let workflow: String = workflow
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '/' { '-' } else { c })
        .collect();
    format!("{}-{}", workflow, job)
}

fn resolve_external(
    input: Option<ExternalCacheInput>,
    env: &HostEnv,
    external_dir: &Path,
) -> SetupResult<ExternalCacheConfig> {
    let enabled = input.is_some();
    let input = input.unwrap_or_default();
    let manifest_name = input
        .name
        .clone()
        .unwrap_or_else(|| default_manifest_name(&env.workflow, &env.job));
    let module_files: Vec<String> = MODULE_FILES.iter().map(|s| s.to_string()).collect();

    let mut overrides = BTreeMap::new();
    for (name, value) in input.manifest {
        let entry = match value.normalized() {
            OptionValue::Bool(enabled) => ExternalOverride {
                enabled: Some(enabled),
                files: None,
            },
            other => ExternalOverride {
                enabled: Some(true),
                files: other.as_files(),
            },
        };
        overrides.insert(name, entry);
    }

    let min_size_mb = input.min_size.unwrap_or(DEFAULT_EXTERNAL_MIN_SIZE_MB);
    if min_size_mb.is_nan() || min_size_mb < 0.0 {
        return Err(SetupError::InputInvalid {
            name: "external-cache.min-size".to_string(),
            reason: format!("expected a non-negative size in MB, got {}", min_size_mb),
        });
    }

    Ok(ExternalCacheConfig {
        enabled,
        min_size_mb,
        manifest: CacheCategory {
            enabled,
            name: format!("external-{}-manifest", manifest_name),
            file_patterns: module_files.clone(),
            mount_paths: vec![env.temp_dir.join("external-cache-manifest.txt")],
            max_size_bytes: None,
        },
        default_files: module_files,
        external_dir: external_dir.to_path_buf(),
        overrides,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn host_env(root: &Path) -> HostEnv {
        HostEnv {
            home: root.join("home"),
            cache_dir: root.join("home").join(".cache"),
            temp_dir: root.join("tmp"),
            platform: Platform::Linux,
            arch: "x86_64".to_string(),
            workspace: root.join("workspace"),
            workflow: "CI Build/Test".to_string(),
            job: "build".to_string(),
            home_env: None,
        }
    }

    #[test]
    fn defaults_resolve() {
        let env = host_env(Path::new("/r"));
        let config = Config::resolve(Inputs::default(), &env).unwrap();

        assert_eq!(config.base_key, "setup-bazel-1-linux");
        assert!(config.bazelisk.enabled);
        assert!(!config.disk.enabled);
        assert!(!config.repository.enabled);
        assert!(!config.external.enabled);
        assert!(config.bazelrc.is_empty());
        assert_eq!(config.module_root, PathBuf::from("/r/workspace"));
        assert_eq!(config.paths.bazelrc, vec![PathBuf::from("/r/home/.bazelrc")]);
        assert_eq!(config.restore_timeout, Duration::from_secs(300));
    }

    #[test]
    fn base_key_with_prefix_and_arch() {
        let env = host_env(Path::new("/r"));
        let inputs = Inputs {
            key_prefix: Some("setup".to_string()),
            key_include_arch: Some(OptionValue::Bool(true)),
            ..Default::default()
        };
        let config = Config::resolve(inputs, &env).unwrap();
        assert_eq!(config.base_key, "setup-1-linux-x64");
    }

    #[test]
    fn disk_cache_shapes() {
        let env = host_env(Path::new("/r"));

        let named = Config::resolve(
            Inputs {
                disk_cache: Some(OptionValue::Text("remote".to_string())),
                disk_cache_max_size: Some(2.0),
                ..Default::default()
            },
            &env,
        )
        .unwrap();
        assert_eq!(named.disk.name, "disk-remote");
        assert_eq!(named.disk.max_size_bytes, Some(2 * 1024 * 1024 * 1024));
        assert_eq!(
            named.bazelrc,
            vec!["build --disk_cache=/r/home/.cache/bazel-disk".to_string()]
        );

        let plain = Config::resolve(
            Inputs {
                disk_cache: Some(OptionValue::Text("true".to_string())),
                ..Default::default()
            },
            &env,
        )
        .unwrap();
        assert_eq!(plain.disk.name, "disk");

        let err = Config::resolve(
            Inputs {
                disk_cache: Some(OptionValue::List(vec!["a".to_string()])),
                ..Default::default()
            },
            &env,
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn repository_cache_files_override() {
        let env = host_env(Path::new("/r"));
        let config = Config::resolve(
            Inputs {
                repository_cache: Some(OptionValue::Text("deps.bzl".to_string())),
                ..Default::default()
            },
            &env,
        )
        .unwrap();
        assert!(config.repository.enabled);
        assert_eq!(config.repository.file_patterns, vec!["deps.bzl".to_string()]);
        assert!(config.bazelrc[0].starts_with("build --repository_cache="));
    }

    #[test]
    fn boolean_only_option_rejects_text() {
        let env = host_env(Path::new("/r"));
        let err = Config::resolve(
            Inputs {
                bazelisk_cache: Some(OptionValue::Text("enabled".to_string())),
                ..Default::default()
            },
            &env,
        )
        .unwrap_err();
        assert!(matches!(err, SetupError::InputInvalid { ref name, .. } if name == "bazelisk-cache"));
    }

    #[test]
    fn external_cache_manifest_and_overrides() {
        let env = host_env(Path::new("/r"));
        let mut manifest = BTreeMap::new();
        manifest.insert("foo".to_string(), OptionValue::Bool(false));
        manifest.insert(
            "bar".to_string(),
            OptionValue::List(vec!["bar.lock".to_string()]),
        );
        let config = Config::resolve(
            Inputs {
                external_cache: Some(ExternalCacheInput {
                    manifest,
                    ..Default::default()
                }),
                ..Default::default()
            },
            &env,
        )
        .unwrap();

        let external = &config.external;
        assert!(external.enabled);
        assert_eq!(external.manifest.name, "external-ci-build-test-build-manifest");
        assert_eq!(
            external.manifest_path(),
            Path::new("/r/tmp/external-cache-manifest.txt")
        );

        let foo = external.category_for("foo");
        assert!(!foo.enabled);
        assert_eq!(foo.name, "external-foo");

        let bar = external.category_for("bar");
        assert!(bar.enabled);
        assert_eq!(bar.file_patterns, vec!["bar.lock".to_string()]);

        let baz = external.category_for("baz");
        assert!(baz.enabled);
        assert_eq!(baz.file_patterns.len(), MODULE_FILES.len());
        assert_eq!(
            baz.mount_paths,
            vec![
                PathBuf::from("/r/home/.bazel/external/@baz.marker"),
                PathBuf::from("/r/home/.bazel/external/baz"),
            ]
        );
    }

    #[test]
    fn windows_paths() {
        let mut env = host_env(Path::new("/r"));
        env.platform = Platform::Win32;
        env.home_env = Some(PathBuf::from("/c/Users/runner"));
        let config = Config::resolve(
            Inputs {
                disk_cache: Some(OptionValue::Bool(true)),
                ..Default::default()
            },
            &env,
        )
        .unwrap();

        assert_eq!(config.base_key, "setup-bazel-1-win32");
        assert_eq!(config.disk.mount_paths, vec![PathBuf::from("D:/_bazel-disk")]);
        assert_eq!(config.paths.output_base, PathBuf::from("D:/_bazel"));
        assert_eq!(config.paths.bazelrc.len(), 2);
    }

    #[test]
    fn platform_names() {
        assert_eq!(Platform::from_os("macos").key_name(), "darwin");
        assert_eq!(Platform::from_os("windows").to_string(), "win32");
        assert_eq!(key_arch("aarch64"), "arm64");
    }
}
