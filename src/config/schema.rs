//! Raw input schema for setup-bazel
//!
//! Inputs come from an optional TOML file and GitHub Actions `INPUT_*`
//! variables. Several options historically accepted more than one shape
//! (boolean, string, list); they are kept as [`OptionValue`] here and resolved
//! into canonical records exactly once by [`super::Config::resolve`].

use crate::error::{SetupError, SetupResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Spellings accepted as `true` for boolean inputs (YAML 1.2 core schema)
const TRUE_VALUES: &[&str] = &["true", "True", "TRUE"];

/// Spellings accepted as `false` for boolean inputs
const FALSE_VALUES: &[&str] = &["false", "False", "FALSE"];

/// A raw option value in any of its accepted shapes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// `true` / `false`
    Bool(bool),
    /// A single string (name suffix or single file pattern)
    Text(String),
    /// A list of strings (file patterns)
    List(Vec<String>),
}

impl OptionValue {
    /// Parse an action input string.
    ///
    /// Boolean spellings become [`OptionValue::Bool`], multi-line values
    /// become [`OptionValue::List`], anything else stays text.
    pub fn from_input(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lines: Vec<String> = trimmed
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        if lines.len() > 1 {
            return Self::List(lines);
        }
        Self::Text(trimmed.to_string()).normalized()
    }

    /// Turn boolean spellings carried as text into [`OptionValue::Bool`]
    pub fn normalized(self) -> Self {
        match self {
            Self::Text(s) if TRUE_VALUES.contains(&s.as_str()) => Self::Bool(true),
            Self::Text(s) if FALSE_VALUES.contains(&s.as_str()) => Self::Bool(false),
            other => other,
        }
    }

    /// Interpret as a strict boolean; any other shape is a fatal input error
    pub fn as_bool(&self, name: &str) -> SetupResult<bool> {
        match self.clone().normalized() {
            Self::Bool(b) => Ok(b),
            Self::Text(s) => Err(SetupError::InputInvalid {
                name: name.to_string(),
                reason: format!("expected a boolean, got '{}'", s),
            }),
            Self::List(_) => Err(SetupError::InputInvalid {
                name: name.to_string(),
                reason: "expected a boolean, got a list".to_string(),
            }),
        }
    }

    /// Interpret as a list of file patterns (text is a single pattern)
    pub fn as_files(&self) -> Option<Vec<String>> {
        match self {
            Self::Bool(_) => None,
            Self::Text(s) => Some(vec![s.clone()]),
            Self::List(items) => Some(items.clone()),
        }
    }
}

/// How a restore hit feeds into the save decision of the same run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SavePolicy {
    /// Skip the save only when restore matched the primary key exactly
    #[default]
    SkipOnExactHit,
    /// Always save, regardless of how the cache was restored
    Always,
}

impl SavePolicy {
    /// Parse an action input string
    pub fn from_input(raw: &str) -> SetupResult<Self> {
        match raw.trim() {
            "skip-on-exact-hit" => Ok(Self::SkipOnExactHit),
            "always" => Ok(Self::Always),
            other => Err(SetupError::InputInvalid {
                name: "save-policy".to_string(),
                reason: format!("expected 'skip-on-exact-hit' or 'always', got '{}'", other),
            }),
        }
    }
}

/// Raw inputs before resolution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Inputs {
    /// Bazelisk version to install (recorded only)
    pub bazelisk_version: Option<String>,

    /// Cache version, part of every cache key
    pub cache_version: Option<String>,

    /// Leading component of every cache key
    pub key_prefix: Option<String>,

    /// Add the CPU architecture to the base key
    pub key_include_arch: Option<OptionValue>,

    /// Extra lines for the generated bazelrc
    pub bazelrc: Vec<String>,

    /// Cache the bazelisk download directory
    pub bazelisk_cache: Option<OptionValue>,

    /// Cache the disk cache (boolean or name suffix)
    pub disk_cache: Option<OptionValue>,

    /// Size budget of the disk cache in GiB; enables garbage collection
    pub disk_cache_max_size: Option<f64>,

    /// Cache the repository cache (boolean or file pattern override)
    pub repository_cache: Option<OptionValue>,

    /// External dependency caches
    pub external_cache: Option<ExternalCacheInput>,

    /// Google credentials JSON
    pub google_credentials: Option<String>,

    /// Bazel output base
    pub output_base: Option<PathBuf>,

    /// Root directory that file patterns are resolved against
    pub module_root: Option<PathBuf>,

    /// Back caches with sticky disks instead of the blob cache
    pub sticky_disk: Option<OptionValue>,

    /// Follow symbolic links while hashing file sets
    pub follow_symlinks: Option<OptionValue>,

    /// Transfer timeout for a single cache restore, in seconds
    pub restore_timeout_secs: Option<u64>,

    /// Whether exact restore hits skip the save step
    pub save_policy: Option<SavePolicy>,

    /// Root directory of the local blob cache
    pub blob_cache_dir: Option<PathBuf>,
}

/// External cache section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ExternalCacheInput {
    /// Manifest name (defaults to `<workflow>-<job>`)
    pub name: Option<String>,

    /// Minimum size in MB for a directory to be saved
    pub min_size: Option<f64>,

    /// Per-name overrides: `false` disables, files replace the defaults
    pub manifest: BTreeMap<String, OptionValue>,
}

impl ExternalCacheInput {
    /// Parse the `external-cache` action input.
    ///
    /// Accepts a boolean or a TOML table. Returns `None` when disabled.
    pub fn from_input(raw: &str) -> SetupResult<Option<Self>> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        match OptionValue::from_input(trimmed) {
            OptionValue::Bool(true) => Ok(Some(Self::default())),
            OptionValue::Bool(false) => Ok(None),
            _ => toml::from_str(trimmed)
                .map(Some)
                .map_err(|e| SetupError::InputInvalid {
                    name: "external-cache".to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_value_from_input() {
        assert_eq!(OptionValue::from_input("true"), OptionValue::Bool(true));
        assert_eq!(OptionValue::from_input("FALSE"), OptionValue::Bool(false));
        assert_eq!(
            OptionValue::from_input("remote"),
            OptionValue::Text("remote".to_string())
        );
        assert_eq!(
            OptionValue::from_input("MODULE.bazel\n  WORKSPACE\n"),
            OptionValue::List(vec!["MODULE.bazel".to_string(), "WORKSPACE".to_string()])
        );
    }

    #[test]
    fn as_bool_rejects_legacy_strings() {
        let value = OptionValue::Text("yes".to_string());
        let err = value.as_bool("bazelisk-cache").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("bazelisk-cache"));

        assert!(OptionValue::Text("True".to_string())
            .as_bool("sticky-disk")
            .unwrap());
    }

    #[test]
    fn inputs_deserialize_mixed_shapes() {
        let toml = r#"
            cache-version = "2"
            disk-cache = "remote"
            repository-cache = ["MODULE.bazel", "deps.bzl"]
            bazelisk-cache = false

            [external-cache]
            min-size = 20

            [external-cache.manifest]
            rules_go = false
            com_google_protobuf = "MODULE.bazel"
        "#;
        let inputs: Inputs = toml::from_str(toml).unwrap();

        assert_eq!(inputs.cache_version.as_deref(), Some("2"));
        assert_eq!(
            inputs.disk_cache,
            Some(OptionValue::Text("remote".to_string()))
        );
        assert_eq!(inputs.bazelisk_cache, Some(OptionValue::Bool(false)));
        let external = inputs.external_cache.unwrap();
        assert_eq!(external.min_size, Some(20.0));
        assert_eq!(external.manifest["rules_go"], OptionValue::Bool(false));
    }

    #[test]
    fn external_cache_input_forms() {
        assert!(ExternalCacheInput::from_input("").unwrap().is_none());
        assert!(ExternalCacheInput::from_input("false").unwrap().is_none());
        assert!(ExternalCacheInput::from_input("true").unwrap().is_some());

        let parsed = ExternalCacheInput::from_input("name = \"ci\"\n[manifest]\nfoo = false")
            .unwrap()
            .unwrap();
        assert_eq!(parsed.name.as_deref(), Some("ci"));
        assert_eq!(parsed.manifest["foo"], OptionValue::Bool(false));
    }

    #[test]
    fn save_policy_parse() {
        assert_eq!(SavePolicy::from_input("always").unwrap(), SavePolicy::Always);
        assert!(SavePolicy::from_input("sometimes").is_err());
    }
}
