//! Error types for setup-bazel
//!
//! All modules use `SetupResult<T>` as their return type. Only configuration
//! errors are fatal to a run; everything else is absorbed by the component
//! that detected it and logged.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for setup-bazel operations
pub type SetupResult<T> = Result<T, SetupError>;

/// All errors that can occur while restoring, saving or mounting caches
#[derive(Error, Debug)]
pub enum SetupError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Invalid value for input '{name}': {reason}")]
    InputInvalid { name: String, reason: String },

    #[error("Home directory could not be determined")]
    HomeDirMissing,

    // Cache errors
    #[error("Invalid cache key '{key}': {reason}")]
    CacheKeyInvalid { key: String, reason: String },

    #[error("Cache entry already exists for key {0}")]
    CacheKeyExists(String),

    #[error("Cache restore for {name} timed out after {secs}s")]
    CacheRestoreTimeout { name: String, secs: u64 },

    #[error("Nothing to save for {key}: none of the cache paths exist")]
    CacheNothingToSave { key: String },

    #[error("Invalid file pattern '{pattern}': {reason}")]
    PatternInvalid { pattern: String, reason: String },

    #[error("Directory size of {path} exceeds the supported range")]
    SizeOverflow { path: PathBuf },

    // Sticky disk errors
    #[error("Sticky disk {stage} failed for {path}: {reason}")]
    StickyDisk {
        path: PathBuf,
        stage: String,
        reason: String,
    },

    #[error("Sticky disk {operation} timed out after {secs}s")]
    StickyDiskTimeout { operation: String, secs: u64 },

    #[error("Sticky disk service error: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Sticky disk service transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    // State errors
    #[error("Failed to persist state '{key}': {reason}")]
    StatePersist { key: String, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SetupError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a sticky disk stage error
    pub fn sticky(path: impl Into<PathBuf>, stage: impl ToString, reason: impl ToString) -> Self {
        Self::StickyDisk {
            path: path.into(),
            stage: stage.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalid { .. }
                | Self::InputInvalid { .. }
                | Self::HomeDirMissing
                | Self::TomlParse(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InputInvalid { name, .. } => input_hint(name),
            Self::HomeDirMissing => Some("Set HOME for the runner user"),
            Self::CacheKeyInvalid { .. } => {
                Some("Cache keys must be at most 512 characters and contain no commas")
            }
            _ => None,
        }
    }
}

/// Accepted forms of a named input
fn input_hint(name: &str) -> Option<&'static str> {
    match name {
        "bazelisk-cache" | "key-include-arch" | "sticky-disk" | "follow-symlinks" => {
            Some("Boolean inputs accept true | True | TRUE | false | False | FALSE")
        }
        "disk-cache" => Some("disk-cache accepts a boolean or a cache name"),
        "repository-cache" => Some("repository-cache accepts a boolean or a list of files"),
        "disk-cache-max-size" | "max-size" => {
            Some("Sizes are positive numbers of GiB, e.g. 5 or 0.5")
        }
        "restore-timeout-secs" => Some("restore-timeout-secs is a whole number of seconds"),
        "save-policy" => Some("save-policy accepts skip-on-exact-hit | always"),
        "external-cache" => {
            Some("external-cache accepts a boolean or a table of manifest options")
        }
        "external-cache.min-size" => Some("min-size is a non-negative number of MB"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SetupError::CacheKeyExists("setup-bazel-1-linux-repo-abc".to_string());
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn error_hint() {
        let err = SetupError::InputInvalid {
            name: "bazelisk-cache".to_string(),
            reason: "not a boolean".to_string(),
        };
        assert!(err.hint().unwrap().contains("true"));
    }

    #[test]
    fn hint_matches_the_offending_input() {
        let invalid = |name: &str| SetupError::InputInvalid {
            name: name.to_string(),
            reason: "bad".to_string(),
        };
        for name in ["disk-cache-max-size", "max-size"] {
            let hint = invalid(name).hint().unwrap();
            assert!(hint.contains("GiB"));
            assert!(!hint.contains("Boolean"));
        }
        assert!(invalid("restore-timeout-secs")
            .hint()
            .unwrap()
            .contains("seconds"));
        assert!(invalid("save-policy").hint().unwrap().contains("always"));
        assert!(invalid("disk-cache").hint().unwrap().contains("cache name"));
        assert!(invalid("sticky-disk").hint().unwrap().contains("TRUE"));
        assert_eq!(invalid("bazelisk-version").hint(), None);
    }

    #[test]
    fn only_config_errors_are_fatal() {
        assert!(SetupError::HomeDirMissing.is_fatal());
        assert!(!SetupError::CacheKeyExists("k".into()).is_fatal());
        assert!(!SetupError::sticky("/cache", "mount", "busy").is_fatal());
    }

    #[test]
    fn sticky_error_names_stage() {
        let err = SetupError::sticky("/cache/bazel-repo", "format", "mkfs exited 1");
        assert_eq!(
            err.to_string(),
            "Sticky disk format failed for /cache/bazel-repo: mkfs exited 1"
        );
    }
}
