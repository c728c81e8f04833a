//! State store implementations

use crate::error::{SetupError, SetupResult};
use crate::state::StateStore;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State persisted through the GitHub Actions runner.
///
/// Writes go to the `GITHUB_STATE` file as heredoc blocks; the runner hands
/// them back to the post step as `STATE_<key>` environment variables.
pub struct ActionsState {
    state_file: PathBuf,
    inherited: HashMap<String, String>,
    written: Mutex<HashMap<String, String>>,
}

impl ActionsState {
    /// Build from the process environment, if running under the runner
    pub fn from_env() -> Option<Self> {
        let state_file = std::env::var_os("GITHUB_STATE")?;
        let inherited = std::env::vars()
            .filter_map(|(k, v)| k.strip_prefix("STATE_").map(|key| (key.to_string(), v)))
            .collect();
        Some(Self::new(PathBuf::from(state_file), inherited))
    }

    /// Build with an explicit state file and inherited values
    pub fn new(state_file: PathBuf, inherited: HashMap<String, String>) -> Self {
        Self {
            state_file,
            inherited,
            written: Mutex::new(HashMap::new()),
        }
    }

    fn append(&self, key: &str, value: &str) -> SetupResult<()> {
        let delimiter = format!("ghadelimiter_{}", Uuid::new_v4());
        if key.contains(&delimiter) || value.contains(&delimiter) {
            return Err(SetupError::StatePersist {
                key: key.to_string(),
                reason: "value contains the heredoc delimiter".to_string(),
            });
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.state_file)
            .map_err(|e| {
                SetupError::io(format!("opening state file {}", self.state_file.display()), e)
            })?;
        writeln!(file, "{}<<{}\n{}\n{}", key, delimiter, value, delimiter)
            .map_err(|e| SetupError::io("writing state file", e))
    }
}

impl StateStore for ActionsState {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.written)
            .get(key)
            .or_else(|| self.inherited.get(key))
            .filter(|v| !v.is_empty())
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> SetupResult<()> {
        self.append(key, value)?;
        lock(&self.written).insert(key.to_string(), value.to_string());
        debug!("Saved state {}", key);
        Ok(())
    }
}

/// State kept in a JSON file, for runs outside the Actions runner
pub struct FileState {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileState {
    /// Default state file location
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os("SETUP_BAZEL_STATE_FILE") {
            return PathBuf::from(path);
        }
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("setup-bazel")
            .join("state.json")
    }

    /// Open a state file, starting empty when it does not exist
    pub fn open(path: PathBuf) -> SetupResult<Self> {
        let values = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| SetupError::io(format!("reading state file {}", path.display()), e))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileState {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).filter(|v| !v.is_empty()).cloned()
    }

    fn set(&self, key: &str, value: &str) -> SetupResult<()> {
        let mut values = lock(&self.values);
        values.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SetupError::io("creating state directory", e))?;
        }
        let content = serde_json::to_string_pretty(&*values)?;
        fs::write(&self.path, content).map_err(|e| {
            SetupError::io(format!("writing state file {}", self.path.display()), e)
        })?;
        debug!("Saved state {}", key);
        Ok(())
    }
}

/// In-memory state, shared between phases of a single process
#[derive(Default)]
pub struct MemoryState {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryState {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryState {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).filter(|v| !v.is_empty()).cloned()
    }

    fn set(&self, key: &str, value: &str) -> SetupResult<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn actions_state_writes_heredoc_blocks() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("state");
        let state = ActionsState::new(file.clone(), HashMap::new());

        state.set("repository-cache-hit", "true").unwrap();
        state.set("sticky-disk-mounts", "{\"a\":1}").unwrap();

        let content = fs::read_to_string(&file).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("repository-cache-hit<<ghadelimiter_"));
        assert_eq!(lines[1], "true");
        assert_eq!(lines[2], lines[0].split("<<").nth(1).unwrap());

        assert_eq!(state.get("repository-cache-hit").as_deref(), Some("true"));
    }

    #[test]
    fn actions_state_reads_inherited_values() {
        let dir = TempDir::new().unwrap();
        let mut inherited = HashMap::new();
        inherited.insert("action-failed".to_string(), "true".to_string());
        inherited.insert("empty".to_string(), String::new());
        let state = ActionsState::new(dir.path().join("state"), inherited);

        assert_eq!(state.get("action-failed").as_deref(), Some("true"));
        assert!(state.get("empty").is_none());
        assert!(state.get("missing").is_none());
    }

    #[test]
    fn file_state_persists_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let first = FileState::open(path.clone()).unwrap();
        first.set("disk-cache-hit", "true").unwrap();

        let second = FileState::open(path).unwrap();
        assert_eq!(second.get("disk-cache-hit").as_deref(), Some("true"));
        assert!(second.get("other").is_none());
    }

    #[test]
    fn memory_state_overwrites() {
        let state = MemoryState::new();
        state.set("k", "1").unwrap();
        state.set("k", "2").unwrap();
        assert_eq!(state.get("k").as_deref(), Some("2"));
    }

    #[test]
    #[serial]
    fn actions_state_from_runner_environment() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("state");
        std::env::set_var("GITHUB_STATE", &file);
        std::env::set_var("STATE_sticky-disk-mounts", "{}");

        let state = ActionsState::from_env();
        std::env::remove_var("GITHUB_STATE");
        std::env::remove_var("STATE_sticky-disk-mounts");

        let state = state.unwrap();
        assert_eq!(state.get("sticky-disk-mounts").as_deref(), Some("{}"));
        state.set("action-failed", "true").unwrap();
        assert!(fs::read_to_string(file).unwrap().contains("action-failed<<"));
    }

    #[test]
    #[serial]
    fn default_path_honors_override() {
        std::env::set_var("SETUP_BAZEL_STATE_FILE", "/tmp/setup-bazel-state.json");
        let path = FileState::default_path();
        std::env::remove_var("SETUP_BAZEL_STATE_FILE");
        assert_eq!(path, PathBuf::from("/tmp/setup-bazel-state.json"));
    }
}
