//! Google Cloud credentials for remote caching

use crate::error::{SetupError, SetupResult};
use crate::state::{StateStore, GOOGLE_CREDENTIALS_PATH};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Service account key written to a private temporary file
pub struct GoogleCredentials;

impl GoogleCredentials {
    const FILE_NAME: &'static str = "key.json";

    /// Write the key once per job and return its path.
    ///
    /// A key written by an earlier step of the same job is reused.
    pub fn install(
        credentials: &str,
        temp_dir: &Path,
        state: &dyn StateStore,
    ) -> SetupResult<Option<PathBuf>> {
        if credentials.is_empty() {
            return Ok(None);
        }
        if let Some(existing) = state.get(GOOGLE_CREDENTIALS_PATH) {
            debug!("Reusing google credentials at {}", existing);
            return Ok(Some(PathBuf::from(existing)));
        }

        let dir = temp_dir.join(format!("setup-bazel-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir)
            .map_err(|e| SetupError::io(format!("creating {}", dir.display()), e))?;
        let path = dir.join(Self::FILE_NAME);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&path)
            .map_err(|e| SetupError::io(format!("creating {}", path.display()), e))?;
        file.write_all(credentials.as_bytes())
            .map_err(|e| SetupError::io(format!("writing {}", path.display()), e))?;

        state.set(GOOGLE_CREDENTIALS_PATH, &path.to_string_lossy())?;
        info!("Wrote google credentials to {}", path.display());
        Ok(Some(path))
    }

    /// bazelrc line pointing bazel at the key
    pub fn bazelrc_line(path: &Path) -> String {
        format!("build --google_credentials={}", path.display())
    }

    /// Remove the key written by [`install`](Self::install), if any
    pub fn remove(state: &dyn StateStore) -> SetupResult<()> {
        let Some(path) = state.get(GOOGLE_CREDENTIALS_PATH) else {
            return Ok(());
        };
        let path = PathBuf::from(path);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| SetupError::io(format!("removing {}", path.display()), e))?;
            debug!("Removed {}", path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryState;
    use tempfile::TempDir;

    #[test]
    fn empty_credentials_write_nothing() {
        let dir = TempDir::new().unwrap();
        let state = MemoryState::new();
        assert!(GoogleCredentials::install("", dir.path(), &state)
            .unwrap()
            .is_none());
        assert!(state.get(GOOGLE_CREDENTIALS_PATH).is_none());
    }

    #[test]
    fn writes_private_key_once() {
        let dir = TempDir::new().unwrap();
        let state = MemoryState::new();

        let path = GoogleCredentials::install("{\"type\":\"sa\"}", dir.path(), &state)
            .unwrap()
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"type\":\"sa\"}");
        assert!(path.ends_with("key.json"));
        assert!(path
            .parent()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("setup-bazel-"));
        assert_eq!(
            state.get(GOOGLE_CREDENTIALS_PATH),
            Some(path.to_string_lossy().into_owned())
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let again = GoogleCredentials::install("other", dir.path(), &state)
            .unwrap()
            .unwrap();
        assert_eq!(again, path);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"type\":\"sa\"}");
    }

    #[test]
    fn remove_deletes_key() {
        let dir = TempDir::new().unwrap();
        let state = MemoryState::new();
        let path = GoogleCredentials::install("k", dir.path(), &state)
            .unwrap()
            .unwrap();

        GoogleCredentials::remove(&state).unwrap();
        assert!(!path.exists());
        GoogleCredentials::remove(&state).unwrap();
    }

    #[test]
    fn bazelrc_line_format() {
        assert_eq!(
            GoogleCredentials::bazelrc_line(Path::new("/tmp/x/key.json")),
            "build --google_credentials=/tmp/x/key.json"
        );
    }
}
