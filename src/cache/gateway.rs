//! Restore and save of cache categories through a blob cache
//!
//! The gateway derives each category's key from its file set, restores with
//! an exact key and a prefix fallback under a bounded timeout, and threads
//! the exact-hit flag from restore to save through run state.

use crate::cache::fileset::FileSetHasher;
use crate::cache::key::CacheKey;
use crate::config::{CacheCategory, Config, SavePolicy};
use crate::error::{SetupError, SetupResult};
use crate::state::{self, SharedState};
use crate::ui;
use async_trait::async_trait;
use futures_util::future::join_all;
use rand::Rng;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound of the random delay before each operation in a batch
pub const MAX_BATCH_JITTER: Duration = Duration::from_millis(1000);

/// Backing store for cache archives
#[async_trait]
pub trait BlobCache: Send + Sync {
    /// Restore `paths` from `primary_key`, or from the newest entry whose key
    /// starts with one of `restore_keys`. Returns the key that matched.
    async fn restore(
        &self,
        paths: &[PathBuf],
        primary_key: &str,
        restore_keys: &[String],
    ) -> SetupResult<Option<String>>;

    /// Save `paths` under `key`. Fails with [`SetupError::CacheKeyExists`]
    /// when the key is already taken.
    async fn save(&self, paths: &[PathBuf], key: &str) -> SetupResult<()>;
}

/// How a category was restored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Primary key matched
    Exact(String),
    /// An older entry sharing the category prefix matched
    Fallback(String),
    /// Nothing restored (including timeouts and store errors)
    Miss,
    /// Category is disabled
    Disabled,
}

impl RestoreOutcome {
    /// The key restored from, if any
    pub fn matched_key(&self) -> Option<&str> {
        match self {
            Self::Exact(key) | Self::Fallback(key) => Some(key),
            Self::Miss | Self::Disabled => None,
        }
    }
}

/// What a save did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(String),
    /// Restored from the primary key earlier in this run
    SkippedExactHit,
    /// Another run already saved this key
    AlreadyExists(String),
    /// None of the category paths exist
    NothingToSave,
    Disabled,
}

/// Category-level cache operations
#[derive(Clone)]
pub struct CacheGateway {
    store: Arc<dyn BlobCache>,
    state: SharedState,
    hasher: FileSetHasher,
    base_key: String,
    restore_timeout: Duration,
    save_policy: SavePolicy,
    max_jitter: Duration,
}

impl CacheGateway {
    /// Create a gateway for a resolved configuration
    pub fn new(store: Arc<dyn BlobCache>, state: SharedState, config: &Config) -> Self {
        Self {
            store,
            state,
            hasher: FileSetHasher::new(&config.module_root)
                .follow_symlinks(config.follow_symlinks),
            base_key: config.base_key.clone(),
            restore_timeout: config.restore_timeout,
            save_policy: config.save_policy,
            max_jitter: MAX_BATCH_JITTER,
        }
    }

    /// Override the batch jitter bound
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Run state shared with the rest of the phase
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Derive the key of a category from its file set
    pub async fn key_for(&self, category: &CacheCategory) -> SetupResult<CacheKey> {
        let hasher = self.hasher.clone();
        let patterns = category.file_patterns.clone();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&patterns))
            .await
            .map_err(|e| SetupError::Internal(format!("hash task failed: {}", e)))??;

        let key = CacheKey::new(&self.base_key, &category.name, hash);
        key.validate()?;
        Ok(key)
    }

    /// Restore one category, treating a timeout as a miss
    pub async fn restore_category(&self, category: &CacheCategory) -> SetupResult<RestoreOutcome> {
        if !category.enabled {
            debug!("{} cache disabled", category.name);
            return Ok(RestoreOutcome::Disabled);
        }

        let key = self.key_for(category).await?;
        let primary = key.full();
        let fallbacks = vec![key.restore_scope()];

        let _group = ui::group(format!("Restore {} cache", category.name));
        info!("Restoring cache with key {}", primary);

        let restored = tokio::time::timeout(
            self.restore_timeout,
            self.store.restore(&category.mount_paths, &primary, &fallbacks),
        )
        .await;

        let matched = match restored {
            Ok(Ok(matched)) => matched,
            Ok(Err(e)) => {
                warn!("Failed to restore {} cache: {}", category.name, e);
                None
            }
            Err(_) => {
                let err = SetupError::CacheRestoreTimeout {
                    name: category.name.clone(),
                    secs: self.restore_timeout.as_secs(),
                };
                ui::warning(&err.to_string());
                None
            }
        };

        let outcome = match matched {
            Some(matched) if matched == primary => {
                state::mark_exact_hit(self.state.as_ref(), &category.name)?;
                RestoreOutcome::Exact(matched)
            }
            Some(matched) => RestoreOutcome::Fallback(matched),
            None => RestoreOutcome::Miss,
        };

        match &outcome {
            RestoreOutcome::Exact(k) => info!("Successfully restored cache from {}", k),
            RestoreOutcome::Fallback(k) => info!("Restored cache from fallback key {}", k),
            _ => info!("Failed to restore {} cache", category.name),
        }
        Ok(outcome)
    }

    /// Save one category unless the policy says its content is unchanged
    pub async fn save_category(&self, category: &CacheCategory) -> SetupResult<SaveOutcome> {
        if !category.enabled {
            return Ok(SaveOutcome::Disabled);
        }
        if self.save_policy == SavePolicy::SkipOnExactHit
            && state::is_exact_hit(self.state.as_ref(), &category.name)
        {
            info!("Cache hit occurred on the primary key, not saving {}", category.name);
            return Ok(SaveOutcome::SkippedExactHit);
        }

        let key = self.key_for(category).await?;
        self.save_key(category, &key).await
    }

    /// Save a category under an explicit content hash.
    ///
    /// Used after garbage collection detected a change, so the exact-hit
    /// flag does not apply.
    pub async fn save_with_hash(
        &self,
        category: &CacheCategory,
        hash: &str,
    ) -> SetupResult<SaveOutcome> {
        if !category.enabled {
            return Ok(SaveOutcome::Disabled);
        }
        let key = CacheKey::new(&self.base_key, &category.name, hash);
        key.validate()?;
        self.save_key(category, &key).await
    }

    async fn save_key(&self, category: &CacheCategory, key: &CacheKey) -> SetupResult<SaveOutcome> {
        let _group = ui::group(format!("Save {} cache", category.name));
        let key = key.full();
        info!("Saving cache with key {}", key);

        match self.store.save(&category.mount_paths, &key).await {
            Ok(()) => {
                info!("Successfully saved cache");
                Ok(SaveOutcome::Saved(key))
            }
            Err(SetupError::CacheKeyExists(existing)) => {
                info!("Cache entry {} already exists, skipping", existing);
                Ok(SaveOutcome::AlreadyExists(existing))
            }
            Err(SetupError::CacheNothingToSave { .. }) => {
                info!("No {} cache paths exist, skipping", category.name);
                Ok(SaveOutcome::NothingToSave)
            }
            Err(e) => Err(e),
        }
    }

    /// Restore categories concurrently with jittered starts; failures are
    /// logged per category and reported as misses.
    pub async fn restore_batch(&self, categories: &[CacheCategory]) -> Vec<RestoreOutcome> {
        jittered_batch(
            self.max_jitter,
            categories.iter().map(|category| async move {
                match self.restore_category(category).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        ui::warning(&format!("{} cache restore failed: {}", category.name, e));
                        RestoreOutcome::Miss
                    }
                }
            }),
        )
        .await
    }

    /// Save categories concurrently with jittered starts
    pub async fn save_batch(&self, categories: &[CacheCategory]) -> Vec<Option<SaveOutcome>> {
        jittered_batch(
            self.max_jitter,
            categories.iter().map(|category| async move {
                match self.save_category(category).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        ui::warning(&format!("{} cache save failed: {}", category.name, e));
                        None
                    }
                }
            }),
        )
        .await
    }
}

/// Await every task, each after its own random delay in `[0, max_jitter]`
pub async fn jittered_batch<I, F, T>(max_jitter: Duration, tasks: I) -> Vec<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = T>,
{
    let max_ms = max_jitter.as_millis() as u64;
    let delayed = tasks.into_iter().map(|task| {
        let delay = Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms));
        async move {
            tokio::time::sleep(delay).await;
            task.await
        }
    });
    join_all(delayed).await
}
