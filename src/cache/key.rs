//! Hierarchical cache keys
//!
//! `full = base-category-hash` is tried first on restore; `restore_scope =
//! base-category-` is the prefix fallback that matches the most recent key
//! of the same category when the content hash misses.

use crate::error::{SetupError, SetupResult};
use std::fmt;

/// Longest key the blob cache accepts
pub const MAX_KEY_LENGTH: usize = 512;

/// Cache key for one category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub base: String,
    pub category: String,
    pub content_hash: String,
}

impl CacheKey {
    /// Build a key from its parts
    pub fn new(
        base: impl Into<String>,
        category: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            base: base.into(),
            category: category.into(),
            content_hash: content_hash.into(),
        }
    }

    /// Primary key, tried for an exact match
    pub fn full(&self) -> String {
        format!("{}{}", self.restore_scope(), self.content_hash)
    }

    /// Prefix fallback shared by every key of this category and base
    pub fn restore_scope(&self) -> String {
        format!("{}-{}-", self.base, self.category)
    }

    /// Check the key against the blob cache's limits
    pub fn validate(&self) -> SetupResult<()> {
        validate_key(&self.full())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full())
    }
}

/// Reject keys the blob cache would refuse
pub fn validate_key(key: &str) -> SetupResult<()> {
    if key.is_empty() {
        return Err(SetupError::CacheKeyInvalid {
            key: key.to_string(),
            reason: "key is empty".to_string(),
        });
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(SetupError::CacheKeyInvalid {
            key: key.to_string(),
            reason: format!("longer than {} characters", MAX_KEY_LENGTH),
        });
    }
    if key.contains(',') {
        return Err(SetupError::CacheKeyInvalid {
            key: key.to_string(),
            reason: "contains a comma".to_string(),
        });
    }
    Ok(())
}
