//! Build cache categories: keys, restore/save, external manifests and GC
//!
//! Keys are derived from the content of a category's file set:
//!
//! | Part | Example |
//! |------|---------|
//! | base | `setup-bazel-1-linux` |
//! | category | `repository` |
//! | content hash | SHA256 over the matched files |
//!
//! Restore tries the full key, then the newest entry sharing
//! `base-category-`. Only an exact hit lets the post-phase skip its save.

pub mod external;
pub mod fileset;
pub mod gateway;
pub mod gc;
pub mod key;
pub mod local;
pub mod size;

pub use fileset::{empty_set_hash, FileSetHasher};
pub use gateway::{BlobCache, CacheGateway, RestoreOutcome, SaveOutcome};
pub use key::CacheKey;
pub use local::LocalBlobCache;
pub use size::folder_size;
