//! setup-bazel - Bazel build caches for CI runners
//!
//! Writes the bazelrc, restores content-keyed caches (or mounts sticky
//! disks) before a build and saves, collects or commits them afterwards.

pub mod bazelrc;
pub mod cache;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod state;
pub mod stickydisk;
pub mod ui;

pub use error::{SetupError, SetupResult};
