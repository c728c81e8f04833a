//! Credential material handed to bazel

pub mod gcp;

pub use gcp::GoogleCredentials;
