//! File-set hashing for cache keys
//!
//! Expands glob patterns under a root directory and hashes the contents of
//! every matched file. Matches are sorted before hashing so the result does
//! not depend on traversal order. Same files = same hash.

use crate::error::{SetupError, SetupResult};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Hashes the files matched by an ordered list of glob patterns
#[derive(Debug, Clone)]
pub struct FileSetHasher {
    root: PathBuf,
    follow_symlinks: bool,
}

/// Compiled include/exclude pattern sets
struct PatternSet {
    include: GlobSet,
    exclude: GlobSet,
}

fn compile(pattern: &str) -> SetupResult<Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| SetupError::PatternInvalid {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

impl PatternSet {
    /// Patterns prefixed with `!` exclude files matched by earlier patterns
    fn new(root: &Path, patterns: &[String]) -> SetupResult<Self> {
        let mut include = GlobSetBuilder::new();
        let mut exclude = GlobSetBuilder::new();

        for raw in patterns {
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            let (negated, pattern) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw),
            };
            let pattern = relative_pattern(root, pattern);
            if negated {
                exclude.add(compile(&pattern)?);
            } else {
                include.add(compile(&pattern)?);
            }
        }

        let build = |builder: GlobSetBuilder| {
            builder.build().map_err(|e| SetupError::PatternInvalid {
                pattern: patterns.join(","),
                reason: e.to_string(),
            })
        };

        Ok(Self {
            include: build(include)?,
            exclude: build(exclude)?,
        })
    }

    fn is_match(&self, relative: &Path) -> bool {
        self.include.is_match(relative) && !self.exclude.is_match(relative)
    }
}

/// Make a pattern relative to the hashing root
fn relative_pattern(root: &Path, pattern: &str) -> String {
    let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
    let root = root.to_string_lossy();
    let root = root.trim_end_matches('/');
    match pattern.strip_prefix(root) {
        Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/').to_string(),
        _ => pattern.to_string(),
    }
}

/// SHA256 of a single file's contents
fn hash_file_contents(path: &Path) -> SetupResult<Vec<u8>> {
    let mut file = File::open(path)
        .map_err(|e| SetupError::io(format!("opening {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| SetupError::io(format!("reading {}", path.display()), e))?;
    Ok(hasher.finalize().to_vec())
}

impl FileSetHasher {
    /// Create a hasher resolving patterns against `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            follow_symlinks: false,
        }
    }

    /// Follow symbolic links while walking (slow on some platforms)
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// The directory patterns are resolved against
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All regular files matched by `patterns`, relative to the root, sorted
    pub fn matching_files(&self, patterns: &[String]) -> SetupResult<Vec<PathBuf>> {
        let set = PatternSet::new(&self.root, patterns)?;
        if !self.root.exists() {
            return Ok(vec![]);
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.root)
                    .ok()
                    .map(Path::to_path_buf)
            })
            .filter(|relative| set.is_match(relative))
            .collect();

        files.sort();
        Ok(files)
    }

    /// Hash the contents of every file matched by `patterns`.
    ///
    /// Matching nothing is not an error: the result is the hash of the empty
    /// set.
    pub fn hash(&self, patterns: &[String]) -> SetupResult<String> {
        let files = self.matching_files(patterns)?;

        let mut outer = Sha256::new();
        for relative in &files {
            let digest = hash_file_contents(&self.root.join(relative))?;
            debug!("{} {}", hex::encode(&digest), relative.display());
            outer.update(&digest);
        }

        debug!("Hashed {} files under {}", files.len(), self.root.display());
        Ok(hex::encode(outer.finalize()))
    }
}

/// SHA256 of the empty file set
pub fn empty_set_hash() -> String {
    hex::encode(Sha256::new().finalize())
}
