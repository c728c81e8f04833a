//! Integration tests for setup-bazel

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use sha2::{Digest, Sha256};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn setup_bazel() -> Command {
        cargo_bin_cmd!("setup-bazel")
    }

    /// A command isolated from the runner: home, state and blob cache all
    /// live under `root`
    fn isolated(root: &Path) -> Command {
        let mut cmd = setup_bazel();
        cmd.env("HOME", root.join("home"))
            .env("XDG_CACHE_HOME", root.join("home").join(".cache"))
            .env("GITHUB_WORKSPACE", root.join("workspace"))
            .env("SETUP_BAZEL_STATE_FILE", root.join("state.json"))
            .env("INPUT_BLOB-CACHE-DIR", root.join("blobs"))
            .env_remove("GITHUB_ACTIONS")
            .env_remove("GITHUB_STATE")
            .env_remove("SETUP_BAZEL_CONFIG")
            .env_remove("RUST_LOG");
        cmd
    }

    #[test]
    fn help_displays() {
        setup_bazel()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Bazel build caches"));
    }

    #[test]
    fn version_displays() {
        setup_bazel()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("setup-bazel"));
    }

    #[test]
    fn hash_matches_file_contents() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("MODULE.bazel"), "module(name = \"m\")").unwrap();
        let expected = hex::encode(Sha256::digest(Sha256::digest(b"module(name = \"m\")")));

        setup_bazel()
            .arg("hash")
            .arg("--root")
            .arg(dir.path())
            .arg("MODULE.bazel")
            .assert()
            .success()
            .stdout(predicate::str::contains(expected));
    }

    #[test]
    fn hash_of_nothing_is_empty_set_hash() {
        let dir = TempDir::new().unwrap();

        setup_bazel()
            .arg("hash")
            .arg("--root")
            .arg(dir.path())
            .args(["**/BUILD.bazel", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            ))
            .stdout(predicate::str::contains("\"count\": 0"));
    }

    #[test]
    fn legacy_boolean_is_fatal() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("workspace")).unwrap();

        isolated(dir.path())
            .arg("pre")
            .env("INPUT_BAZELISK-CACHE", "maybe")
            .assert()
            .failure()
            .stderr(predicate::str::contains("bazelisk-cache"))
            .stderr(predicate::str::contains("Hint:"));

        let state = fs::read_to_string(dir.path().join("state.json")).unwrap();
        assert!(state.contains("action-failed"));
    }

    #[test]
    fn gc_reports_changes_against_baseline() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("disk");
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("ac"), "x").unwrap();

        setup_bazel()
            .env_remove("GITHUB_ACTIONS")
            .arg("gc")
            .arg(&cache)
            .args(["--max-size", "1", "--init"])
            .assert()
            .success();
        assert!(dir.path().join("disk.sha256").exists());

        setup_bazel()
            .env_remove("GITHUB_ACTIONS")
            .arg("gc")
            .arg(&cache)
            .args(["--max-size", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("unchanged"));

        fs::write(cache.join("cas"), "y").unwrap();
        setup_bazel()
            .env_remove("GITHUB_ACTIONS")
            .arg("gc")
            .arg(&cache)
            .args(["--max-size", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("changed:"));
    }

    #[test]
    fn gc_rejects_non_positive_budget() {
        let dir = TempDir::new().unwrap();
        setup_bazel()
            .arg("gc")
            .arg(dir.path())
            .args(["--max-size", "0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("max-size"));
    }

    #[test]
    fn pre_post_round_trip_through_local_blob_cache() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let workspace = root.join("workspace");
        fs::create_dir_all(&workspace).unwrap();
        fs::write(workspace.join("MODULE.bazel"), "module(name = \"m\")").unwrap();
        let repo = root.join("home").join(".cache").join("bazel-repo");

        let phase = |name: &str| {
            isolated(root)
                .arg(name)
                .env("INPUT_REPOSITORY-CACHE", "true")
                .env("INPUT_BAZELISK-CACHE", "false")
                .assert()
                .success();
        };

        phase("pre");
        let bazelrc = fs::read_to_string(root.join("home").join(".bazelrc")).unwrap();
        assert!(bazelrc.starts_with("startup --output_base="));
        assert!(bazelrc.contains(&format!("build --repository_cache={}", repo.display())));

        fs::create_dir_all(repo.join("content_addressable")).unwrap();
        fs::write(repo.join("content_addressable").join("blob"), "dep").unwrap();
        phase("post");

        let archives = fs::read_dir(root.join("blobs"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().to_string_lossy().ends_with(".tar.gz"))
            .count();
        assert_eq!(archives, 1);

        // A fresh machine restores the saved repository cache
        fs::remove_dir_all(&repo).unwrap();
        fs::remove_file(root.join("state.json")).ok();
        phase("pre");
        assert_eq!(
            fs::read_to_string(repo.join("content_addressable").join("blob")).unwrap(),
            "dep"
        );
    }

    #[test]
    fn post_tolerates_corrupt_state_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("workspace")).unwrap();
        fs::write(root.join("state.json"), "{not json").unwrap();

        isolated(root)
            .arg("post")
            .env("INPUT_BAZELISK-CACHE", "false")
            .assert()
            .success()
            .stdout(predicate::str::contains("Failed to open run state"));
    }

    #[test]
    fn pre_succeeds_when_bazelrc_is_unwritable() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("workspace")).unwrap();
        // A directory where the file should go makes the write fail
        fs::create_dir_all(root.join("home").join(".bazelrc")).unwrap();

        isolated(root)
            .arg("pre")
            .env("INPUT_BAZELISK-CACHE", "false")
            .assert()
            .success()
            .stdout(predicate::str::contains("Continuing without caches"));

        let state = fs::read_to_string(root.join("state.json")).unwrap_or_default();
        assert!(!state.contains("action-failed"));
    }
}
