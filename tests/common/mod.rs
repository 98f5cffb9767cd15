//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use git2::{Repository, Signature};
use patchdeck_lib::services::config::EngineConfig;
use patchdeck_lib::Engine;
use tempfile::TempDir;

/// A forge stand-in at `<tmp>/org/repo`, reachable over `file://`
pub struct Remote {
    _dir: TempDir,
    pub path: PathBuf,
}

impl Remote {
    /// HEAD points at `default` when given; every branch has a `BRANCH.txt`
    /// naming it.
    pub fn new(default: Option<&str>, branches: &[&str]) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("org").join("repo");
        std::fs::create_dir_all(&path).expect("Failed to create remote dir");

        let repo = Repository::init(&path).expect("Failed to init repo");
        let mut config = repo.config().expect("Failed to get config");
        config
            .set_str("receive.denyCurrentBranch", "ignore")
            .expect("Failed to allow pushes");

        let sig = Signature::now("Test User", "test@example.com").expect("Failed to sign");
        let first = branches.first().copied().unwrap_or("main");
        let mut base = None;
        for branch in branches {
            let mut builder = repo.treebuilder(None).expect("Failed to get tree builder");
            let readme = repo.blob(b"# repo").expect("Failed to write blob");
            let marker = repo.blob(branch.as_bytes()).expect("Failed to write blob");
            builder.insert("README.md", readme, 0o100644).unwrap();
            builder.insert("BRANCH.txt", marker, 0o100644).unwrap();
            let tree = repo.find_tree(builder.write().unwrap()).unwrap();

            let parents: Vec<git2::Commit> = base
                .map(|oid| repo.find_commit(oid).unwrap())
                .into_iter()
                .collect();
            let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
            let oid = repo
                .commit(
                    Some(&format!("refs/heads/{}", branch)),
                    &sig,
                    &sig,
                    &format!("Start {}", branch),
                    &tree,
                    &parent_refs,
                )
                .expect("Failed to commit");
            if *branch == first {
                base = Some(oid);
            }
        }

        let head = default.unwrap_or("no-such-default");
        repo.set_head(&format!("refs/heads/{}", head))
            .expect("Failed to set HEAD");

        Self { _dir: dir, path }
    }

    pub fn url(&self) -> String {
        format!("file://{}", self.path.display())
    }

    pub fn branch_head(&self, branch: &str) -> String {
        let repo = Repository::open(&self.path).expect("Failed to open remote");
        let oid = repo
            .find_reference(&format!("refs/heads/{}", branch))
            .expect("Missing branch")
            .target()
            .expect("Symbolic branch");
        oid.to_string()
    }

    #[cfg(unix)]
    pub fn reject_pushes(&self, message: &str) {
        use std::os::unix::fs::PermissionsExt;

        let hooks = self.path.join(".git").join("hooks");
        std::fs::create_dir_all(&hooks).expect("Failed to create hooks dir");
        let hook = hooks.join("pre-receive");
        std::fs::write(&hook, format!("#!/bin/sh\necho \"{}\" >&2\nexit 1\n", message))
            .expect("Failed to write hook");
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to make hook executable");
    }
}

/// An engine over a throwaway data dir
pub struct TestEngine {
    _data: TempDir,
    pub engine: Engine,
}

impl TestEngine {
    pub fn new() -> Self {
        let data = TempDir::new().expect("Failed to create temp dir");
        let config = EngineConfig::with_data_dir(data.path().join("data"));
        let engine = Engine::new(config).expect("Failed to open engine");
        Self {
            _data: data,
            engine,
        }
    }

    pub fn mirrors_dir(&self) -> PathBuf {
        self.engine.config.mirrors_dir()
    }
}

pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path).expect("Failed to read file")
}
