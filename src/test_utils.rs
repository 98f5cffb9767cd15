//! Test utilities for creating temporary git repositories and remotes

#![cfg(test)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary git repository for testing
pub struct TestRepo {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TestRepo {
    /// Create a new empty git repository
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().to_path_buf();
        init_repo(&path);
        Self { dir, path }
    }

    /// Create a repository with an initial commit
    pub fn with_initial_commit() -> Self {
        let test_repo = Self::new();
        test_repo.create_commit("Initial commit", &[("README.md", "# Test Repo")]);
        test_repo
    }

    /// Get the repository path as a string
    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    /// Get the git2 repository
    pub fn repo(&self) -> git2::Repository {
        git2::Repository::open(&self.path).expect("Failed to open repo")
    }

    /// Create a file with content
    pub fn create_file(&self, name: &str, content: &str) {
        let file_path = self.path.join(name);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        std::fs::write(&file_path, content).expect("Failed to write file");
    }

    /// Create a commit with the given files
    pub fn create_commit(&self, message: &str, files: &[(&str, &str)]) -> git2::Oid {
        let repo = self.repo();

        for (name, content) in files {
            self.create_file(name, content);
        }

        let mut index = repo.index().expect("Failed to get index");
        for (name, _) in files {
            index
                .add_path(Path::new(name))
                .expect("Failed to stage file");
        }
        index.write().expect("Failed to write index");

        let tree_oid = index.write_tree().expect("Failed to write tree");
        let tree = repo.find_tree(tree_oid).expect("Failed to find tree");
        let sig = repo.signature().expect("Failed to get signature");

        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.as_ref().into_iter().collect();

        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .expect("Failed to create commit")
    }

    /// Commit one file onto `branch` without touching the working tree.
    ///
    /// The branch is created from HEAD when it does not exist yet.
    pub fn commit_to_branch(&self, branch: &str, file: &str, content: &str) -> git2::Oid {
        let repo = self.repo();
        let refname = format!("refs/heads/{}", branch);

        let parent = match repo.find_reference(&refname) {
            Ok(reference) => reference.peel_to_commit().expect("Failed to peel branch"),
            Err(_) => repo
                .head()
                .expect("Failed to get HEAD")
                .peel_to_commit()
                .expect("Failed to get commit"),
        };

        let blob = repo.blob(content.as_bytes()).expect("Failed to write blob");
        let base = parent.tree().expect("Failed to get tree");
        let mut builder = repo.treebuilder(Some(&base)).expect("Failed to get tree builder");
        builder
            .insert(file, blob, 0o100644)
            .expect("Failed to insert blob");
        let tree_oid = builder.write().expect("Failed to write tree");
        let tree = repo.find_tree(tree_oid).expect("Failed to find tree");
        let sig = repo.signature().expect("Failed to get signature");

        repo.commit(
            Some(&refname),
            &sig,
            &sig,
            &format!("Update {} on {}", file, branch),
            &tree,
            &[&parent],
        )
        .expect("Failed to create commit")
    }

    /// Point HEAD at `refs/heads/<name>`, which may not exist yet
    pub fn set_head(&self, name: &str) {
        self.repo()
            .set_head(&format!("refs/heads/{}", name))
            .expect("Failed to set HEAD");
    }

    /// Detach HEAD at the current commit
    pub fn detach_head(&self) {
        let repo = self.repo();
        let oid = self.head_oid();
        repo.set_head_detached(oid).expect("Failed to detach HEAD");
    }

    /// Get the current branch name
    pub fn current_branch(&self) -> String {
        let repo = self.repo();
        let head = repo.head().expect("Failed to get HEAD");
        head.shorthand().unwrap_or("").to_string()
    }

    /// Get the HEAD commit OID
    pub fn head_oid(&self) -> git2::Oid {
        let repo = self.repo();
        let head = repo.head().expect("Failed to get HEAD");
        head.target().expect("Failed to get target")
    }

    /// Add a remote
    pub fn add_remote(&self, name: &str, url: &str) {
        let repo = self.repo();
        repo.remote(name, url).expect("Failed to add remote");
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

fn init_repo(path: &Path) -> git2::Repository {
    let repo = git2::Repository::init(path).expect("Failed to init repo");

    let mut config = repo.config().expect("Failed to get config");
    config
        .set_str("user.name", "Test User")
        .expect("Failed to set user.name");
    config
        .set_str("user.email", "test@example.com")
        .expect("Failed to set user.email");
    repo
}

/// A repository standing in for a forge remote, reachable over `file://`.
///
/// It lives at `<tmp>/<owner>/<name>` so mirrors derive a predictable slug,
/// and accepts pushes to its checked-out branch.
pub struct TestRemote {
    pub repo: TestRepo,
    pub path: PathBuf,
}

impl TestRemote {
    /// An empty remote at `<tmp>/org/repo`
    pub fn empty() -> Self {
        Self::named("org", "repo")
    }

    pub fn named(owner: &str, name: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join(owner).join(name);
        std::fs::create_dir_all(&path).expect("Failed to create remote dir");

        let git_repo = init_repo(&path);
        let mut config = git_repo.config().expect("Failed to get config");
        config
            .set_str("receive.denyCurrentBranch", "ignore")
            .expect("Failed to allow pushes");

        Self {
            repo: TestRepo {
                dir,
                path: path.clone(),
            },
            path,
        }
    }

    /// A remote whose HEAD is `default`, with every branch in `branches`.
    ///
    /// Each branch carries a `BRANCH.txt` naming it.
    pub fn with_branches(default: &str, branches: &[&str]) -> Self {
        let remote = Self::empty();
        remote.populate(default, branches);
        remote
    }

    /// A remote with branches but a HEAD that resolves to nothing
    pub fn without_default(branches: &[&str]) -> Self {
        let remote = Self::empty();
        remote.populate(branches[0], branches);
        remote.repo.set_head("no-such-default");
        remote
    }

    fn populate(&self, default: &str, branches: &[&str]) {
        self.repo.set_head(default);
        self.repo.create_commit(
            "Initial commit",
            &[("README.md", "# Test Remote"), ("BRANCH.txt", default)],
        );
        for branch in branches.iter().filter(|b| **b != default) {
            self.repo.commit_to_branch(branch, "BRANCH.txt", branch);
        }
    }

    pub fn url(&self) -> String {
        format!("file://{}", self.path.display())
    }

    /// Latest commit on a branch
    pub fn branch_head(&self, branch: &str) -> Option<git2::Oid> {
        let repo = git2::Repository::open(&self.path).ok()?;
        let reference = repo.find_reference(&format!("refs/heads/{}", branch)).ok()?;
        reference.target()
    }

    /// Install a `pre-receive` hook that rejects every push with `message`.
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

    /// Allow pushes again
    pub fn accept_pushes(&self) {
        let _ = std::fs::remove_file(self.path.join(".git").join("hooks").join("pre-receive"));
    }

    /// A full working clone in a fresh temp dir, via the `git` binary
    pub fn clone_to_temp(&self) -> TestRepo {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("clone");
        let status = std::process::Command::new("git")
            .args(["clone", "--quiet", &self.url()])
            .arg(&path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .status()
            .expect("Failed to run git clone");
        assert!(status.success(), "git clone failed");

        let repo = git2::Repository::open(&path).expect("Failed to open clone");
        let mut config = repo.config().expect("Failed to get config");
        config
            .set_str("user.name", "Test User")
            .expect("Failed to set user.name");
        config
            .set_str("user.email", "test@example.com")
            .expect("Failed to set user.email");

        TestRepo { dir, path }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_repo() {
        let repo = TestRepo::new();
        assert!(repo.path.exists());
        assert!(repo.path.join(".git").exists());
    }

    #[test]
    fn test_create_commit() {
        let repo = TestRepo::with_initial_commit();
        let git_repo = repo.repo();
        let head = git_repo.head().expect("No HEAD");
        assert!(head.target().is_some());
    }

    #[test]
    fn test_remote_branches_carry_marker_file() {
        let remote = TestRemote::with_branches("main", &["main", "develop"]);
        assert!(remote.branch_head("main").is_some());
        assert!(remote.branch_head("develop").is_some());
        assert_ne!(remote.branch_head("main"), remote.branch_head("develop"));
        assert!(remote.url().starts_with("file:///"));
        assert!(remote.url().ends_with("/org/repo"));
    }

    #[test]
    fn test_remote_without_default_has_unborn_head() {
        let remote = TestRemote::without_default(&["alpha", "beta"]);
        let repo = git2::Repository::open(&remote.path).unwrap();
        assert!(repo.head().is_err());
        assert!(remote.branch_head("alpha").is_some());
        assert!(remote.branch_head("beta").is_some());
    }
}
