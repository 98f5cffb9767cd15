//! Thin async adapter over the `git` binary
//!
//! Every invocation runs non-interactively (see `utils::command`), captures
//! both streams as text and is bounded by the configured timeout. Failures
//! come back as classified `EngineError::Git` values with credentials
//! redacted from both the command line and the output.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::models::sync::SyncStatus;
use crate::services::credentials_service::redact_text;
use crate::services::fallback::FirstSuccess;
use crate::services::git_errors::{FailureClassifier, GitErrorCode, SubstringClassifier};
use crate::utils::create_command;

/// Captured result of one `git` invocation
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    /// stderr and stdout joined, for classification
    pub fn combined(&self) -> String {
        match (self.stderr.trim().is_empty(), self.stdout.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stderr.trim(), self.stdout.trim()),
            (false, true) => self.stderr.trim().to_string(),
            _ => self.stdout.trim().to_string(),
        }
    }
}

/// `git` runner shared by every service
#[derive(Clone)]
pub struct GitCli {
    binary: String,
    timeout: Duration,
    classifier: Arc<dyn FailureClassifier>,
}

impl std::fmt::Debug for GitCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCli")
            .field("binary", &self.binary)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GitCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            classifier: Arc::new(SubstringClassifier),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `git` and capture its output. Only spawn failures and timeouts are
    /// errors here; a non-zero exit is reported through `GitOutput::success`.
    pub async fn output(&self, dir: Option<&Path>, args: &[&str]) -> Result<GitOutput> {
        let command_line = redact_text(&args.join(" "));
        tracing::debug!("git {}", command_line);

        let mut cmd = create_command(&self.binary);
        cmd.args(args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!("git {} timed out after {:?}", command_line, self.timeout);
                return Err(EngineError::Git {
                    code: GitErrorCode::NetworkError,
                    command: command_line,
                    detail: format!("operation timed out after {}s", self.timeout.as_secs()),
                });
            }
        };

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Run `git` in `dir`, returning trimmed stdout or a classified error.
    pub async fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        self.run_in(Some(dir), args).await
    }

    pub async fn run_in(&self, dir: Option<&Path>, args: &[&str]) -> Result<String> {
        let output = self.output(dir, args).await?;
        if output.success {
            Ok(output.stdout.trim().to_string())
        } else {
            Err(self.failure(args, &output.combined()))
        }
    }

    /// Classify a failed invocation.
    pub fn failure(&self, args: &[&str], raw: &str) -> EngineError {
        let detail = redact_text(raw.trim());
        EngineError::Git {
            code: self.classifier.classify(&detail),
            command: redact_text(&args.join(" ")),
            detail,
        }
    }

    /// Whether `dir` is itself the top level of a working copy.
    pub async fn is_repository(&self, dir: &Path) -> bool {
        if !dir.is_dir() {
            return false;
        }
        let Ok(toplevel) = self.run(dir, &["rev-parse", "--show-toplevel"]).await else {
            return false;
        };
        match (
            std::fs::canonicalize(dir),
            std::fs::canonicalize(Path::new(&toplevel)),
        ) {
            (Ok(expected), Ok(actual)) => expected == actual,
            _ => false,
        }
    }

    /// Whether HEAD points at a commit (false for unborn or broken HEAD).
    pub async fn has_commits(&self, dir: &Path) -> bool {
        self.run(dir, &["rev-parse", "--verify", "--quiet", "HEAD^{commit}"])
            .await
            .is_ok()
    }

    /// The checked-out branch, tolerating an unborn HEAD. `None` when
    /// detached or unreadable.
    pub async fn current_branch_name(&self, dir: &Path) -> Option<String> {
        FirstSuccess::new("current branch")
            .then("abbrev-ref", || async move {
                let name = self.run(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
                Ok::<_, EngineError>(valid_branch_name(&name))
            })
            .then("symbolic-ref", || async move {
                let name = self.run(dir, &["symbolic-ref", "--short", "-q", "HEAD"]).await?;
                Ok::<_, EngineError>(valid_branch_name(&name))
            })
            .then("branch-list", || async move {
                let listing = self.run(dir, &["branch", "--list"]).await?;
                Ok::<_, EngineError>(parse_branch_listing(&listing))
            })
            .run()
            .await
            .ok()
            .flatten()
    }

    /// Branch names on `origin`, sorted. Asks the remote first and falls back
    /// to cached remote-tracking refs when it cannot be reached.
    pub async fn remote_branches(&self, dir: &Path) -> Result<Vec<String>> {
        let branches = FirstSuccess::new("remote branches")
            .then("ls-remote", || async move {
                let listing = self.run(dir, &["ls-remote", "--heads", "origin"]).await?;
                Ok::<_, EngineError>(Some(parse_ls_remote_heads(&listing)))
            })
            .then("tracking-refs", || async move {
                let listing = self
                    .run(
                        dir,
                        &["for-each-ref", "--format=%(refname)", "refs/remotes/origin"],
                    )
                    .await?;
                let branches = parse_tracking_refs(&listing);
                Ok::<_, EngineError>((!branches.is_empty()).then_some(branches))
            })
            .run()
            .await?;

        Ok(branches.unwrap_or_default())
    }

    /// The remote's symbolic default branch, if it advertises one.
    pub async fn remote_default_branch(&self, dir: &Path) -> Option<String> {
        FirstSuccess::new("remote default branch")
            .then("set-head", || async move {
                self.run(dir, &["remote", "set-head", "origin", "--auto"]).await?;
                let head = self
                    .run(dir, &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"])
                    .await?;
                Ok::<_, EngineError>(head.strip_prefix("origin/").and_then(valid_branch_name))
            })
            .then("ls-remote-symref", || async move {
                let listing = self.run(dir, &["ls-remote", "--symref", "origin", "HEAD"]).await?;
                Ok::<_, EngineError>(parse_symref(&listing))
            })
            .run()
            .await
            .ok()
            .flatten()
    }

    /// Commit and branch state of a working copy.
    ///
    /// Best effort: anything that cannot be read is left empty instead of
    /// failing the caller.
    pub async fn sync_status(&self, dir: &Path, branch_hint: Option<&str>) -> SyncStatus {
        let (head, branch, porcelain) = tokio::join!(
            self.run(dir, &["rev-parse", "--verify", "--quiet", "HEAD^{commit}"]),
            self.current_branch_name(dir),
            self.run(dir, &["status", "--porcelain"]),
        );

        let head_commit = head.ok().filter(|h| !h.is_empty());
        let head_valid = head_commit.is_some();
        let is_dirty = porcelain.map(|p| !p.is_empty()).unwrap_or(false);

        let counts = if head_valid {
            let compare_to = branch_hint
                .map(str::to_string)
                .or_else(|| branch.clone());
            self.ahead_behind(dir, compare_to.as_deref()).await
        } else {
            None
        };

        SyncStatus {
            branch,
            head_commit,
            is_dirty,
            ahead_count: counts.map(|(ahead, _)| ahead),
            behind_count: counts.map(|(_, behind)| behind),
            head_valid,
        }
    }

    /// Commits only on HEAD and only on the remote side, against the
    /// upstream and then `origin/<branch>`.
    async fn ahead_behind(&self, dir: &Path, branch: Option<&str>) -> Option<(u32, u32)> {
        let mut chain = FirstSuccess::new("ahead/behind").then("upstream", || async move {
            let counts = self
                .run(dir, &["rev-list", "--left-right", "--count", "HEAD...@{upstream}"])
                .await?;
            Ok::<_, EngineError>(parse_counts(&counts))
        });

        if let Some(branch) = branch {
            let range = format!("HEAD...origin/{}", branch);
            chain = chain.then("origin-branch", move || async move {
                let counts = self
                    .run(dir, &["rev-list", "--left-right", "--count", range.as_str()])
                    .await?;
                Ok::<_, EngineError>(parse_counts(&counts))
            });
        }

        chain.run().await.ok().flatten()
    }
}

/// A branch name, or `None` for a detached or empty result.
fn valid_branch_name(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() || name == "HEAD" {
        None
    } else {
        Some(name.to_string())
    }
}

/// The starred entry of `git branch --list`, skipping detached HEADs.
fn parse_branch_listing(listing: &str) -> Option<String> {
    listing
        .lines()
        .find_map(|line| line.strip_prefix("* "))
        .map(str::trim)
        .filter(|name| !name.starts_with('('))
        .and_then(valid_branch_name)
}

fn parse_ls_remote_heads(listing: &str) -> Vec<String> {
    let mut branches: Vec<String> = listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|refname| refname.strip_prefix("refs/heads/"))
        .map(str::to_string)
        .collect();
    branches.sort();
    branches.dedup();
    branches
}

fn parse_tracking_refs(listing: &str) -> Vec<String> {
    let mut branches: Vec<String> = listing
        .lines()
        .filter_map(|line| line.trim().strip_prefix("refs/remotes/origin/"))
        .filter(|name| *name != "HEAD")
        .map(str::to_string)
        .collect();
    branches.sort();
    branches.dedup();
    branches
}

/// `ref: refs/heads/main\tHEAD` from `ls-remote --symref`.
fn parse_symref(listing: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let rest = line.strip_prefix("ref:")?;
        let target = rest.split_whitespace().next()?;
        target.strip_prefix("refs/heads/").and_then(valid_branch_name)
    })
}

fn parse_counts(raw: &str) -> Option<(u32, u32)> {
    let mut parts = raw.split_whitespace();
    let ahead = parts.next()?.parse().ok()?;
    let behind = parts.next()?.parse().ok()?;
    Some((ahead, behind))
}
