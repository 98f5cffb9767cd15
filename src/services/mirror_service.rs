//! Repository mirrors
//!
//! One managed clone per remote repository at `<mirrors_dir>/<slug>`. A sync
//! creates or refreshes the mirror, then checks out exactly one branch:
//! the requested one, or the one the branch resolver settles on.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::models::sync::MirrorSync;
use crate::services::branch_resolver;
use crate::services::config::EngineConfig;
use crate::services::credentials_service::RepositoryUrl;
use crate::services::fallback::FirstSuccess;
use crate::services::git_cli::GitCli;
use crate::services::git_errors::{is_remote_failure, looks_corrupted, GitErrorCode};
use crate::services::locks::KeyedLocks;
use crate::services::sandbox;

const ALL_HEADS_REFSPEC: &str = "+refs/heads/*:refs/remotes/origin/*";

pub struct MirrorService<'a> {
    git: &'a GitCli,
    config: &'a EngineConfig,
    locks: &'a KeyedLocks,
}

impl<'a> MirrorService<'a> {
    pub fn new(git: &'a GitCli, config: &'a EngineConfig, locks: &'a KeyedLocks) -> Self {
        Self { git, config, locks }
    }

    pub fn mirror_path(&self, url: &RepositoryUrl) -> PathBuf {
        self.config.mirrors_dir().join(url.slug())
    }

    /// Bring the mirror of `url` up to date and check out one branch.
    ///
    /// An explicitly requested branch that is missing on the remote fails
    /// with `branch_selection_required`; it is never replaced by a default.
    pub async fn sync(
        &self,
        url: &RepositoryUrl,
        requested_branch: Option<&str>,
        hints: &[String],
    ) -> Result<MirrorSync> {
        let slug = url.slug();
        let _guard = self.locks.acquire(&slug).await;

        let mirror = self.mirror_path(url);
        let clone_url = url.clone_url(self.config.access_token.as_deref());
        let requested_branch = requested_branch.map(str::trim).filter(|b| !b.is_empty());

        tracing::info!(
            "Syncing {} into {} (branch: {})",
            url.canonical(),
            mirror.display(),
            requested_branch.unwrap_or("<default>")
        );

        let recovered = self.ensure_mirror(&mirror, &clone_url, requested_branch).await?;

        let remote_branches = self.git.remote_branches(&mirror).await?;
        if remote_branches.is_empty() {
            tracing::info!("Remote of {} has no branches, keeping local state", slug);
            let branch = self.git.current_branch_name(&mirror).await;
            let sync_status = self.git.sync_status(&mirror, branch.as_deref()).await;
            return Ok(MirrorSync {
                mirror_path: mirror.to_string_lossy().to_string(),
                branch,
                sync_status,
                recovered,
            });
        }

        let branch = match requested_branch {
            Some(branch) => {
                if !remote_branches.iter().any(|b| b == branch) {
                    return Err(missing_requested_branch(branch, remote_branches));
                }
                branch.to_string()
            }
            None => {
                branch_resolver::resolve_default_branch(self.git, &mirror, hints)
                    .await?
                    .branch
            }
        };

        self.checkout(&mirror, &branch)
            .await
            .map_err(|e| match e.git_code() {
                Some(GitErrorCode::BranchMissing) | Some(GitErrorCode::LocalBranchMissing) => {
                    missing_requested_branch(&branch, remote_branches.clone())
                }
                _ => e,
            })?;

        let sync_status = self.git.sync_status(&mirror, Some(&branch)).await;
        tracing::info!(
            "Synced {} at {} ({})",
            slug,
            branch,
            sync_status.head_commit.as_deref().unwrap_or("no commits")
        );

        Ok(MirrorSync {
            mirror_path: mirror.to_string_lossy().to_string(),
            branch: Some(branch),
            sync_status,
            recovered,
        })
    }

    /// Clone or refresh the mirror. Returns whether it had to be rebuilt.
    async fn ensure_mirror(
        &self,
        mirror: &Path,
        clone_url: &str,
        requested_branch: Option<&str>,
    ) -> Result<bool> {
        if !mirror.exists() {
            self.clone_fresh(mirror, clone_url, requested_branch).await?;
            self.refresh(mirror, clone_url).await?;
            return Ok(false);
        }

        if !self.git.is_repository(mirror).await {
            tracing::warn!("{} is not a valid repository, re-cloning", mirror.display());
            self.rebuild(mirror, clone_url, requested_branch).await?;
            return Ok(true);
        }

        let Err(error) = self.refresh(mirror, clone_url).await else {
            return Ok(false);
        };

        let code = error.git_code().unwrap_or(GitErrorCode::Unknown);
        if is_remote_failure(code) {
            return Err(error);
        }

        let detail = error.details().unwrap_or_default();
        if looks_corrupted(&detail) {
            tracing::warn!("Mirror {} looks corrupted: {}", mirror.display(), detail);
            self.rebuild(mirror, clone_url, requested_branch).await?;
            return Ok(true);
        }

        tracing::warn!("Refreshing {} failed, retrying once: {}", mirror.display(), detail);
        self.refresh(mirror, clone_url).await?;
        Ok(false)
    }

    async fn rebuild(
        &self,
        mirror: &Path,
        clone_url: &str,
        requested_branch: Option<&str>,
    ) -> Result<()> {
        self.wipe(mirror).await?;
        self.clone_fresh(mirror, clone_url, requested_branch).await?;
        self.refresh(mirror, clone_url).await
    }

    async fn wipe(&self, mirror: &Path) -> Result<()> {
        let mirrors_dir = self.config.mirrors_dir();
        if !sandbox::is_inside(&mirrors_dir, mirror) || mirror == mirrors_dir {
            return Err(EngineError::PathViolation(mirror.display().to_string()));
        }
        match tokio::fs::remove_dir_all(mirror).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Shallow clone of the requested branch, falling back to the default
    /// branch on any failure.
    async fn clone_fresh(
        &self,
        mirror: &Path,
        clone_url: &str,
        requested_branch: Option<&str>,
    ) -> Result<()> {
        tokio::fs::create_dir_all(self.config.mirrors_dir()).await?;
        let target = mirror.to_string_lossy().to_string();

        let mut chain = FirstSuccess::new("clone");
        if let Some(branch) = requested_branch {
            let target = target.clone();
            chain = chain.then("requested-branch", move || async move {
                let args = [
                    "clone",
                    "--depth",
                    "1",
                    "--branch",
                    branch,
                    "--",
                    clone_url,
                    target.as_str(),
                ];
                match self.git.run_in(None, &args).await {
                    Ok(_) => Ok(Some(())),
                    Err(e) => {
                        tracing::info!("Clone of branch '{}' failed, using default: {}", branch, e);
                        self.wipe(mirror).await?;
                        Ok(None)
                    }
                }
            });
        }
        chain = chain.then("default-branch", move || async move {
            let args = ["clone", "--depth", "1", "--", clone_url, target.as_str()];
            match self.git.run_in(None, &args).await {
                Ok(_) => Ok(Some(())),
                Err(e) => {
                    if let Err(wipe_error) = self.wipe(mirror).await {
                        tracing::warn!("Failed to clear partial clone {}: {}", mirror.display(), wipe_error);
                    }
                    Err(e)
                }
            }
        });

        if chain.run().await?.is_none() {
            return Err(EngineError::OperationFailed {
                operation: crate::error::Operation::Sync,
                detail: "clone produced no working copy".to_string(),
            });
        }

        tracing::debug!("Cloned {}", mirror.display());
        Ok(())
    }

    /// Re-point `origin`, widen the refspec to all heads and fetch.
    async fn refresh(&self, mirror: &Path, clone_url: &str) -> Result<()> {
        self.git
            .run(mirror, &["remote", "set-url", "origin", clone_url])
            .await?;
        self.git
            .run(
                mirror,
                &["config", "--replace-all", "remote.origin.fetch", ALL_HEADS_REFSPEC],
            )
            .await?;
        self.git
            .run(mirror, &["fetch", "--all", "--prune", "--quiet"])
            .await?;
        Ok(())
    }

    /// Hard checkout of `origin/<branch>` as local `<branch>`.
    async fn checkout(&self, mirror: &Path, branch: &str) -> Result<()> {
        let remote_ref = format!("origin/{}", branch);
        let refspec = format!("+refs/heads/{0}:refs/remotes/origin/{0}", branch);

        self.git
            .run(mirror, &["fetch", "--quiet", "origin", &refspec])
            .await?;
        self.git
            .run(mirror, &["checkout", "--force", "-B", branch, &remote_ref])
            .await?;
        self.git
            .run(mirror, &["reset", "--hard", "--quiet", &remote_ref])
            .await?;
        // Tracking may not be set up when the local branch already existed
        if let Err(e) = self
            .git
            .run(mirror, &["branch", "--set-upstream-to", &remote_ref, branch])
            .await
        {
            tracing::debug!("Could not set upstream of {} to {}: {}", branch, remote_ref, e);
        }
        Ok(())
    }
}

fn missing_requested_branch(branch: &str, mut remote_branches: Vec<String>) -> EngineError {
    remote_branches.sort();
    EngineError::BranchSelectionRequired {
        reason: format!("Branch '{}' does not exist on the remote", branch),
        candidates: remote_branches,
    }
}
