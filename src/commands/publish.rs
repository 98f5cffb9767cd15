//! Publish command handler
//!
//! Commits the working tree of the active project and pushes the checked
//! out branch to `origin`. A rejected push is an outcome, not an error: the
//! commit stays in place and the caller gets the classified reason.

use std::path::Path;

use crate::engine::Engine;
use crate::error::{EngineError, Operation, Result};
use crate::models::sync::{CommitInfo, PublishOutcome};
use crate::services::git_errors::GitErrorCode;
use crate::services::planner;
use crate::services::sandbox;
use crate::services::session_service::root_key;

use super::apply::ready_root;
use super::at_boundary;

const DEFAULT_COMMIT_MESSAGE: &str = "Apply patchdeck changes";

pub async fn publish(
    engine: &Engine,
    commit_message: &str,
    files: &[String],
) -> Result<PublishOutcome> {
    let publish = async {
        let root = ready_root(engine).await?;
        let _guard = engine.project_locks.acquire(&root_key(&root)).await;

        for file in files {
            let key = sandbox::relative_key(&root, file)?;
            if planner::is_protected(&key, &engine.config.protected_patterns) {
                return Err(EngineError::ProtectedFileWriteBlocked(key));
            }
        }

        let branch = engine
            .git
            .current_branch_name(&root)
            .await
            .ok_or_else(|| EngineError::Git {
                code: GitErrorCode::LocalBranchMissing,
                command: "symbolic-ref HEAD".to_string(),
                detail: "HEAD is not on a branch".to_string(),
            })?;

        let commit_info = commit_all(engine, &root, commit_message).await?;
        if commit_info.is_none() {
            let status = engine.git.sync_status(&root, Some(&branch)).await;
            let nothing_ahead = !status.head_valid || status.ahead_count == Some(0);
            if nothing_ahead {
                return Err(EngineError::NothingToCommit);
            }
            tracing::info!("Nothing new to commit, pushing unpublished commits on {}", branch);
        }

        push(engine, &root, branch, commit_info).await
    };
    publish.await.map_err(|e| at_boundary(Operation::Publish, e))
}

/// Stage everything and commit. `None` when nothing was staged.
async fn commit_all(engine: &Engine, root: &Path, message: &str) -> Result<Option<CommitInfo>> {
    engine.git.run(root, &["add", "-A"]).await?;

    let staged = engine
        .git
        .run(root, &["diff", "--cached", "--name-only"])
        .await?;
    let files: Vec<String> = staged
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if files.is_empty() {
        return Ok(None);
    }

    let message = match message.trim() {
        "" => DEFAULT_COMMIT_MESSAGE,
        message => message,
    };
    let name = format!("user.name={}", engine.config.commit_name);
    let email = format!("user.email={}", engine.config.commit_email);
    engine
        .git
        .run(
            root,
            &["-c", &name, "-c", &email, "commit", "--quiet", "-m", message],
        )
        .await?;

    let oid = engine.git.run(root, &["rev-parse", "HEAD"]).await?;
    let short_oid = oid.chars().take(7).collect();
    tracing::info!("Committed {} files as {}", files.len(), oid);

    Ok(Some(CommitInfo {
        oid,
        short_oid,
        message: message.to_string(),
        files,
    }))
}

async fn push(
    engine: &Engine,
    root: &Path,
    branch: String,
    commit_info: Option<CommitInfo>,
) -> Result<PublishOutcome> {
    let refspec = format!("HEAD:refs/heads/{}", branch);
    let args = ["push", "--porcelain", "origin", refspec.as_str()];
    let output = engine.git.output(Some(root), &args).await?;

    if output.success {
        tracing::info!("Pushed {} to origin", branch);
        let upstream = format!("origin/{}", branch);
        if let Err(e) = engine
            .git
            .run(root, &["branch", "--set-upstream-to", &upstream])
            .await
        {
            tracing::debug!("Could not set upstream of {} to {}: {}", branch, upstream, e);
        }
        return Ok(PublishOutcome {
            pushed: true,
            branch,
            commit_info,
            reason: None,
            message: None,
            hint: None,
        });
    }

    let failure = engine.git.failure(&args, &output.combined());
    tracing::warn!("Push of {} was rejected [{}]", branch, failure.code());
    Ok(PublishOutcome {
        pushed: false,
        branch,
        commit_info,
        reason: Some(failure.code()),
        message: Some(failure.reason()),
        hint: Some(failure.hint().to_string()),
    })
}
