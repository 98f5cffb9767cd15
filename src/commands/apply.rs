//! Apply command handlers
//!
//! Every write goes through the sandbox, the protected-file check and a
//! session snapshot before any bytes reach the disk.

use std::path::{Path, PathBuf};

use crate::engine::Engine;
use crate::error::{EngineError, Operation, Result};
use crate::models::attempt::ApplyFileResult;
use crate::models::plan::{EditPlan, PlanApplyResult};
use crate::services::planner::{self, EditPlanGenerator};
use crate::services::project_state::assert_ready;
use crate::services::sandbox;
use crate::services::session_service::root_key;

use super::at_boundary;

/// Root of the active project, failing closed.
pub(crate) async fn ready_root(engine: &Engine) -> Result<PathBuf> {
    let descriptor = engine.project_state.load()?;
    assert_ready(&descriptor, &engine.config, &engine.git).await
}

/// Open a new apply attempt on the active project.
pub async fn start_attempt(engine: &Engine) -> Result<String> {
    let start = async {
        let root = ready_root(engine).await?;
        let _guard = engine.project_locks.acquire(&root_key(&root)).await;
        Ok::<_, EngineError>(engine.sessions.start(&root)?.id)
    };
    start.await.map_err(|e| at_boundary(Operation::Apply, e))
}

/// Write one file inside an attempt, opening a new attempt if none is given.
pub async fn apply_file(
    engine: &Engine,
    attempt_id: Option<String>,
    relative_path: &str,
    content: &str,
) -> Result<ApplyFileResult> {
    let apply = async {
        let root = ready_root(engine).await?;
        let _guard = engine.project_locks.acquire(&root_key(&root)).await;

        let target = check_writable(engine, &root, relative_path)?;
        let attempt_id = match attempt_id {
            Some(id) => id,
            None => engine.sessions.start(&root)?.id,
        };
        write_file(engine, &root, &attempt_id, relative_path, &target, content).await
    };
    apply.await.map_err(|e| at_boundary(Operation::Apply, e))
}

/// Apply every file of `plan` inside one new attempt.
///
/// All paths are checked before anything is written. If a write fails
/// midway the attempt is undone, so a plan lands completely or not at all.
pub async fn apply_plan(engine: &Engine, plan: &EditPlan) -> Result<PlanApplyResult> {
    let apply = async {
        planner::validate_plan(plan)?;
        let root = ready_root(engine).await?;
        let _guard = engine.project_locks.acquire(&root_key(&root)).await;

        let targets = plan
            .files
            .iter()
            .map(|file| check_writable(engine, &root, &file.file_name))
            .collect::<Result<Vec<_>>>()?;

        let attempt = engine.sessions.start(&root)?;
        let mut files = Vec::with_capacity(plan.files.len());
        let mut created = Vec::new();

        for (file, target) in plan.files.iter().zip(&targets) {
            match write_file(engine, &root, &attempt.id, &file.file_name, target, &file.full_code).await
            {
                Ok(result) => {
                    if result.created && !created.contains(&result.relative_path) {
                        created.push(result.relative_path.clone());
                    }
                    if !files.contains(&result.relative_path) {
                        files.push(result.relative_path);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Plan write to {} failed, rolling back attempt {}",
                        file.file_name,
                        attempt.id
                    );
                    if let Err(undo_error) = engine.sessions.undo(&attempt.id) {
                        tracing::error!("Rollback of {} failed: {}", attempt.id, undo_error);
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(
            "Applied plan '{}' as attempt {} ({} files)",
            plan.summary,
            attempt.id,
            files.len()
        );
        Ok::<_, EngineError>(PlanApplyResult {
            attempt_id: attempt.id,
            summary: plan.summary.clone(),
            files,
            created,
        })
    };
    apply.await.map_err(|e| at_boundary(Operation::Apply, e))
}

/// Ask `generator` for a plan against the active project and apply it.
pub async fn propose_and_apply(
    engine: &Engine,
    generator: &dyn EditPlanGenerator,
    request: &str,
) -> Result<PlanApplyResult> {
    let propose = async {
        let root = ready_root(engine).await?;
        let config = engine.config.clone();
        let context = tokio::task::spawn_blocking(move || planner::collect_context(&root, &config))
            .await
            .map_err(|e| EngineError::OperationFailed {
                operation: Operation::Plan,
                detail: e.to_string(),
            })??;

        tracing::debug!("Requesting plan with {} context files", context.files.len());
        generator.generate(&context, request).await
    };
    let plan = propose.await.map_err(|e| at_boundary(Operation::Plan, e))?;

    apply_plan(engine, &plan).await
}

/// Reject writes the engine must never make, returning the target path.
fn check_writable(engine: &Engine, root: &Path, relative_path: &str) -> Result<PathBuf> {
    let key = sandbox::relative_key(root, relative_path)?;
    if planner::is_protected(&key, &engine.config.protected_patterns) {
        return Err(EngineError::ProtectedFileWriteBlocked(key));
    }

    let target = sandbox::resolve_file(root, relative_path)?;
    // Mirror roots live inside the data dir; only dirs the root is outside of count
    if engine
        .config
        .internal_dirs()
        .iter()
        .any(|internal| !sandbox::is_inside(internal, root) && sandbox::is_inside(internal, &target))
    {
        return Err(EngineError::InternalPathBlocked(key));
    }

    // Writes never go through a link, wherever it points
    if sandbox::is_symlink(&target) {
        return Err(EngineError::PathViolation(relative_path.to_string()));
    }
    sandbox::ensure_real_parent(root, &target, relative_path)?;

    Ok(target)
}

async fn write_file(
    engine: &Engine,
    root: &Path,
    attempt_id: &str,
    relative_path: &str,
    target: &Path,
    content: &str,
) -> Result<ApplyFileResult> {
    let existed = target.is_file();
    engine.sessions.snapshot(attempt_id, root, relative_path)?;

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, content).await?;

    let relative_path = sandbox::relative_key(root, relative_path)?;
    tracing::debug!("Wrote {} in attempt {}", relative_path, attempt_id);
    Ok(ApplyFileResult {
        attempt_id: attempt_id.to_string(),
        relative_path,
        created: !existed,
    })
}
