//! Undo command handlers

use std::path::PathBuf;

use crate::engine::Engine;
use crate::error::{EngineError, Operation, Result};
use crate::models::attempt::{AttemptStatusReport, UndoOutcome};
use crate::services::session_service::root_key;

use super::apply::ready_root;
use super::at_boundary;

/// Undo an attempt, or the latest active attempt of the current project.
pub async fn undo(engine: &Engine, attempt_id: Option<String>) -> Result<UndoOutcome> {
    let undo = async {
        let root = ready_root(engine).await?;
        let _guard = engine.project_locks.acquire(&root_key(&root)).await;

        let attempt = match attempt_id {
            Some(id) => engine.sessions.get(&id)?,
            None => engine.sessions.find_latest_active(&root)?.ok_or_else(|| {
                EngineError::AttemptNotFound(format!("no active attempt for {}", root.display()))
            })?,
        };
        if attempt.project_root != root_key(&root) {
            return Err(EngineError::AttemptWrongProject {
                attempt_id: attempt.id,
                attempt_root: attempt.project_root,
            });
        }

        engine.sessions.undo(&attempt.id)
    };
    undo.await.map_err(|e| at_boundary(Operation::Undo, e))
}

/// Whether `root` (default: the active project) has an attempt to undo.
pub async fn latest_attempt_status(
    engine: &Engine,
    root: Option<String>,
) -> Result<AttemptStatusReport> {
    let status = || -> Result<AttemptStatusReport> {
        let root = match root {
            Some(root) => PathBuf::from(root),
            None => {
                let descriptor = engine.project_state.load()?;
                if descriptor.root.is_empty() {
                    return Ok(AttemptStatusReport {
                        has_undoable_changes: false,
                        attempt_summary: None,
                    });
                }
                PathBuf::from(descriptor.root)
            }
        };

        let latest = engine.sessions.find_latest_active(&root)?;
        Ok(AttemptStatusReport {
            has_undoable_changes: latest.as_ref().is_some_and(|a| !a.files.is_empty()),
            attempt_summary: latest.map(|a| a.summary()),
        })
    };
    status().map_err(|e| at_boundary(Operation::Status, e))
}
