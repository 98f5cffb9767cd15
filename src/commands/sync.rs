//! Project connection commands

use std::path::PathBuf;

use crate::engine::Engine;
use crate::error::{EngineError, Operation, Result};
use crate::models::project::{ProjectDescriptor, SyncTarget};
use crate::models::sync::SyncOutcome;
use crate::services::credentials_service::{redact_url, RepositoryUrl};
use crate::services::project_state::ensure_outside_internal_dirs;

use super::at_boundary;

/// Connect a remote repository or a local folder as the active project.
///
/// On failure the active project is left in the failed state with no root.
pub async fn sync(engine: &Engine, target: SyncTarget) -> Result<SyncOutcome> {
    let result = match &target {
        SyncTarget::Remote { url, branch } => sync_remote(engine, url, branch.as_deref()).await,
        SyncTarget::Local { path } => sync_local(engine, path).await,
    };

    result.map_err(|e| {
        let e = at_boundary(Operation::Sync, e);
        let (label, url, branch) = match &target {
            SyncTarget::Remote { url, branch } => {
                let shown = RepositoryUrl::parse(url)
                    .map(|u| u.canonical())
                    .unwrap_or_else(|_| redact_url(url));
                (shown.clone(), Some(shown), branch.clone())
            }
            SyncTarget::Local { path } => (path.clone(), None, None),
        };
        if let Err(save_error) = engine.project_state.set_failed(&label, url, branch, &e) {
            tracing::error!("Failed to record failed sync: {}", save_error);
        }
        e
    })
}

async fn sync_remote(engine: &Engine, raw_url: &str, branch: Option<&str>) -> Result<SyncOutcome> {
    let url = RepositoryUrl::parse(raw_url)?;
    url.ensure_host_allowed(&engine.config.forge_host)?;

    let hints = engine.project_state.hints_for(&url)?;
    let mirror = engine.mirrors().sync(&url, branch, &hints).await?;
    if mirror.recovered {
        tracing::info!("Rebuilt mirror {} while syncing", mirror.mirror_path);
    }

    let descriptor = engine.project_state.set_connected(ProjectDescriptor::remote(
        mirror.mirror_path.clone(),
        url.canonical(),
        mirror.branch.clone(),
    ))?;

    Ok(SyncOutcome {
        root: mirror.mirror_path,
        branch: mirror.branch,
        sync_status: Some(mirror.sync_status),
        descriptor,
    })
}

async fn sync_local(engine: &Engine, path: &str) -> Result<SyncOutcome> {
    let requested = PathBuf::from(path.trim());
    let root = match tokio::fs::canonicalize(&requested).await {
        Ok(root) if root.is_dir() => root,
        _ => return Err(EngineError::FolderMissing(path.to_string())),
    };
    ensure_outside_internal_dirs(&root, &engine.config)?;

    let (branch, sync_status) = if engine.git.is_repository(&root).await {
        let status = engine.git.sync_status(&root, None).await;
        (status.branch.clone(), Some(status))
    } else {
        (None, None)
    };

    let mut descriptor = ProjectDescriptor::local(root.to_string_lossy().to_string());
    descriptor.branch = branch.clone();
    let descriptor = engine.project_state.set_connected(descriptor)?;
    tracing::info!("Connected local project {}", descriptor.root);

    Ok(SyncOutcome {
        root: descriptor.root.clone(),
        branch,
        sync_status,
        descriptor,
    })
}

/// Forget the active project.
pub async fn disconnect(engine: &Engine) -> Result<ProjectDescriptor> {
    let descriptor = engine
        .project_state
        .disconnect()
        .map_err(|e| at_boundary(Operation::Sync, e))?;
    tracing::info!("Disconnected active project");
    Ok(descriptor)
}

pub async fn active_project(engine: &Engine) -> Result<ProjectDescriptor> {
    engine
        .project_state
        .load()
        .map_err(|e| at_boundary(Operation::Status, e))
}

/// Remember which project `run_id` worked on.
pub async fn record_run(engine: &Engine, run_id: &str) -> Result<()> {
    let record = || -> Result<()> {
        let run_id = run_id.trim();
        if run_id.is_empty() {
            return Err(EngineError::RunNotFound(String::new()));
        }
        let descriptor = engine.project_state.load()?;
        if !descriptor.is_connected() {
            return Err(EngineError::ProjectNotSelected);
        }
        engine.project_state.record_run(run_id, &descriptor)?;
        tracing::debug!("Recorded run {} for {}", run_id, descriptor.source_label);
        Ok(())
    };
    record().map_err(|e| at_boundary(Operation::Status, e))
}

/// Replay the project a previous run worked on through the normal sync path.
pub async fn reconnect_from_history(engine: &Engine, run_id: &str) -> Result<SyncOutcome> {
    let descriptor = engine
        .project_state
        .descriptor_for_run(run_id.trim())
        .map_err(|e| at_boundary(Operation::Sync, e))?
        .ok_or_else(|| at_boundary(Operation::Sync, EngineError::RunNotFound(run_id.to_string())))?;

    let target = SyncTarget::from_descriptor(&descriptor).ok_or_else(|| {
        at_boundary(Operation::Sync, EngineError::RunNotFound(run_id.to_string()))
    })?;

    tracing::info!("Reconnecting run {} to {}", run_id, target.label());
    sync(engine, target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::{ConnectionStatus, ProjectMode};
    use crate::services::config::EngineConfig;
    use crate::services::store::Store;
    use crate::test_utils::TestRemote;
    use tempfile::TempDir;

    fn engine(data: &TempDir) -> Engine {
        let config = EngineConfig::with_data_dir(data.path().join("data"));
        Engine::with_store(config, Store::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_sync_local_folder() {
        let data = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let engine = engine(&data);

        let outcome = sync(
            &engine,
            SyncTarget::Local {
                path: project.path().display().to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.descriptor.mode, ProjectMode::Local);
        assert!(outcome.sync_status.is_none());
        assert_eq!(active_project(&engine).await.unwrap(), outcome.descriptor);
    }

    #[tokio::test]
    async fn test_sync_local_rejects_internal_dirs() {
        let data = TempDir::new().unwrap();
        let engine = engine(&data);
        std::fs::create_dir_all(engine.config.mirrors_dir()).unwrap();

        let err = sync(
            &engine,
            SyncTarget::Local {
                path: engine.config.mirrors_dir().display().to_string(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "internal_path_blocked");
        assert_eq!(
            active_project(&engine).await.unwrap().connection_status,
            ConnectionStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_unsupported_host_fails_sync() {
        let data = TempDir::new().unwrap();
        let engine = engine(&data);

        let err = sync(
            &engine,
            SyncTarget::Remote {
                url: "https://user:pw@gitlab.com/o/r".to_string(),
                branch: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "unsupported_host");

        let active = active_project(&engine).await.unwrap();
        assert_eq!(active.repository_url.as_deref(), Some("https://gitlab.com/o/r"));
        assert!(!serde_json::to_string(&active).unwrap().contains("pw"));
    }

    #[tokio::test]
    async fn test_record_and_reconnect() {
        let data = TempDir::new().unwrap();
        let engine = engine(&data);
        let remote = TestRemote::with_branches("main", &["main", "develop"]);

        sync(
            &engine,
            SyncTarget::Remote {
                url: remote.url(),
                branch: Some("develop".to_string()),
            },
        )
        .await
        .unwrap();
        record_run(&engine, "run-7").await.unwrap();

        disconnect(&engine).await.unwrap();
        assert_eq!(active_project(&engine).await.unwrap().mode, ProjectMode::None);

        let outcome = reconnect_from_history(&engine, "run-7").await.unwrap();
        assert_eq!(outcome.branch.as_deref(), Some("develop"));
        assert!(outcome.descriptor.is_connected());

        let err = reconnect_from_history(&engine, "run-unknown").await.unwrap_err();
        assert_eq!(err.code(), "run_not_found");
    }

    #[tokio::test]
    async fn test_record_run_requires_connected_project() {
        let data = TempDir::new().unwrap();
        let engine = engine(&data);
        let err = record_run(&engine, "run-1").await.unwrap_err();
        assert_eq!(err.code(), "project_not_selected");
    }
}
