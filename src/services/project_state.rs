//! Active project state
//!
//! The one active project descriptor lives in the state store and is
//! replaced wholesale by sync, disconnect and reconnect. `assert_ready`
//! guards every operation that reads or writes project files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::error::{EngineError, Result};
use crate::models::project::{ConnectionStatus, ProjectDescriptor, ProjectMode};
use crate::services::config::EngineConfig;
use crate::services::credentials_service::RepositoryUrl;
use crate::services::git_cli::GitCli;
use crate::services::sandbox;
use crate::services::store::Store;

#[derive(Clone)]
pub struct ProjectState {
    store: Arc<Store>,
}

impl ProjectState {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Result<ProjectDescriptor> {
        self.store.load_active()
    }

    pub fn set_connected(&self, mut descriptor: ProjectDescriptor) -> Result<ProjectDescriptor> {
        descriptor.connection_status = ConnectionStatus::Connected;
        descriptor.last_connection_error = None;
        descriptor.last_error_code = None;
        descriptor.last_error_hint = None;
        descriptor.updated_at = Some(Utc::now());
        self.store.save_active(&descriptor)?;
        Ok(descriptor)
    }

    /// Record a failed connection. The previous root is discarded so nothing
    /// can keep operating on it.
    pub fn set_failed(
        &self,
        source_label: &str,
        repository_url: Option<String>,
        branch: Option<String>,
        error: &EngineError,
    ) -> Result<ProjectDescriptor> {
        let descriptor =
            ProjectDescriptor::failed(source_label.to_string(), repository_url, branch, error);
        self.store.save_active(&descriptor)?;
        Ok(descriptor)
    }

    pub fn disconnect(&self) -> Result<ProjectDescriptor> {
        let descriptor = ProjectDescriptor::default();
        self.store.save_active(&descriptor)?;
        Ok(descriptor)
    }

    /// Branches previously used with this repository, most recent first:
    /// the active descriptor's branch, then recorded runs.
    pub fn hints_for(&self, url: &RepositoryUrl) -> Result<Vec<String>> {
        let key = url.hint_key();
        let mut hints = Vec::new();

        let active = self.load()?;
        if let (Some(active_url), Some(branch)) = (&active.repository_url, &active.branch) {
            let same_repository = RepositoryUrl::parse(active_url)
                .map(|u| u.hint_key() == key)
                .unwrap_or(false);
            if same_repository && !branch.is_empty() {
                hints.push(branch.clone());
            }
        }

        for branch in self.store.branches_for_repository(&key)? {
            if !hints.contains(&branch) {
                hints.push(branch);
            }
        }

        Ok(hints)
    }

    /// Associate a run with a descriptor for later reconnects and hints.
    pub fn record_run(&self, run_id: &str, descriptor: &ProjectDescriptor) -> Result<()> {
        let key = descriptor
            .repository_url
            .as_deref()
            .and_then(|url| RepositoryUrl::parse(url).ok())
            .map(|url| url.hint_key());
        self.store.record_run(run_id, descriptor, key.as_deref())
    }

    pub fn descriptor_for_run(&self, run_id: &str) -> Result<Option<ProjectDescriptor>> {
        self.store.descriptor_for_run(run_id)
    }
}

/// Fail closed unless `descriptor` names a usable working copy. Returns
/// the project root.
pub async fn assert_ready(
    descriptor: &ProjectDescriptor,
    config: &EngineConfig,
    git: &GitCli,
) -> Result<PathBuf> {
    if descriptor.connection_status == ConnectionStatus::Failed {
        return Err(EngineError::ProjectConnectionFailed(
            descriptor
                .last_connection_error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
        ));
    }
    if descriptor.mode == ProjectMode::None || descriptor.root.is_empty() {
        return Err(EngineError::ProjectNotSelected);
    }

    let root = PathBuf::from(&descriptor.root);
    if !root.is_dir() {
        return Err(EngineError::FolderMissing(descriptor.root.clone()));
    }

    match descriptor.mode {
        ProjectMode::Local => ensure_outside_internal_dirs(&root, config)?,
        ProjectMode::Remote => {
            let under_mirrors = sandbox::is_inside(&config.mirrors_dir(), &root)
                && root != config.mirrors_dir();
            if !under_mirrors || !git.is_repository(&root).await {
                return Err(EngineError::MirrorInvalid(descriptor.root.clone()));
            }
        }
        ProjectMode::None => return Err(EngineError::ProjectNotSelected),
    }

    Ok(root)
}

/// A local project may not contain, or sit inside, any managed directory.
pub fn ensure_outside_internal_dirs(root: &Path, config: &EngineConfig) -> Result<()> {
    let overlapping = config.internal_dirs().into_iter().find(|internal| {
        let resolved = std::fs::canonicalize(internal).unwrap_or_else(|_| internal.clone());
        sandbox::overlaps(root, internal) || sandbox::overlaps(root, &resolved)
    });
    match overlapping {
        Some(internal) => Err(EngineError::InternalPathBlocked(format!(
            "{} overlaps {}",
            root.display(),
            internal.display()
        ))),
        None => Ok(()),
    }
}
