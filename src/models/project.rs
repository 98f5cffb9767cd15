//! Project descriptor models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Where the active project comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectMode {
    Remote,
    Local,
    #[default]
    None,
}

/// Outcome of the last connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Failed,
    #[default]
    Disconnected,
}

/// The project reads and writes currently target.
///
/// There is exactly one active descriptor; every sync, disconnect and
/// reconnect replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDescriptor {
    pub mode: ProjectMode,
    /// Absolute path of the working copy; empty when nothing is usable
    pub root: String,
    pub source_label: String,
    /// Redacted, canonical repository URL (remote mode only)
    pub repository_url: Option<String>,
    pub branch: Option<String>,
    pub connection_status: ConnectionStatus,
    pub last_connection_error: Option<String>,
    /// Error code of the failed attempt, e.g. `auth_failed`
    #[serde(default)]
    pub last_error_code: Option<String>,
    #[serde(default)]
    pub last_error_hint: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProjectDescriptor {
    pub fn remote(root: String, repository_url: String, branch: Option<String>) -> Self {
        Self {
            mode: ProjectMode::Remote,
            source_label: repository_url.clone(),
            root,
            repository_url: Some(repository_url),
            branch,
            connection_status: ConnectionStatus::Connected,
            last_connection_error: None,
            last_error_code: None,
            last_error_hint: None,
            updated_at: Some(Utc::now()),
        }
    }

    pub fn local(root: String) -> Self {
        Self {
            mode: ProjectMode::Local,
            source_label: root.clone(),
            root,
            repository_url: None,
            branch: None,
            connection_status: ConnectionStatus::Connected,
            last_connection_error: None,
            last_error_code: None,
            last_error_hint: None,
            updated_at: Some(Utc::now()),
        }
    }

    /// The safe state after a failed sync: no root, nothing writable.
    ///
    /// The attempted URL and branch are kept so the caller can retry.
    pub fn failed(
        source_label: String,
        repository_url: Option<String>,
        branch: Option<String>,
        error: &EngineError,
    ) -> Self {
        Self {
            mode: ProjectMode::None,
            root: String::new(),
            source_label,
            repository_url,
            branch,
            connection_status: ConnectionStatus::Failed,
            last_connection_error: Some(error.reason()),
            last_error_code: Some(error.code()),
            last_error_hint: Some(error.hint().to_string()),
            updated_at: Some(Utc::now()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected && self.mode != ProjectMode::None
    }
}

/// What a sync request points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncTarget {
    Remote { url: String, branch: Option<String> },
    Local { path: String },
}

impl SyncTarget {
    /// Rebuild the target a descriptor was synced from
    pub fn from_descriptor(descriptor: &ProjectDescriptor) -> Option<Self> {
        match descriptor.mode {
            ProjectMode::Remote => descriptor.repository_url.as_ref().map(|url| SyncTarget::Remote {
                url: url.clone(),
                branch: descriptor.branch.clone(),
            }),
            ProjectMode::Local => Some(SyncTarget::Local {
                path: descriptor.root.clone(),
            }),
            ProjectMode::None => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            SyncTarget::Remote { url, .. } => url.clone(),
            SyncTarget::Local { path } => path.clone(),
        }
    }
}
