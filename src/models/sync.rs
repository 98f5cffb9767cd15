//! Sync and publish result models

use serde::{Deserialize, Serialize};

use super::project::ProjectDescriptor;

/// Working-copy state after a sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub branch: Option<String>,
    pub head_commit: Option<String>,
    pub is_dirty: bool,
    /// `None` when there is nothing to compare against
    pub ahead_count: Option<u32>,
    pub behind_count: Option<u32>,
    pub head_valid: bool,
}

/// Result of syncing a mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorSync {
    pub mirror_path: String,
    pub branch: Option<String>,
    pub sync_status: SyncStatus,
    /// The mirror was found damaged and rebuilt from scratch
    pub recovered: bool,
}

/// Result of a sync command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub root: String,
    pub branch: Option<String>,
    pub sync_status: Option<SyncStatus>,
    pub descriptor: ProjectDescriptor,
}

/// The commit created by a publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub oid: String,
    pub short_oid: String,
    pub message: String,
    pub files: Vec<String>,
}

/// Result of a publish command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub pushed: bool,
    pub branch: String,
    /// `None` when the publish only retried pushing earlier commits
    pub commit_info: Option<CommitInfo>,
    /// Classified failure code when the push did not go through
    pub reason: Option<String>,
    pub message: Option<String>,
    pub hint: Option<String>,
}
