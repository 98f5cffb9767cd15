//! Apply attempt models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an attempt: `Active` until undone, `Undone` forever after
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Active,
    Undone,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Active => "active",
            AttemptStatus::Undone => "undone",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(AttemptStatus::Active),
            "undone" => Some(AttemptStatus::Undone),
            _ => None,
        }
    }
}

/// One file touched by an attempt, recorded before its first write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptFile {
    pub relative_path: String,
    pub existed_before: bool,
    /// Backup blob name inside the attempt's backup directory; `None` iff
    /// the file did not exist before the attempt
    pub backup_ref: Option<String>,
    /// Parent directories the first write had to create, deepest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_dirs: Vec<String>,
}

/// A reversible group of file writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyAttempt {
    pub id: String,
    pub status: AttemptStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub project_root: String,
    pub files: Vec<AttemptFile>,
}

impl ApplyAttempt {
    pub fn is_active(&self) -> bool {
        self.status == AttemptStatus::Active
    }

    pub fn summary(&self) -> AttemptSummary {
        AttemptSummary {
            id: self.id.clone(),
            status: self.status,
            created_at: self.created_at,
            completed_at: self.completed_at,
            file_count: self.files.len(),
            files: self.files.iter().map(|f| f.relative_path.clone()).collect(),
        }
    }
}

/// Compact view of an attempt for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub id: String,
    pub status: AttemptStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub file_count: usize,
    pub files: Vec<String>,
}

/// Result of an undo call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoOutcome {
    pub attempt_id: String,
    pub restored_count: usize,
    /// The attempt had already been undone; nothing was touched
    pub already_closed: bool,
}

/// Whether the current project has something to undo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptStatusReport {
    pub has_undoable_changes: bool,
    pub attempt_summary: Option<AttemptSummary>,
}

/// Result of writing one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyFileResult {
    pub attempt_id: String,
    pub relative_path: String,
    /// The file did not exist before this write
    pub created: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt() -> ApplyAttempt {
        ApplyAttempt {
            id: "18c2a1f0b3a-0a1b2c3d".to_string(),
            status: AttemptStatus::Active,
            created_at: Utc::now(),
            completed_at: None,
            project_root: "/work/project".to_string(),
            files: vec![
                AttemptFile {
                    relative_path: "src/lib.rs".to_string(),
                    existed_before: true,
                    backup_ref: Some("0.bak".to_string()),
                    created_dirs: Vec::new(),
                },
                AttemptFile {
                    relative_path: "src/new.rs".to_string(),
                    existed_before: false,
                    backup_ref: None,
                    created_dirs: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [AttemptStatus::Active, AttemptStatus::Undone] {
            assert_eq!(AttemptStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AttemptStatus::parse("closed"), None);
    }

    #[test]
    fn test_summary_lists_files_in_order() {
        let summary = attempt().summary();
        assert_eq!(summary.file_count, 2);
        assert_eq!(summary.files, vec!["src/lib.rs", "src/new.rs"]);
    }

    #[test]
    fn test_attempt_serialization() {
        let json = serde_json::to_string(&attempt()).unwrap();
        assert!(json.contains("\"status\":\"active\""));
        assert!(json.contains("\"existedBefore\":false"));
        assert!(json.contains("\"backupRef\":null"));
        assert!(json.contains("\"projectRoot\":\"/work/project\""));
    }
}
