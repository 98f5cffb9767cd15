//! Error types for patchdeck

use serde::Serialize;
use thiserror::Error;

use crate::services::git_errors::GitErrorCode;

/// Operation boundary an error was raised at.
///
/// Unclassified failures are reported as `<operation>_failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Sync,
    Apply,
    Undo,
    Publish,
    Status,
    Plan,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Sync => "sync",
            Operation::Apply => "apply",
            Operation::Undo => "undo",
            Operation::Publish => "publish",
            Operation::Status => "status",
            Operation::Plan => "plan",
        }
    }
}

/// Engine error types
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A failed `git` invocation, classified from its output
    #[error("git {command} failed: {detail}")]
    Git {
        code: GitErrorCode,
        command: String,
        detail: String,
    },

    #[error("{reason}")]
    BranchSelectionRequired {
        reason: String,
        candidates: Vec<String>,
    },

    #[error("Path escapes the project root: {0}")]
    PathViolation(String),

    #[error("Folder does not exist: {0}")]
    FolderMissing(String),

    #[error("Writing to protected file is not allowed: {0}")]
    ProtectedFileWriteBlocked(String),

    #[error("Path lies inside an internally managed directory: {0}")]
    InternalPathBlocked(String),

    #[error("Apply attempt {0} is no longer active")]
    AttemptNotActive(String),

    #[error("Apply attempt {attempt_id} belongs to a different project ({attempt_root})")]
    AttemptWrongProject {
        attempt_id: String,
        attempt_root: String,
    },

    #[error("Apply attempt not found: {0}")]
    AttemptNotFound(String),

    #[error("No project is selected")]
    ProjectNotSelected,

    #[error("The last connection attempt failed: {0}")]
    ProjectConnectionFailed(String),

    #[error("Mirror is not a valid working copy: {0}")]
    MirrorInvalid(String),

    #[error("No project was recorded for run {0}")]
    RunNotFound(String),

    #[error("Invalid repository URL: {0}")]
    InvalidRepositoryUrl(String),

    #[error("Unsupported host '{host}', only {allowed} remotes are supported")]
    UnsupportedHost { host: String, allowed: String },

    #[error("Invalid edit plan: {0}")]
    InvalidPlan(String),

    #[error("No changes to commit")]
    NothingToCommit,

    /// Catch-all raised at an operation boundary
    #[error("{} failed: {detail}", .operation.as_str())]
    OperationFailed {
        operation: Operation,
        detail: String,
    },
}

impl EngineError {
    /// Build a classified git error from a command line and its raw output.
    pub fn git(command: impl Into<String>, raw: &str) -> Self {
        EngineError::Git {
            code: crate::services::git_errors::classify(raw),
            command: command.into(),
            detail: raw.trim().to_string(),
        }
    }

    /// Stable error code
    pub fn code(&self) -> String {
        match self {
            EngineError::Io(_) => "io_error".to_string(),
            EngineError::Database(_) => "database_error".to_string(),
            EngineError::Serialization(_) => "serialization_error".to_string(),
            EngineError::Git { code, .. } => match code {
                GitErrorCode::Unknown => "git_failed".to_string(),
                other => other.as_str().to_string(),
            },
            EngineError::BranchSelectionRequired { .. } => "branch_selection_required".to_string(),
            EngineError::PathViolation(_) => "path_violation".to_string(),
            EngineError::FolderMissing(_) => "folder_missing".to_string(),
            EngineError::ProtectedFileWriteBlocked(_) => "protected_file_write_blocked".to_string(),
            EngineError::InternalPathBlocked(_) => "internal_path_blocked".to_string(),
            EngineError::AttemptNotActive(_) => "attempt_not_active".to_string(),
            EngineError::AttemptWrongProject { .. } => "attempt_wrong_project".to_string(),
            EngineError::AttemptNotFound(_) => "attempt_not_found".to_string(),
            EngineError::ProjectNotSelected => "project_not_selected".to_string(),
            EngineError::ProjectConnectionFailed(_) => "project_connection_failed".to_string(),
            EngineError::MirrorInvalid(_) => "mirror_invalid".to_string(),
            EngineError::RunNotFound(_) => "run_not_found".to_string(),
            EngineError::InvalidRepositoryUrl(_) => "invalid_repository_url".to_string(),
            EngineError::UnsupportedHost { .. } => "unsupported_host".to_string(),
            EngineError::InvalidPlan(_) => "invalid_plan".to_string(),
            EngineError::NothingToCommit => "nothing_to_commit".to_string(),
            EngineError::OperationFailed { operation, .. } => {
                format!("{}_failed", operation.as_str())
            }
        }
    }

    /// Classified git code, if this error came from a git invocation
    pub fn git_code(&self) -> Option<GitErrorCode> {
        match self {
            EngineError::Git { code, .. } => Some(*code),
            EngineError::BranchSelectionRequired { .. } => {
                Some(GitErrorCode::BranchSelectionRequired)
            }
            _ => None,
        }
    }

    /// Candidate branches the user can pick from
    pub fn candidates(&self) -> &[String] {
        match self {
            EngineError::BranchSelectionRequired { candidates, .. } => candidates,
            _ => &[],
        }
    }

    /// Short user-facing reason
    pub fn reason(&self) -> String {
        match self {
            EngineError::Git { code, .. } => code.reason().to_string(),
            EngineError::OperationFailed { operation, .. } => {
                format!("The {} operation failed", operation.as_str())
            }
            EngineError::Io(_) | EngineError::Database(_) | EngineError::Serialization(_) => {
                "An internal storage error occurred".to_string()
            }
            other => other.to_string(),
        }
    }

    /// What the user should try next
    pub fn hint(&self) -> &'static str {
        match self {
            EngineError::Git { code, .. } => code.hint(),
            EngineError::BranchSelectionRequired { .. } => {
                GitErrorCode::BranchSelectionRequired.hint()
            }
            EngineError::PathViolation(_) => "Use a path relative to the project root.",
            EngineError::FolderMissing(_) => "Check that the folder exists and reconnect.",
            EngineError::ProtectedFileWriteBlocked(_) => {
                "Environment files, lockfiles and git internals must be edited by hand."
            }
            EngineError::InternalPathBlocked(_) => {
                "Choose a project folder outside the application's own directories."
            }
            EngineError::AttemptNotActive(_) => "Start a new apply attempt.",
            EngineError::AttemptWrongProject { .. } => {
                "Switch back to the project the attempt was started on."
            }
            EngineError::AttemptNotFound(_) => "Refresh the attempt list and try again.",
            EngineError::ProjectNotSelected => "Connect a repository or local folder first.",
            EngineError::ProjectConnectionFailed(_) => {
                "Fix the connection problem and sync the project again."
            }
            EngineError::MirrorInvalid(_) => "Sync the repository again to rebuild its mirror.",
            EngineError::RunNotFound(_) => "Sync the repository or folder directly.",
            EngineError::InvalidRepositoryUrl(_) | EngineError::UnsupportedHost { .. } => {
                "Use an https or ssh URL of the form https://host/owner/name."
            }
            EngineError::InvalidPlan(_) => "Regenerate the plan.",
            EngineError::NothingToCommit => "Apply some changes before publishing.",
            EngineError::OperationFailed { .. }
            | EngineError::Io(_)
            | EngineError::Database(_)
            | EngineError::Serialization(_) => "Try again; if it keeps failing, check the logs.",
        }
    }

    /// Raw technical detail for debugging
    pub fn details(&self) -> Option<String> {
        match self {
            EngineError::Git {
                command, detail, ..
            } => Some(format!("git {}: {}", command, detail)),
            EngineError::OperationFailed { detail, .. } => Some(detail.clone()),
            EngineError::Io(e) => Some(e.to_string()),
            EngineError::Database(e) => Some(e.to_string()),
            EngineError::Serialization(e) => Some(e.to_string()),
            _ => None,
        }
    }

    /// Fold unclassified failures into the operation's generic code.
    ///
    /// Classified errors pass through untouched.
    pub fn within(self, operation: Operation) -> Self {
        match self {
            EngineError::Git {
                code: GitErrorCode::Unknown,
                command,
                detail,
            } => EngineError::OperationFailed {
                operation,
                detail: format!("git {}: {}", command, detail),
            },
            EngineError::Io(e) => EngineError::OperationFailed {
                operation,
                detail: e.to_string(),
            },
            EngineError::Database(e) => EngineError::OperationFailed {
                operation,
                detail: e.to_string(),
            },
            EngineError::Serialization(e) => EngineError::OperationFailed {
                operation,
                detail: e.to_string(),
            },
            other => other,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code(),
            message: self.reason(),
            hint: self.hint().to_string(),
            details: self.details(),
            candidates: self.candidates().to_vec(),
        }
    }
}

/// Serializable error response handed to callers
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub hint: String,
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

impl From<EngineError> for ErrorResponse {
    fn from(error: EngineError) -> Self {
        error.to_response()
    }
}

impl serde::Serialize for EngineError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_response().serialize(serializer)
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
