//! Classification of raw `git` failure output into stable error codes
//!
//! `git` only reports failures as text, so classification is a substring
//! table evaluated top to bottom. The table is the single source of truth;
//! the first rule whose patterns all match wins.

use serde::{Deserialize, Serialize};

/// Stable error codes for version-control failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitErrorCode {
    RepoNotFound,
    AuthFailed,
    NetworkError,
    BranchMissing,
    BranchSelectionRequired,
    HeadInvalid,
    PermissionDenied,
    NonFastForward,
    RemoteRejected,
    LocalBranchMissing,
    /// Nothing in the table matched
    Unknown,
}

impl GitErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitErrorCode::RepoNotFound => "repo_not_found",
            GitErrorCode::AuthFailed => "auth_failed",
            GitErrorCode::NetworkError => "network_error",
            GitErrorCode::BranchMissing => "branch_missing",
            GitErrorCode::BranchSelectionRequired => "branch_selection_required",
            GitErrorCode::HeadInvalid => "head_invalid",
            GitErrorCode::PermissionDenied => "permission_denied",
            GitErrorCode::NonFastForward => "non_fast_forward",
            GitErrorCode::RemoteRejected => "remote_rejected",
            GitErrorCode::LocalBranchMissing => "local_branch_missing",
            GitErrorCode::Unknown => "unknown",
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            GitErrorCode::RepoNotFound => "The repository could not be found",
            GitErrorCode::AuthFailed => "Authentication with the remote failed",
            GitErrorCode::NetworkError => "The remote could not be reached",
            GitErrorCode::BranchMissing => "The requested branch does not exist on the remote",
            GitErrorCode::BranchSelectionRequired => {
                "The repository has several branches and no clear default"
            }
            GitErrorCode::HeadInvalid => "The repository has no commits yet",
            GitErrorCode::PermissionDenied => "You do not have permission for this repository",
            GitErrorCode::NonFastForward => "The remote branch has commits you do not have",
            GitErrorCode::RemoteRejected => "The remote rejected the push",
            GitErrorCode::LocalBranchMissing => "The local branch does not exist",
            GitErrorCode::Unknown => "The git command failed",
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            GitErrorCode::RepoNotFound => {
                "Check the repository URL, and that your token can see private repositories."
            }
            GitErrorCode::AuthFailed => "Configure a valid access token or SSH key and retry.",
            GitErrorCode::NetworkError => "Check your network connection and retry.",
            GitErrorCode::BranchMissing => "Pick one of the listed branches and sync again.",
            GitErrorCode::BranchSelectionRequired => {
                "Choose the branch to work on from the list and sync again."
            }
            GitErrorCode::HeadInvalid => "Create a first commit or check out a new branch.",
            GitErrorCode::PermissionDenied => "Ask the repository owner for write access.",
            GitErrorCode::NonFastForward => "Sync the project to pick up remote changes, then publish again.",
            GitErrorCode::RemoteRejected => {
                "The branch may be protected; push to another branch or open a pull request."
            }
            GitErrorCode::LocalBranchMissing => "Sync the project again to recreate the branch.",
            GitErrorCode::Unknown => "Try again; the technical details may explain more.",
        }
    }
}

/// One classification rule: every pattern must occur in the lower-cased text.
pub struct Rule {
    pub code: GitErrorCode,
    pub all_of: &'static [&'static str],
}

const fn rule(code: GitErrorCode, all_of: &'static [&'static str]) -> Rule {
    Rule { code, all_of }
}

/// The classification table, in priority order.
pub const RULES: &[Rule] = &[
    // push outcomes first: their output also mentions the remote
    rule(GitErrorCode::NonFastForward, &["non-fast-forward"]),
    rule(GitErrorCode::NonFastForward, &["fetch first"]),
    rule(GitErrorCode::NonFastForward, &["tip of your current branch is behind"]),
    rule(GitErrorCode::NonFastForward, &["updates were rejected because the remote contains work"]),
    rule(GitErrorCode::RemoteRejected, &["[remote rejected]"]),
    rule(GitErrorCode::RemoteRejected, &["protected branch"]),
    rule(GitErrorCode::RemoteRejected, &["pre-receive hook declined"]),
    rule(GitErrorCode::RemoteRejected, &["push declined"]),
    rule(GitErrorCode::RemoteRejected, &["gh006"]),
    rule(GitErrorCode::LocalBranchMissing, &["src refspec"]),
    rule(GitErrorCode::LocalBranchMissing, &["no such branch"]),
    rule(GitErrorCode::LocalBranchMissing, &["pathspec", "did not match"]),
    rule(GitErrorCode::BranchSelectionRequired, &["branch selection required"]),
    rule(GitErrorCode::BranchSelectionRequired, &["multiple candidate branches"]),
    rule(GitErrorCode::BranchMissing, &["remote branch", "not found"]),
    rule(GitErrorCode::BranchMissing, &["couldn't find remote ref"]),
    rule(GitErrorCode::BranchMissing, &["could not find remote branch"]),
    rule(GitErrorCode::HeadInvalid, &["unborn"]),
    rule(GitErrorCode::HeadInvalid, &["does not have any commits yet"]),
    rule(GitErrorCode::HeadInvalid, &["bad default revision 'head'"]),
    rule(GitErrorCode::HeadInvalid, &["ambiguous argument 'head'"]),
    rule(GitErrorCode::HeadInvalid, &["not a valid object name: 'head'"]),
    rule(GitErrorCode::HeadInvalid, &["needed a single revision"]),
    rule(GitErrorCode::HeadInvalid, &["remote head refers to nonexistent ref"]),
    rule(GitErrorCode::AuthFailed, &["authentication failed"]),
    rule(GitErrorCode::AuthFailed, &["could not read username"]),
    rule(GitErrorCode::AuthFailed, &["could not read password"]),
    rule(GitErrorCode::AuthFailed, &["terminal prompts disabled"]),
    rule(GitErrorCode::AuthFailed, &["invalid username or password"]),
    rule(GitErrorCode::AuthFailed, &["permission denied (publickey"]),
    rule(GitErrorCode::AuthFailed, &["bad credentials"]),
    rule(GitErrorCode::AuthFailed, &["http basic: access denied"]),
    rule(GitErrorCode::AuthFailed, &[" 401"]),
    rule(GitErrorCode::PermissionDenied, &["permission to", "denied"]),
    rule(GitErrorCode::PermissionDenied, &["permission denied"]),
    rule(GitErrorCode::PermissionDenied, &["write access to repository not granted"]),
    rule(GitErrorCode::PermissionDenied, &[" 403"]),
    rule(GitErrorCode::PermissionDenied, &["access denied"]),
    rule(GitErrorCode::RepoNotFound, &["repository not found"]),
    rule(GitErrorCode::RepoNotFound, &["does not appear to be a git repository"]),
    rule(GitErrorCode::RepoNotFound, &["repository", "not found"]),
    rule(GitErrorCode::RepoNotFound, &[" 404"]),
    rule(GitErrorCode::NetworkError, &["could not resolve host"]),
    rule(GitErrorCode::NetworkError, &["failed to connect"]),
    rule(GitErrorCode::NetworkError, &["connection refused"]),
    rule(GitErrorCode::NetworkError, &["connection timed out"]),
    rule(GitErrorCode::NetworkError, &["connection reset"]),
    rule(GitErrorCode::NetworkError, &["network is unreachable"]),
    rule(GitErrorCode::NetworkError, &["operation timed out"]),
    rule(GitErrorCode::NetworkError, &["timed out"]),
    rule(GitErrorCode::NetworkError, &["the remote end hung up unexpectedly"]),
    rule(GitErrorCode::NetworkError, &["early eof"]),
    rule(GitErrorCode::NetworkError, &["unable to access"]),
    rule(GitErrorCode::NetworkError, &["ssl"]),
    rule(GitErrorCode::NetworkError, &["tls"]),
];

/// Output fragments that indicate a damaged local repository rather than a
/// remote problem.
pub const CORRUPTION_SIGNATURES: &[&str] = &[
    "not a git repository",
    "corrupt",
    "bad object",
    "loose object",
    "index file",
    "unable to read",
    "bad config",
    "invalid object",
    "broken link",
    "packfile",
    "is not a valid 'origin'",
    "no such remote",
];

/// Classify raw `git` output.
pub fn classify(raw: &str) -> GitErrorCode {
    let text = raw.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.all_of.iter().all(|pattern| text.contains(pattern)))
        .map(|rule| rule.code)
        .unwrap_or(GitErrorCode::Unknown)
}

/// Whether a failure should be treated as remote-side and propagated as-is
/// instead of triggering mirror recovery.
pub fn is_remote_failure(code: GitErrorCode) -> bool {
    matches!(
        code,
        GitErrorCode::AuthFailed
            | GitErrorCode::NetworkError
            | GitErrorCode::RepoNotFound
            | GitErrorCode::PermissionDenied
    )
}

/// Whether raw output points at a structurally damaged local repository.
pub fn looks_corrupted(raw: &str) -> bool {
    let text = raw.to_lowercase();
    CORRUPTION_SIGNATURES
        .iter()
        .any(|signature| text.contains(signature))
}

/// Swappable classifier, for a future structured-output mode of the binary.
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, raw: &str) -> GitErrorCode;
}

/// The table-driven classifier
#[derive(Debug, Default, Clone, Copy)]
pub struct SubstringClassifier;

impl FailureClassifier for SubstringClassifier {
    fn classify(&self, raw: &str) -> GitErrorCode {
        classify(raw)
    }
}
