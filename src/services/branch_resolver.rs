//! Default branch resolution for a mirror when no branch was requested
//!
//! The priority order is the `STEPS` table. Each step is a pure pick over
//! `Signals`; the signals that need `git` (current checkout, remote default)
//! are only gathered when the chain reaches the step that reads them.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::services::fallback::FirstSuccess;
use crate::services::git_cli::GitCli;

/// Branch names tried when nothing more specific is known
pub const CONVENTIONAL_BRANCHES: &[&str] = &["develop", "dev", "trunk", "release"];

/// Which rule picked the branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Hint,
    CurrentBranch,
    RemoteDefault,
    MainOrMaster,
    OnlyBranch,
    Conventional,
}

impl Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::Hint => "hint",
            Rule::CurrentBranch => "current_branch",
            Rule::RemoteDefault => "remote_default",
            Rule::MainOrMaster => "main_or_master",
            Rule::OnlyBranch => "only_branch",
            Rule::Conventional => "conventional",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub branch: String,
    pub rule: Rule,
}

/// Everything the resolution steps look at
#[derive(Debug, Clone, Default)]
pub struct Signals {
    /// Branches on the remote, sorted
    pub remote_branches: Vec<String>,
    /// Previously used branches, most recent first
    pub hints: Vec<String>,
    /// Checked-out branch of the mirror; `None` unless HEAD is valid
    pub current_branch: Option<String>,
    /// The remote's symbolic default
    pub remote_default: Option<String>,
}

impl Signals {
    fn on_remote(&self, branch: &str) -> bool {
        self.remote_branches.iter().any(|b| b == branch)
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    CurrentBranch,
    RemoteDefault,
}

struct Step {
    rule: Rule,
    needs: Option<Signal>,
    pick: fn(&Signals) -> Option<String>,
}

const STEPS: &[Step] = &[
    Step {
        rule: Rule::Hint,
        needs: None,
        pick: pick_hint,
    },
    Step {
        rule: Rule::CurrentBranch,
        needs: Some(Signal::CurrentBranch),
        pick: pick_current_branch,
    },
    Step {
        rule: Rule::RemoteDefault,
        needs: Some(Signal::RemoteDefault),
        pick: pick_remote_default,
    },
    Step {
        rule: Rule::MainOrMaster,
        needs: None,
        pick: pick_main_or_master,
    },
    Step {
        rule: Rule::OnlyBranch,
        needs: None,
        pick: pick_only_branch,
    },
    Step {
        rule: Rule::Conventional,
        needs: None,
        pick: pick_conventional,
    },
];

fn pick_hint(signals: &Signals) -> Option<String> {
    signals
        .hints
        .iter()
        .find(|hint| signals.on_remote(hint))
        .cloned()
}

fn pick_current_branch(signals: &Signals) -> Option<String> {
    signals
        .current_branch
        .as_ref()
        .filter(|branch| signals.on_remote(branch))
        .cloned()
}

fn pick_remote_default(signals: &Signals) -> Option<String> {
    signals
        .remote_default
        .as_ref()
        .filter(|branch| signals.on_remote(branch))
        .cloned()
}

fn pick_main_or_master(signals: &Signals) -> Option<String> {
    ["main", "master"]
        .iter()
        .find(|name| signals.on_remote(name))
        .map(|name| name.to_string())
}

fn pick_only_branch(signals: &Signals) -> Option<String> {
    match signals.remote_branches.as_slice() {
        [only] => Some(only.clone()),
        _ => None,
    }
}

fn pick_conventional(signals: &Signals) -> Option<String> {
    CONVENTIONAL_BRANCHES
        .iter()
        .find(|name| signals.on_remote(name))
        .map(|name| name.to_string())
}

fn selection_required(remote_branches: &[String]) -> EngineError {
    let mut candidates = remote_branches.to_vec();
    candidates.sort();
    EngineError::BranchSelectionRequired {
        reason: if candidates.is_empty() {
            "The remote has no branches to check out".to_string()
        } else {
            "Multiple candidate branches and no default could be determined".to_string()
        },
        candidates,
    }
}

/// Where resolution signals come from
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn remote_branches(&self) -> Result<Vec<String>>;
    async fn current_branch(&self) -> Option<String>;
    async fn remote_default(&self) -> Option<String>;
}

/// Signals read from a mirror with `git`
pub struct MirrorSignals<'a> {
    pub git: &'a GitCli,
    pub dir: &'a Path,
}

#[async_trait]
impl SignalSource for MirrorSignals<'_> {
    async fn remote_branches(&self) -> Result<Vec<String>> {
        self.git.remote_branches(self.dir).await
    }

    async fn current_branch(&self) -> Option<String> {
        if !self.git.has_commits(self.dir).await {
            return None;
        }
        self.git.current_branch_name(self.dir).await
    }

    async fn remote_default(&self) -> Option<String> {
        self.git.remote_default_branch(self.dir).await
    }
}

/// Pick the branch to check out in `mirror_dir` when none was requested.
pub async fn resolve_default_branch(
    git: &GitCli,
    mirror_dir: &Path,
    hints: &[String],
) -> Result<Resolution> {
    resolve_with(&MirrorSignals { git, dir: mirror_dir }, hints).await
}

pub async fn resolve_with<S: SignalSource + ?Sized>(
    source: &S,
    hints: &[String],
) -> Result<Resolution> {
    let remote_branches = source.remote_branches().await?;
    let signals = Mutex::new(Signals {
        remote_branches: remote_branches.clone(),
        hints: hints.to_vec(),
        ..Default::default()
    });

    let mut chain = FirstSuccess::new("branch resolution");
    for step in STEPS {
        let signals = &signals;
        chain = chain.then(step.rule.as_str(), move || async move {
            match step.needs {
                Some(Signal::CurrentBranch) => {
                    let current = source.current_branch().await;
                    if let Ok(mut s) = signals.lock() {
                        s.current_branch = current;
                    }
                }
                Some(Signal::RemoteDefault) => {
                    let default = source.remote_default().await;
                    if let Ok(mut s) = signals.lock() {
                        s.remote_default = default;
                    }
                }
                None => {}
            }

            let picked = signals.lock().ok().and_then(|s| (step.pick)(&s));
            Ok::<_, EngineError>(picked.map(|branch| Resolution {
                branch,
                rule: step.rule,
            }))
        });
    }

    match chain.run().await? {
        Some(resolution) => {
            tracing::info!(
                "Resolved default branch '{}' via {}",
                resolution.branch,
                resolution.rule.as_str()
            );
            Ok(resolution)
        }
        None => Err(selection_required(&remote_branches)),
    }
}
