//! Engine configuration
//!
//! Loaded from `engine_config.json` in the config directory when present,
//! then overridden from the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

const CONFIG_FILE: &str = "engine_config.json";

pub const ENV_ACCESS_TOKEN: &str = "PATCHDECK_ACCESS_TOKEN";
pub const ENV_FALLBACK_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_DATA_DIR: &str = "PATCHDECK_DATA_DIR";
pub const ENV_GIT_TIMEOUT: &str = "PATCHDECK_GIT_TIMEOUT_SECS";

fn default_protected_patterns() -> Vec<String> {
    [
        ".env",
        ".env.*",
        "package-lock.json",
        "npm-shrinkwrap.json",
        "yarn.lock",
        "pnpm-lock.yaml",
        "bun.lockb",
        "Cargo.lock",
        "Gemfile.lock",
        "poetry.lock",
        "Pipfile.lock",
        "composer.lock",
        "go.sum",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("patchdeck")
}

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Root of everything the engine manages (mirrors, sessions, database)
    pub data_dir: PathBuf,

    /// Install directory of the host application, never writable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_dir: Option<PathBuf>,

    pub git_binary: String,

    pub git_timeout_secs: u64,

    /// The one forge host accepted for network remotes
    pub forge_host: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    pub commit_name: String,
    pub commit_email: String,

    /// Glob patterns of files that are never written. Patterns without a
    /// `/` match the file name, others the whole relative path. Anything
    /// inside `.git` is always protected.
    pub protected_patterns: Vec<String>,

    /// Limits for codebase context handed to the plan generator
    pub max_context_files: usize,
    pub max_context_file_bytes: u64,
    pub max_context_total_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            app_dir: None,
            git_binary: "git".to_string(),
            git_timeout_secs: 120,
            forge_host: "github.com".to_string(),
            access_token: None,
            commit_name: "patchdeck".to_string(),
            commit_email: "patchdeck@users.noreply.github.com".to_string(),
            protected_patterns: default_protected_patterns(),
            max_context_files: 200,
            max_context_file_bytes: 64 * 1024,
            max_context_total_bytes: 512 * 1024,
        }
    }
}

impl EngineConfig {
    /// Defaults rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from disk, then apply environment overrides
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Save configuration to disk. The access token is never written.
    pub fn save(&self, config_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(config_dir)?;

        let mut persisted = self.clone();
        persisted.access_token = None;
        let contents = serde_json::to_string_pretty(&persisted)?;
        std::fs::write(config_dir.join(CONFIG_FILE), contents)?;
        Ok(())
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = non_empty(ENV_ACCESS_TOKEN).or_else(|| non_empty(ENV_FALLBACK_TOKEN)) {
            self.access_token = Some(token);
        }
        if let Some(dir) = non_empty(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = non_empty(ENV_GIT_TIMEOUT) {
            match secs.parse::<u64>() {
                Ok(secs) if secs > 0 => self.git_timeout_secs = secs,
                _ => tracing::warn!("Ignoring invalid {}: {}", ENV_GIT_TIMEOUT, secs),
            }
        }
    }

    pub fn mirrors_dir(&self) -> PathBuf {
        self.data_dir.join("mirrors")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("state.db")
    }

    /// Directories no project may overlap or write into
    pub fn internal_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.data_dir.clone(), self.mirrors_dir(), self.sessions_dir()];
        if let Some(app_dir) = &self.app_dir {
            dirs.push(app_dir.clone());
        }
        dirs
    }

    pub fn git_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.git_timeout_secs)
    }
}
