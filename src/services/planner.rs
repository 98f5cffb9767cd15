//! Edit plan seam
//!
//! Plans come from an external generator (usually a language model) behind
//! the `EditPlanGenerator` trait. This module validates what comes back and
//! gathers the codebase context handed to the generator.

use std::path::Path;

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::models::plan::EditPlan;
use crate::services::config::EngineConfig;

/// Directories never included in context
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target", "dist", "build", ".venv"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// One file of codebase context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextFile {
    pub path: String,
    pub content: String,
}

/// Snapshot of the project handed to the plan generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CodebaseContext {
    pub root: String,
    pub files: Vec<ContextFile>,
    /// Some files were left out because a limit was reached
    pub truncated: bool,
}

impl CodebaseContext {
    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|f| f.content.len()).sum()
    }
}

/// Produces an edit plan for a request against a codebase
#[async_trait]
pub trait EditPlanGenerator: Send + Sync {
    async fn generate(&self, context: &CodebaseContext, request: &str) -> Result<EditPlan>;
}

/// Every file entry needs a non-empty name.
pub fn validate_plan(plan: &EditPlan) -> Result<()> {
    for (index, file) in plan.files.iter().enumerate() {
        if file.file_name.trim().is_empty() {
            return Err(EngineError::InvalidPlan(format!(
                "file entry {} has no name",
                index + 1
            )));
        }
    }
    Ok(())
}

/// Whether `relative_path` may never be written.
///
/// Anything inside `.git` is protected regardless of `patterns`. Patterns
/// without a `/` match the file name, others the whole relative path.
pub fn is_protected(relative_path: &str, patterns: &[String]) -> bool {
    let normalized = relative_path.replace('\\', "/");
    let normalized = normalized.trim_start_matches('/');

    if normalized
        .split('/')
        .any(|component| component.eq_ignore_ascii_case(".git"))
    {
        return true;
    }

    let file_name = normalized.rsplit('/').next().unwrap_or(normalized);
    patterns.iter().any(|raw| {
        let Ok(pattern) = Pattern::new(raw) else {
            tracing::warn!("Ignoring invalid protected pattern: {}", raw);
            return false;
        };
        let subject = if raw.contains('/') { normalized } else { file_name };
        pattern.matches_with(subject, MATCH_OPTIONS)
    })
}

/// Collect readable text files under `root` within the configured limits.
///
/// Protected files are never included. Paths are visited in sorted order so
/// the same tree always yields the same context.
pub fn collect_context(root: &Path, config: &EngineConfig) -> Result<CodebaseContext> {
    let mut context = CodebaseContext {
        root: root.to_string_lossy().to_string(),
        ..Default::default()
    };
    let mut total: u64 = 0;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries: Vec<_> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .collect();
        entries.sort_by_key(|entry| entry.file_name());

        let mut subdirs = Vec::new();
        for entry in entries {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().to_string();

            if file_type.is_dir() {
                if !SKIPPED_DIRS.contains(&name.as_str()) {
                    subdirs.push(path);
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if is_protected(&relative, &config.protected_patterns) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
            if size > config.max_context_file_bytes {
                context.truncated = true;
                continue;
            }
            if context.files.len() >= config.max_context_files
                || total + size > config.max_context_total_bytes
            {
                context.truncated = true;
                return Ok(context);
            }

            // Binary files are skipped
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            total += content.len() as u64;
            context.files.push(ContextFile {
                path: relative,
                content,
            });
        }

        // Reverse so the stack pops subdirectories in sorted order
        pending.extend(subdirs.into_iter().rev());
    }

    tracing::debug!(
        "Collected {} context files ({} bytes) from {}",
        context.files.len(),
        total,
        context.root
    );
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::PlannedFile;
    use tempfile::TempDir;

    fn patterns() -> Vec<String> {
        EngineConfig::default().protected_patterns
    }

    #[test]
    fn test_protected_patterns() {
        let patterns = patterns();
        assert!(is_protected(".env", &patterns));
        assert!(is_protected("config/.env.production", &patterns));
        assert!(is_protected("web/package-lock.json", &patterns));
        assert!(is_protected("Cargo.lock", &patterns));
        assert!(is_protected(".git/config", &patterns));
        assert!(is_protected("sub/.git/hooks/pre-commit", &patterns));
        assert!(is_protected("\\.git\\HEAD", &patterns));

        assert!(!is_protected("src/env.rs", &patterns));
        assert!(!is_protected(".envrc.example/readme.md", &patterns));
        assert!(!is_protected(".gitignore", &patterns));
        assert!(!is_protected("Cargo.toml", &patterns));
    }

    #[test]
    fn test_path_patterns_match_whole_path() {
        let patterns = vec!["secrets/*".to_string()];
        assert!(is_protected("secrets/key.pem", &patterns));
        assert!(!is_protected("other/secrets/key.pem", &patterns));
        assert!(!is_protected("secrets/nested/key.pem", &patterns));
    }

    #[test]
    fn test_validate_plan_requires_names() {
        let mut plan = EditPlan {
            summary: "x".into(),
            files: vec![PlannedFile {
                file_name: "src/a.rs".into(),
                explanation: String::new(),
                full_code: String::new(),
            }],
            ..Default::default()
        };
        assert!(validate_plan(&plan).is_ok());

        plan.files.push(PlannedFile {
            file_name: "  ".into(),
            explanation: String::new(),
            full_code: "x".into(),
        });
        let err = validate_plan(&plan).unwrap_err();
        assert_eq!(err.code(), "invalid_plan");
    }

    #[test]
    fn test_collect_context_skips_git_and_protected_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::create_dir_all(root.join("src/nested")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::write(root.join(".git/config"), "[core]").unwrap();
        std::fs::write(root.join(".env"), "SECRET=1").unwrap();
        std::fs::write(root.join("README.md"), "# app").unwrap();
        std::fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(root.join("src/nested/lib.rs"), "pub fn f() {}").unwrap();
        std::fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(root.join("logo.bin"), [0xff, 0xfe, 0x00, 0x81]).unwrap();

        let context = collect_context(root, &EngineConfig::default()).unwrap();
        let paths: Vec<&str> = context.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src/main.rs", "src/nested/lib.rs"]);
        assert!(!context.truncated);
        assert!(!context.files.iter().any(|f| f.content.contains("SECRET")));
    }

    #[test]
    fn test_collect_context_respects_limits() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for i in 0..5 {
            std::fs::write(root.join(format!("f{}.txt", i)), "0123456789").unwrap();
        }
        std::fs::write(root.join("huge.txt"), "x".repeat(100)).unwrap();

        let mut config = EngineConfig::default();
        config.max_context_file_bytes = 50;
        config.max_context_total_bytes = 25;

        let context = collect_context(root, &config).unwrap();
        assert_eq!(context.files.len(), 2);
        assert!(context.total_bytes() <= 25);
        assert!(context.truncated);

        config.max_context_total_bytes = 1000;
        config.max_context_files = 3;
        let context = collect_context(root, &config).unwrap();
        assert_eq!(context.files.len(), 3);
        assert!(context.truncated);
    }
}
