//! Edit plan models

use serde::{Deserialize, Serialize};

/// A proposed set of file writes produced by the plan generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EditPlan {
    pub summary: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub project_type: String,
    #[serde(default)]
    pub risks: Vec<String>,
    pub files: Vec<PlannedFile>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

/// One file of a plan, always carrying its complete new content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedFile {
    pub file_name: String,
    #[serde(default)]
    pub explanation: String,
    pub full_code: String,
}

/// Result of applying a whole plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanApplyResult {
    pub attempt_id: String,
    pub summary: String,
    pub files: Vec<String>,
    pub created: Vec<String>,
}
