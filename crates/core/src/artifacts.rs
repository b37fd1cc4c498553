use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SPEC_FILE: &str = "spec.md";
pub const TASK_LOGS_FILE: &str = "task_logs.json";
pub const TASK_METADATA_FILE: &str = "task_metadata.json";
pub const QA_REPORT_FILE: &str = "qa_report.md";
pub const QA_ESCALATION_FILE: &str = "QA_ESCALATION.md";
pub const QA_FIX_REQUEST_FILE: &str = "QA_FIX_REQUEST.md";
pub const MANUAL_TEST_PLAN_FILE: &str = "MANUAL_TEST_PLAN.md";
pub const COMPLEXITY_ASSESSMENT_FILE: &str = "complexity_assessment.json";

/// Write via a temp file in the same directory, then rename. Readers never
/// observe a half-written artifact.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact"),
        uuid::Uuid::new_v4().simple()
    ));
    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to rename into {}", path.display()))?;
    Ok(())
}

/// The task description the spec phases consume.
pub fn load_task_description(spec_dir: &Path) -> Result<String> {
    let path = spec_dir.join(SPEC_FILE);
    std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: String,
    pub message: String,
}

impl TaskLogEntry {
    pub fn new(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            phase: phase.into(),
            message: message.into(),
        }
    }
}

/// Append to the rolling task log. The whole file is rewritten atomically
/// on every append; a corrupt file is replaced rather than propagated.
pub fn append_task_log(spec_dir: &Path, entry: TaskLogEntry) -> Result<()> {
    let path = spec_dir.join(TASK_LOGS_FILE);
    let mut entries: Vec<TaskLogEntry> = if path.exists() {
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    } else {
        Vec::new()
    };
    entries.push(entry);
    atomic_write(&path, serde_json::to_string_pretty(&entries)?.as_bytes())
}

pub fn read_task_log(spec_dir: &Path) -> Result<Vec<TaskLogEntry>> {
    let path = spec_dir.join(TASK_LOGS_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
}

impl TaskMetadata {
    pub fn load(spec_dir: &Path) -> Result<Self> {
        let path = spec_dir.join(TASK_METADATA_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Metadata wins; otherwise `DEFAULT_BRANCH` or the built-in fallback.
    pub fn resolved_base_branch(&self) -> String {
        self.base_branch
            .clone()
            .unwrap_or_else(cadre_config::default_branch)
    }
}
