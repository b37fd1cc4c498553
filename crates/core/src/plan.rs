use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::artifacts::atomic_write;

pub const PLAN_FILE: &str = "implementation_plan.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub status: SubtaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_to_create: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_to_modify: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPhase {
    pub name: String,
    pub subtasks: Vec<Subtask>,
}

/// The durable plan produced by the planner and advanced by coder agents.
/// Only the agent running a subtask transitions that subtask's status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementationPlan {
    pub phases: Vec<PlanPhase>,
}

impl ImplementationPlan {
    /// Parse and validate: subtask ids must be unique within the plan.
    pub fn parse(content: &str) -> Result<Self> {
        let plan: ImplementationPlan =
            serde_json::from_str(content).context("Failed to parse implementation plan")?;
        let mut seen = HashSet::new();
        for subtask in plan.all_subtasks() {
            if !seen.insert(subtask.id.as_str()) {
                anyhow::bail!("Duplicate subtask id in plan: {}", subtask.id);
            }
        }
        Ok(plan)
    }

    pub fn load(spec_dir: &Path) -> Result<Option<Self>> {
        let path = spec_dir.join(PLAN_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(Self::parse(&content)?))
    }

    pub fn save(&self, spec_dir: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        atomic_write(&spec_dir.join(PLAN_FILE), content.as_bytes())
    }

    /// A usable plan has at least one phase with at least one subtask.
    pub fn is_well_formed(&self) -> bool {
        !self.phases.is_empty() && self.phases.iter().any(|p| !p.subtasks.is_empty())
    }

    pub fn all_subtasks(&self) -> impl Iterator<Item = &Subtask> {
        self.phases.iter().flat_map(|p| p.subtasks.iter())
    }

    /// Next subtask to work on: the first pending or in-progress subtask,
    /// in plan order, that is not excluded (stuck).
    pub fn next_actionable(&self, exclude: &HashSet<String>) -> Option<&Subtask> {
        self.all_subtasks().find(|s| {
            matches!(s.status, SubtaskStatus::Pending | SubtaskStatus::InProgress)
                && !exclude.contains(&s.id)
        })
    }

    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.all_subtasks().find(|s| s.id == id)
    }
}
