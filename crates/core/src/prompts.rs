use std::path::PathBuf;

use crate::plan::Subtask;
use crate::roles::AgentRole;

/// Prompts are opaque text to the core. A store resolves them by role name
/// from a prompts directory, falling back to embedded defaults; callers may
/// ship their own directory to override every prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptStore {
    dir: Option<PathBuf>,
}

impl PromptStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn system_prompt(&self, role: AgentRole) -> String {
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{}.md", role.as_str()));
            if let Ok(content) = std::fs::read_to_string(&path) {
                return content;
            }
        }
        default_prompt(role).to_string()
    }
}

fn default_prompt(role: AgentRole) -> &'static str {
    use AgentRole::*;
    match role {
        Planner => {
            "You are a planning agent. Read the specification in the spec directory \
             and produce implementation_plan.json: ordered phases, each with ordered \
             subtasks carrying a unique id, a description, and status `pending`. \
             Be specific about files and data structures."
        }
        Coder => {
            "You are a coding agent. Implement exactly one subtask from \
             implementation_plan.json. Set its status to `in_progress` when you \
             start and `completed` when done, writing the plan file back. Match \
             the project's existing style and verify your changes."
        }
        QaReviewer => {
            "You are a QA reviewer. Inspect the implementation against the \
             specification and write qa_report.md containing a `Status: PASSED` or \
             `Status: FAILED` line followed by an Issues section listing each \
             problem as `- title (location)`."
        }
        QaFixer => {
            "You are a QA fixer. Address every issue in the QA report you are \
             given with the smallest viable change, then verify."
        }
        _ => {
            "You are a software development agent. Complete the task described in \
             your kickoff message using the tools available to you."
        }
    }
}

pub fn planner_kickoff(task_description: &str) -> String {
    format!(
        "Create an implementation plan for the following task.\n\n{task_description}\n\n\
         Write the plan to implementation_plan.json in the spec directory."
    )
}

pub fn coder_kickoff(subtask: &Subtask) -> String {
    let mut message = format!(
        "Work on subtask `{}`: {}\n",
        subtask.id, subtask.description
    );
    if let Some(files) = &subtask.files_to_create {
        message.push_str(&format!("Files to create: {}\n", files.join(", ")));
    }
    if let Some(files) = &subtask.files_to_modify {
        message.push_str(&format!("Files to modify: {}\n", files.join(", ")));
    }
    message.push_str(
        "Update the subtask's status in implementation_plan.json as you go. \
         Do not touch other subtasks.",
    );
    message
}

pub fn qa_reviewer_kickoff(iteration: u32) -> String {
    format!(
        "Run QA review iteration {iteration}. Review the implementation against \
         the specification and write qa_report.md."
    )
}

pub fn qa_fixer_kickoff(report: &str, fix_request: Option<&str>) -> String {
    let mut message = format!(
        "The QA review rejected the implementation. Fix every issue below.\n\n{report}"
    );
    if let Some(request) = fix_request {
        message.push_str(&format!("\n\nAdditional fix instructions:\n{request}"));
    }
    message
}

pub fn spec_phase_kickoff(phase_name: &str, task_description: &str) -> String {
    format!(
        "Run the `{phase_name}` phase of specification development for this task:\n\n\
         {task_description}"
    )
}
