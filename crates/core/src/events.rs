use serde::{Deserialize, Serialize};

use crate::roles::Phase;

/// Streaming events emitted while a session runs. Delivered to subscribers
/// in the exact order produced by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        text: String,
    },
    ToolCall {
        tool_name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_name: String,
        result: String,
        is_error: bool,
    },
    StepFinish,
    UsageUpdate {
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
    },
    Error {
        kind: String,
        message: String,
    },
}

/// Events emitted by orchestrators (build, spec, QA) to their callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OrchestratorEvent {
    PhaseChange {
        phase: Phase,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
    Complete {
        success: bool,
        total_iterations: u32,
        duration_ms: u64,
        error: Option<String>,
    },
}

/// User-facing progress state derived from the event stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionProgress {
    pub current_phase: Option<Phase>,
    pub current_subtask: Option<String>,
    pub current_message: Option<String>,
    pub completed_phases: Vec<Phase>,
}
