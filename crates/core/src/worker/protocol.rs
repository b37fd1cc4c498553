use serde::{Deserialize, Serialize};

use crate::events::{ExecutionProgress, SessionEvent};
use crate::session::{SessionConfig, SessionOutcome, SessionResult};

/// Everything a worker needs to run its session. Serialized by copy across
/// the isolation boundary. Credentials are absent; the worker re-resolves
/// them on its own side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub worker_id: String,
    pub session: SessionConfig,
}

impl ExecutorConfig {
    pub fn new(session: SessionConfig) -> Self {
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            session,
        }
    }
}

/// Controller → worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    Abort,
}

/// Worker → controller. The worker emits exactly one `Result` followed by
/// exactly one `Exit`; the controller synthesizes both if the worker dies
/// first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    Log {
        message: String,
    },
    Error {
        message: String,
    },
    StreamEvent {
        event: SessionEvent,
    },
    ExecutionProgress {
        progress: ExecutionProgress,
    },
    TaskEvent {
        name: String,
        payload: serde_json::Value,
    },
    Result {
        result: SessionResult,
    },
    Exit {
        code: i32,
    },
}

/// Exit code the controller reports for an outcome: 0 for success
/// outcomes, 1 for error/cancelled.
pub fn exit_code_for(outcome: SessionOutcome) -> i32 {
    if outcome.is_success() {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::{AgentRole, Phase, ProjectKind};
    use crate::security::SecurityProfile;
    use crate::tools::ToolContextSpec;
    use cadre_provider::ThinkingLevel;
    use std::path::PathBuf;

    fn sample_config() -> ExecutorConfig {
        let mut security = SecurityProfile::with_stack(vec!["cargo".to_string()]);
        security.script_names.push("build.sh".to_string());
        ExecutorConfig::new(SessionConfig {
            agent_role: AgentRole::Coder,
            model_identifier: "anthropic/test-model".to_string(),
            system_prompt: "prompt".to_string(),
            initial_messages: vec![cadre_provider::Message::user("go")],
            tool_context: ToolContextSpec::new(
                PathBuf::from("/work/project"),
                PathBuf::from("/work/project/spec"),
                security,
            ),
            max_steps: 25,
            thinking_level: ThinkingLevel::High,
            phase: Phase::Coding,
            spec_dir: PathBuf::from("/work/project/spec"),
            project_dir: PathBuf::from("/work/project"),
            subtask_id: Some("S1".to_string()),
            session_number: Some(2),
            model_shorthand: None,
            project_kind: ProjectKind::Other,
        })
    }

    #[test]
    fn executor_config_round_trips() {
        let config = sample_config();
        let encoded = serde_json::to_string(&config).unwrap();
        let decoded: ExecutorConfig = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.worker_id, config.worker_id);
        assert_eq!(decoded.session.subtask_id.as_deref(), Some("S1"));
        assert_eq!(decoded.session.max_steps, 25);
        // The profile's sets and script list survive the boundary exactly.
        assert_eq!(
            decoded.session.tool_context.security,
            config.session.tool_context.security
        );
    }

    #[test]
    fn messages_serialize_with_tags() {
        let message = WorkerMessage::Exit { code: 1 };
        let encoded = serde_json::to_string(&message).unwrap();
        assert!(encoded.contains("\"type\":\"exit\""));

        let control = ControlMessage::Abort;
        let encoded = serde_json::to_string(&control).unwrap();
        assert!(encoded.contains("\"type\":\"abort\""));
    }

    #[test]
    fn exit_codes_map_outcomes() {
        assert_eq!(exit_code_for(SessionOutcome::Completed), 0);
        assert_eq!(exit_code_for(SessionOutcome::MaxSteps), 0);
        assert_eq!(exit_code_for(SessionOutcome::Error), 1);
        assert_eq!(exit_code_for(SessionOutcome::Cancelled), 1);
        assert_eq!(exit_code_for(SessionOutcome::RateLimited), 1);
        assert_eq!(exit_code_for(SessionOutcome::AuthFailure), 1);
    }
}
