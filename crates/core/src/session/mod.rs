pub mod progress;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use cadre_provider::{
    ChatRequest, ContentPart, Message, MessageContent, ModelResolver, Provider, ProviderError,
    Role, StreamEvent, ThinkingLevel, Usage,
};

use crate::events::SessionEvent;
use crate::roles::{self, AgentRole, CapabilityOverrides, Phase, ProjectKind};
use crate::streaming::StreamAccumulator;
use crate::tools::{ToolContextSpec, ToolRegistry};

/// Immutable input to one session. Owned by the enclosing orchestrator and
/// consumed by exactly one worker; crosses the isolation boundary by copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub agent_role: AgentRole,
    pub model_identifier: String,
    pub system_prompt: String,
    #[serde(default)]
    pub initial_messages: Vec<Message>,
    pub tool_context: ToolContextSpec,
    pub max_steps: u32,
    #[serde(default)]
    pub thinking_level: ThinkingLevel,
    pub phase: Phase,
    pub spec_dir: PathBuf,
    pub project_dir: PathBuf,
    #[serde(default)]
    pub subtask_id: Option<String>,
    #[serde(default)]
    pub session_number: Option<u32>,
    #[serde(default)]
    pub model_shorthand: Option<String>,
    #[serde(default = "default_project_kind")]
    pub project_kind: ProjectKind,
}

fn default_project_kind() -> ProjectKind {
    ProjectKind::Other
}

impl SessionConfig {
    /// Tool names this session's role may bind, per the capability table.
    pub fn allowed_tools(&self) -> Vec<String> {
        roles::resolve_tools(
            self.agent_role,
            &CapabilityOverrides::default(),
            self.project_kind,
        )
    }
}

/// Shared scaffolding for the sessions one orchestrator launches: same
/// model, directories, security profile, and prompt store across roles.
#[derive(Clone)]
pub struct SessionTemplate {
    pub model_identifier: String,
    pub spec_dir: PathBuf,
    pub project_dir: PathBuf,
    pub security: crate::security::SecurityProfile,
    pub prompts: crate::prompts::PromptStore,
    pub project_kind: ProjectKind,
    pub max_steps: u32,
}

impl SessionTemplate {
    pub fn config_for(&self, role: AgentRole, phase: Phase, kickoff: String) -> SessionConfig {
        SessionConfig {
            agent_role: role,
            model_identifier: self.model_identifier.clone(),
            system_prompt: self.prompts.system_prompt(role),
            initial_messages: vec![Message::user(kickoff)],
            tool_context: ToolContextSpec::new(
                self.project_dir.clone(),
                self.spec_dir.clone(),
                self.security.clone(),
            ),
            max_steps: self.max_steps,
            thinking_level: roles::default_thinking(role),
            phase,
            spec_dir: self.spec_dir.clone(),
            project_dir: self.project_dir.clone(),
            subtask_id: None,
            session_number: None,
            model_shorthand: None,
            project_kind: self.project_kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    MaxSteps,
    Error,
    Cancelled,
    RateLimited,
    AuthFailure,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Completed | SessionOutcome::MaxSteps)
    }
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::MaxSteps => "max_steps",
            SessionOutcome::Error => "error",
            SessionOutcome::Cancelled => "cancelled",
            SessionOutcome::RateLimited => "rate_limited",
            SessionOutcome::AuthFailure => "auth_failure",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Terminal value of one session run. Published exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub outcome: SessionOutcome,
    pub steps_executed: u32,
    pub usage: Usage,
    pub messages: Vec<Message>,
    pub tool_call_count: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<SessionError>,
}

pub struct SessionCallbacks {
    pub event_tx: broadcast::Sender<SessionEvent>,
    pub resolver: Option<Arc<dyn ModelResolver>>,
}

impl SessionCallbacks {
    pub fn new(resolver: Option<Arc<dyn ModelResolver>>) -> (Self, broadcast::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = broadcast::channel(256);
        (Self { event_tx, resolver }, event_rx)
    }
}

enum ErrorClass {
    Auth,
    RateLimit,
    Retryable,
    Fatal,
}

fn classify_error(e: &anyhow::Error) -> ErrorClass {
    if let Some(pe) = e.downcast_ref::<ProviderError>() {
        if pe.is_auth() {
            ErrorClass::Auth
        } else if pe.is_rate_limit() {
            ErrorClass::RateLimit
        } else if pe.is_retryable() {
            ErrorClass::Retryable
        } else {
            ErrorClass::Fatal
        }
    } else {
        ErrorClass::Retryable
    }
}

enum ErrorAction {
    RetryAfterRefresh(Arc<dyn Provider>),
    Terminal(SessionOutcome, SessionError),
}

/// Map a provider error to a terminal outcome, attempting exactly one
/// reactive auth refresh through the injected resolver.
async fn handle_provider_error(
    e: anyhow::Error,
    auth_refreshed: &mut bool,
    callbacks: &SessionCallbacks,
    model_identifier: &str,
    event_tx: &broadcast::Sender<SessionEvent>,
) -> ErrorAction {
    match classify_error(&e) {
        ErrorClass::Auth => {
            if !*auth_refreshed {
                if let Some(resolver) = &callbacks.resolver {
                    *auth_refreshed = true;
                    match resolver.refresh(model_identifier).await {
                        Ok(fresh) => {
                            tracing::info!(model = model_identifier, "auth refreshed, retrying");
                            return ErrorAction::RetryAfterRefresh(fresh);
                        }
                        Err(refresh_err) => {
                            let _ = event_tx.send(SessionEvent::Error {
                                kind: "auth".to_string(),
                                message: refresh_err.to_string(),
                            });
                            return ErrorAction::Terminal(
                                SessionOutcome::AuthFailure,
                                SessionError {
                                    code: "auth_failure".to_string(),
                                    message: refresh_err.to_string(),
                                    retryable: false,
                                },
                            );
                        }
                    }
                }
            }
            let _ = event_tx.send(SessionEvent::Error {
                kind: "auth".to_string(),
                message: e.to_string(),
            });
            ErrorAction::Terminal(
                SessionOutcome::AuthFailure,
                SessionError {
                    code: "auth_failure".to_string(),
                    message: e.to_string(),
                    retryable: false,
                },
            )
        }
        ErrorClass::RateLimit => {
            let _ = event_tx.send(SessionEvent::Error {
                kind: "rate_limit".to_string(),
                message: e.to_string(),
            });
            ErrorAction::Terminal(
                SessionOutcome::RateLimited,
                SessionError {
                    code: "rate_limited".to_string(),
                    message: e.to_string(),
                    retryable: true,
                },
            )
        }
        ErrorClass::Retryable => {
            let _ = event_tx.send(SessionEvent::Error {
                kind: "provider".to_string(),
                message: e.to_string(),
            });
            ErrorAction::Terminal(
                SessionOutcome::Error,
                SessionError {
                    code: "provider_error".to_string(),
                    message: e.to_string(),
                    retryable: true,
                },
            )
        }
        ErrorClass::Fatal => {
            let _ = event_tx.send(SessionEvent::Error {
                kind: "provider".to_string(),
                message: e.to_string(),
            });
            ErrorAction::Terminal(
                SessionOutcome::Error,
                SessionError {
                    code: "provider_error".to_string(),
                    message: e.to_string(),
                    retryable: false,
                },
            )
        }
    }
}

/// Drive one streaming conversation to a terminal outcome. Events go to
/// `callbacks.event_tx` in the exact order produced; the returned result
/// carries the complete transcript. Never executes more than
/// `config.max_steps` model steps.
pub async fn run_session(
    provider: Arc<dyn Provider>,
    config: &SessionConfig,
    registry: &ToolRegistry,
    cancel: CancellationToken,
    callbacks: &SessionCallbacks,
) -> SessionResult {
    let start = Instant::now();
    let event_tx = callbacks.event_tx.clone();

    let mut provider = provider;
    let mut auth_refreshed = false;
    let mut messages = config.initial_messages.clone();
    let mut usage_total = Usage::default();
    let mut tool_call_count: u32 = 0;
    let mut steps_executed: u32 = 0;
    let mut terminal: Option<(SessionOutcome, Option<SessionError>)> = None;

    let allowed = config.allowed_tools();
    let tool_defs = registry.definitions_filtered(&allowed);
    let ctx = config
        .tool_context
        .clone()
        .into_runtime(cancel.clone(), Some(event_tx.clone()));

    'steps: for _ in 0..config.max_steps {
        if cancel.is_cancelled() {
            terminal = Some((SessionOutcome::Cancelled, None));
            break;
        }

        let request = ChatRequest {
            model: config.model_identifier.clone(),
            messages: messages.clone(),
            tools: tool_defs.clone(),
            max_tokens: None,
            system: Some(config.system_prompt.clone()),
            thinking: Some(config.thinking_level),
        };

        let acc = 'attempt: loop {
            let opened = tokio::select! {
                _ = cancel.cancelled() => {
                    terminal = Some((SessionOutcome::Cancelled, None));
                    break 'steps;
                }
                r = provider.chat_stream(&request) => r,
            };

            let mut stream = match opened {
                Ok(s) => s,
                Err(e) => {
                    match handle_provider_error(
                        e,
                        &mut auth_refreshed,
                        callbacks,
                        &config.model_identifier,
                        &event_tx,
                    )
                    .await
                    {
                        ErrorAction::RetryAfterRefresh(fresh) => {
                            provider = fresh;
                            continue 'attempt;
                        }
                        ErrorAction::Terminal(outcome, error) => {
                            terminal = Some((outcome, Some(error)));
                            break 'steps;
                        }
                    }
                }
            };

            let mut acc = StreamAccumulator::new();
            let mut stream_err: Option<anyhow::Error> = None;

            loop {
                let item = tokio::select! {
                    _ = cancel.cancelled() => {
                        terminal = Some((SessionOutcome::Cancelled, None));
                        break 'steps;
                    }
                    item = stream.next() => item,
                };
                let Some(event) = item else { break };
                let event = match event {
                    Ok(ev) => ev,
                    Err(e) => {
                        stream_err = Some(e);
                        break;
                    }
                };
                acc.process(&event);

                match &event {
                    StreamEvent::TextDelta(text) => {
                        let _ = event_tx.send(SessionEvent::TextDelta { text: text.clone() });
                    }
                    StreamEvent::ThinkingDelta(text) => {
                        let _ = event_tx.send(SessionEvent::ThinkingDelta { text: text.clone() });
                    }
                    StreamEvent::Usage(usage) => {
                        usage_total.accumulate(usage);
                        let _ = event_tx.send(SessionEvent::UsageUpdate {
                            prompt_tokens: usage_total.prompt_tokens,
                            completion_tokens: usage_total.completion_tokens,
                            total_tokens: usage_total.total_tokens(),
                        });
                    }
                    _ => {}
                }
            }

            if let Some(e) = stream_err {
                match handle_provider_error(
                    e,
                    &mut auth_refreshed,
                    callbacks,
                    &config.model_identifier,
                    &event_tx,
                )
                .await
                {
                    ErrorAction::RetryAfterRefresh(fresh) => {
                        provider = fresh;
                        continue 'attempt;
                    }
                    ErrorAction::Terminal(outcome, error) => {
                        terminal = Some((outcome, Some(error)));
                        break 'steps;
                    }
                }
            }

            break 'attempt acc;
        };

        steps_executed += 1;

        if acc.has_tool_calls() {
            let mut tool_use_parts = Vec::with_capacity(acc.tool_calls.len());
            let mut tool_result_parts = Vec::with_capacity(acc.tool_calls.len());

            for tc in &acc.tool_calls {
                let args: serde_json::Value =
                    serde_json::from_str(&tc.arguments).unwrap_or(serde_json::Value::Null);

                let _ = event_tx.send(SessionEvent::ToolCall {
                    tool_name: tc.name.clone(),
                    arguments: args.clone(),
                });
                tool_use_parts.push(ContentPart::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input: args.clone(),
                });

                let (output, is_error) = if allowed.iter().any(|n| n == &tc.name) {
                    match registry.execute(&tc.name, args, &ctx).await {
                        Ok(r) => (r.output, r.is_error),
                        Err(e) => (format!("Error executing tool: {e}"), true),
                    }
                } else {
                    (
                        format!("Tool `{}` is not available for this agent role", tc.name),
                        true,
                    )
                };
                tool_call_count += 1;

                let _ = event_tx.send(SessionEvent::ToolResult {
                    tool_name: tc.name.clone(),
                    result: output.clone(),
                    is_error,
                });
                tool_result_parts.push(ContentPart::ToolResult {
                    tool_use_id: tc.id.clone(),
                    content: output,
                });
            }

            messages.push(Message {
                role: Role::Assistant,
                content: MessageContent::Parts(tool_use_parts),
            });
            messages.push(Message {
                role: Role::User,
                content: MessageContent::Parts(tool_result_parts),
            });
            let _ = event_tx.send(SessionEvent::StepFinish);
        } else {
            let _ = event_tx.send(SessionEvent::StepFinish);
            if !acc.text.is_empty() {
                messages.push(Message::assistant(acc.text));
                terminal = Some((SessionOutcome::Completed, None));
                break;
            }
            // No text and no tool calls: keep stepping until the ceiling.
        }
    }

    let (outcome, error) = terminal.unwrap_or((SessionOutcome::MaxSteps, None));
    SessionResult {
        outcome,
        steps_executed,
        usage: usage_total,
        messages,
        tool_call_count,
        duration_ms: start.elapsed().as_millis() as u64,
        error,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn registry() -> ToolRegistry {
        crate::tools::default_registry()
    }

    #[tokio::test]
    async fn final_text_completes_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::text_reply("done");
        let config = test_config(dir.path(), AgentRole::Coder, 10);
        let (callbacks, _rx) = SessionCallbacks::new(None);

        let result = run_session(
            provider,
            &config,
            &registry(),
            CancellationToken::new(),
            &callbacks,
        )
        .await;

        assert_eq!(result.outcome, SessionOutcome::Completed);
        assert_eq!(result.steps_executed, 1);
        let last = result.messages.last().unwrap();
        assert_eq!(last.content.as_text(), "done");
    }

    #[tokio::test]
    async fn tool_call_then_text_records_transcript() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "content\n").unwrap();
        let provider = ScriptedProvider::new(vec![
            ScriptStep::Events(vec![
                StreamEvent::ToolCallStart {
                    index: 0,
                    id: "tc_1".into(),
                    name: "read".into(),
                },
                StreamEvent::ToolCallDelta {
                    index: 0,
                    arguments_delta: "{\"file_path\":\"f.txt\"}".into(),
                },
                StreamEvent::ToolCallDone { index: 0 },
                StreamEvent::Done,
            ]),
            ScriptStep::Events(vec![
                StreamEvent::TextDelta("read it".into()),
                StreamEvent::Done,
            ]),
        ]);
        let config = test_config(dir.path(), AgentRole::Coder, 10);
        let (callbacks, mut rx) = SessionCallbacks::new(None);

        let result = run_session(
            provider,
            &config,
            &registry(),
            CancellationToken::new(),
            &callbacks,
        )
        .await;

        assert_eq!(result.outcome, SessionOutcome::Completed);
        assert_eq!(result.steps_executed, 2);
        assert_eq!(result.tool_call_count, 1);
        // transcript: user, assistant tool_use, user tool_result, assistant text
        assert_eq!(result.messages.len(), 4);

        let mut saw_tool_call = false;
        let mut saw_tool_result = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                SessionEvent::ToolCall { tool_name, .. } => {
                    assert_eq!(tool_name, "read");
                    saw_tool_call = true;
                }
                SessionEvent::ToolResult { is_error, .. } => {
                    assert!(!is_error);
                    saw_tool_result = true;
                }
                _ => {}
            }
        }
        assert!(saw_tool_call && saw_tool_result);
    }

    #[tokio::test]
    async fn step_ceiling_yields_max_steps() {
        let dir = tempfile::tempdir().unwrap();
        // Model keeps asking for tool calls; ceiling of 1 stops it.
        let provider = ScriptedProvider::new(vec![ScriptStep::Events(vec![
            StreamEvent::ToolCallStart {
                index: 0,
                id: "tc_1".into(),
                name: "list_dir".into(),
            },
            StreamEvent::ToolCallDelta {
                index: 0,
                arguments_delta: "{}".into(),
            },
            StreamEvent::Done,
        ])]);
        let config = test_config(dir.path(), AgentRole::Coder, 1);
        let (callbacks, _rx) = SessionCallbacks::new(None);

        let result = run_session(
            provider,
            &config,
            &registry(),
            CancellationToken::new(),
            &callbacks,
        )
        .await;

        assert_eq!(result.outcome, SessionOutcome::MaxSteps);
        assert_eq!(result.steps_executed, 1);
        assert!(result.steps_executed <= config.max_steps);
    }

    #[tokio::test]
    async fn rate_limit_surfaces_as_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![ScriptStep::Fail(ProviderError::RateLimited {
            retry_after_ms: 2000,
        })]);
        let config = test_config(dir.path(), AgentRole::Coder, 10);
        let (callbacks, _rx) = SessionCallbacks::new(None);

        let result = run_session(
            provider,
            &config,
            &registry(),
            CancellationToken::new(),
            &callbacks,
        )
        .await;

        assert_eq!(result.outcome, SessionOutcome::RateLimited);
        assert!(result.error.unwrap().retryable);
    }

    #[tokio::test]
    async fn auth_failure_refreshes_once_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let failing = ScriptedProvider::new(vec![ScriptStep::Fail(ProviderError::HttpError {
            status: 401,
            body: "token expired".into(),
        })]);
        let resolver = Arc::new(ScriptedResolver {
            replacement: ScriptedProvider::text_reply("after refresh"),
            refresh_count: AtomicU32::new(0),
        });
        let config = test_config(dir.path(), AgentRole::Coder, 10);
        let (callbacks, _rx) = SessionCallbacks::new(Some(resolver.clone()));

        let result = run_session(
            failing,
            &config,
            &registry(),
            CancellationToken::new(),
            &callbacks,
        )
        .await;

        assert_eq!(result.outcome, SessionOutcome::Completed);
        assert_eq!(resolver.refresh_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_auth_failure_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let failing = ScriptedProvider::new(vec![ScriptStep::Fail(ProviderError::HttpError {
            status: 401,
            body: "token expired".into(),
        })]);
        // Replacement also fails auth.
        let resolver = Arc::new(ScriptedResolver {
            replacement: ScriptedProvider::new(vec![ScriptStep::Fail(
                ProviderError::HttpError {
                    status: 401,
                    body: "still expired".into(),
                },
            )]),
            refresh_count: AtomicU32::new(0),
        });
        let config = test_config(dir.path(), AgentRole::Coder, 10);
        let (callbacks, _rx) = SessionCallbacks::new(Some(resolver.clone()));

        let result = run_session(
            failing,
            &config,
            &registry(),
            CancellationToken::new(),
            &callbacks,
        )
        .await;

        assert_eq!(result.outcome, SessionOutcome::AuthFailure);
        assert_eq!(resolver.refresh_count.load(Ordering::SeqCst), 1);
        assert!(!result.error.unwrap().retryable);
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::text_reply("never seen");
        let config = test_config(dir.path(), AgentRole::Coder, 10);
        let (callbacks, _rx) = SessionCallbacks::new(None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_session(provider, &config, &registry(), cancel, &callbacks).await;

        assert_eq!(result.outcome, SessionOutcome::Cancelled);
        assert_eq!(result.steps_executed, 0);
    }

    #[tokio::test]
    async fn role_without_tool_rejects_the_call() {
        let dir = tempfile::tempdir().unwrap();
        // spec_critic is read-only; a write call resolves as an error result.
        let provider = ScriptedProvider::new(vec![
            ScriptStep::Events(vec![
                StreamEvent::ToolCallStart {
                    index: 0,
                    id: "tc_1".into(),
                    name: "write".into(),
                },
                StreamEvent::ToolCallDelta {
                    index: 0,
                    arguments_delta: "{\"file_path\":\"x\",\"content\":\"y\"}".into(),
                },
                StreamEvent::Done,
            ]),
            ScriptStep::Events(vec![
                StreamEvent::TextDelta("ok".into()),
                StreamEvent::Done,
            ]),
        ]);
        let config = test_config(dir.path(), AgentRole::SpecCritic, 10);
        let (callbacks, mut rx) = SessionCallbacks::new(None);

        let result = run_session(
            provider,
            &config,
            &registry(),
            CancellationToken::new(),
            &callbacks,
        )
        .await;

        assert_eq!(result.outcome, SessionOutcome::Completed);
        let mut denied = false;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::ToolResult {
                is_error, result, ..
            } = event
            {
                if is_error && result.contains("not available") {
                    denied = true;
                }
            }
        }
        assert!(denied);
        assert!(!std::path::Path::new(&dir.path().join("x")).exists());
    }

    #[tokio::test]
    async fn usage_accumulates_across_steps() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![
            ScriptStep::Events(vec![
                StreamEvent::ToolCallStart {
                    index: 0,
                    id: "tc_1".into(),
                    name: "list_dir".into(),
                },
                StreamEvent::ToolCallDelta {
                    index: 0,
                    arguments_delta: "{}".into(),
                },
                StreamEvent::Usage(Usage {
                    prompt_tokens: 100,
                    completion_tokens: 10,
                }),
                StreamEvent::Done,
            ]),
            ScriptStep::Events(vec![
                StreamEvent::TextDelta("done".into()),
                StreamEvent::Usage(Usage {
                    prompt_tokens: 200,
                    completion_tokens: 20,
                }),
                StreamEvent::Done,
            ]),
        ]);
        let config = test_config(dir.path(), AgentRole::Coder, 10);
        let (callbacks, _rx) = SessionCallbacks::new(None);

        let result = run_session(
            provider,
            &config,
            &registry(),
            CancellationToken::new(),
            &callbacks,
        )
        .await;

        assert_eq!(result.usage.prompt_tokens, 300);
        assert_eq!(result.usage.completion_tokens, 30);
        assert_eq!(result.usage.total_tokens(), 330);
    }
}
