pub mod protocol;

pub use protocol::{exit_code_for, ControlMessage, ExecutorConfig, WorkerMessage};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use cadre_provider::ModelResolver;

use crate::driver::SessionDriver;
use crate::session::{
    run_session, SessionCallbacks, SessionConfig, SessionError, SessionOutcome, SessionResult,
};
use crate::session::progress::ProgressTracker;

const TERMINATE_GRACE_MS: u64 = 1500;

/// Handle for terminating a worker: graceful cancel first, force-abort
/// after the grace period. Idempotent.
#[derive(Clone)]
pub struct WorkerTerminator {
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    cancel: CancellationToken,
    abort: AbortHandle,
    terminated: Arc<AtomicBool>,
}

impl WorkerTerminator {
    pub async fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.control_tx.send(ControlMessage::Abort);
        self.cancel.cancel();
        tokio::time::sleep(Duration::from_millis(TERMINATE_GRACE_MS)).await;
        self.abort.abort();
    }
}

/// Runs one session in an isolated execution context. Configuration
/// crosses the boundary as a serialized copy; the worker resolves its own
/// credentials and model handle. The controller observes a message stream
/// ending in exactly one `Result` (when the worker survives) and exactly
/// one `Exit` (always, crashes included).
pub struct WorkerBridge {
    pub worker_id: String,
    events: mpsc::UnboundedReceiver<WorkerMessage>,
    terminator: WorkerTerminator,
}

impl WorkerBridge {
    pub fn spawn(config: ExecutorConfig, resolver: Arc<dyn ModelResolver>) -> Result<Self> {
        config.session.tool_context.validate()?;

        // Copy by serialization: nothing mutable is shared with the worker.
        let payload = serde_json::to_string(&config)?;
        let worker_id = config.worker_id.clone();

        let (inner_tx, inner_rx) = mpsc::unbounded_channel::<WorkerMessage>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<WorkerMessage>();
        let (control_tx, control_rx) = mpsc::unbounded_channel::<ControlMessage>();
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(worker_main(
            payload,
            inner_tx,
            control_rx,
            cancel.child_token(),
            resolver,
        ));
        let abort = worker.abort_handle();
        tokio::spawn(supervise(worker, inner_rx, out_tx));

        Ok(Self {
            worker_id,
            events: out_rx,
            terminator: WorkerTerminator {
                control_tx,
                cancel,
                abort,
                terminated: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    pub fn terminator(&self) -> WorkerTerminator {
        self.terminator.clone()
    }

    pub async fn terminate(&self) {
        self.terminator.terminate().await;
    }

    pub async fn recv(&mut self) -> Option<WorkerMessage> {
        self.events.recv().await
    }

    /// Drain the message stream to completion and return the session
    /// result. Errors if the worker died before producing one.
    pub async fn wait(mut self) -> Result<SessionResult> {
        let mut result = None;
        while let Some(message) = self.recv().await {
            if let WorkerMessage::Result { result: r } = message {
                result = Some(r);
            }
        }
        result.ok_or_else(|| anyhow::anyhow!("worker exited without producing a result"))
    }
}

/// Forwards worker messages to the controller and guarantees the exit
/// contract: deduplicates `Exit`, synthesizes `Error` + `Exit(1)` when the
/// worker dies (panic or force-abort) before finishing.
async fn supervise(
    worker: JoinHandle<()>,
    mut inner_rx: mpsc::UnboundedReceiver<WorkerMessage>,
    out_tx: mpsc::UnboundedSender<WorkerMessage>,
) {
    let mut saw_result = false;
    let mut saw_exit = false;

    while let Some(message) = inner_rx.recv().await {
        match &message {
            WorkerMessage::Result { .. } => saw_result = true,
            WorkerMessage::Exit { .. } => {
                if saw_exit {
                    continue;
                }
                saw_exit = true;
            }
            _ => {}
        }
        let _ = out_tx.send(message);
    }

    if let Err(e) = worker.await {
        tracing::warn!("worker task ended abnormally: {e}");
    }

    if !saw_result {
        let _ = out_tx.send(WorkerMessage::Error {
            message: "worker terminated before producing a result".to_string(),
        });
    }
    if !saw_exit {
        let _ = out_tx.send(WorkerMessage::Exit { code: 1 });
    }
}

async fn worker_main(
    payload: String,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    mut control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    cancel: CancellationToken,
    resolver: Arc<dyn ModelResolver>,
) {
    // Reconstitute the configuration on this side of the boundary.
    let config: ExecutorConfig = match serde_json::from_str(&payload) {
        Ok(config) => config,
        Err(e) => {
            let _ = tx.send(WorkerMessage::Error {
                message: format!("invalid executor config: {e}"),
            });
            let _ = tx.send(WorkerMessage::Exit { code: 1 });
            return;
        }
    };
    let session = config.session;

    let _ = tx.send(WorkerMessage::Log {
        message: format!(
            "worker {} running {} session",
            config.worker_id, session.agent_role
        ),
    });
    let _ = tx.send(WorkerMessage::TaskEvent {
        name: "session-started".to_string(),
        payload: serde_json::json!({
            "role": session.agent_role,
            "phase": session.phase,
            "subtask_id": session.subtask_id,
        }),
    });

    let control_cancel = cancel.clone();
    tokio::spawn(async move {
        while let Some(message) = control_rx.recv().await {
            match message {
                ControlMessage::Abort => control_cancel.cancel(),
            }
        }
    });

    // The model handle is rebuilt from the identifier here; credentials
    // never crossed the boundary.
    let provider = match resolver.resolve(&session.model_identifier).await {
        Ok(provider) => provider,
        Err(e) => {
            let _ = tx.send(WorkerMessage::Error {
                message: format!("model resolution failed: {e}"),
            });
            let result = SessionResult {
                outcome: SessionOutcome::Error,
                steps_executed: 0,
                usage: Default::default(),
                messages: session.initial_messages.clone(),
                tool_call_count: 0,
                duration_ms: 0,
                error: Some(SessionError {
                    code: "model_resolution".to_string(),
                    message: e.to_string(),
                    retryable: false,
                }),
            };
            let _ = tx.send(WorkerMessage::Result { result });
            let _ = tx.send(WorkerMessage::Exit { code: 1 });
            return;
        }
    };

    let registry = crate::tools::default_registry();
    let (callbacks, mut event_rx) = SessionCallbacks::new(Some(resolver.clone()));

    let forward_tx = tx.clone();
    let mut tracker = ProgressTracker::new(Some(session.phase));
    if let Some(subtask_id) = &session.subtask_id {
        tracker.note_subtask(subtask_id.clone());
    }
    let forward = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    if let Some(progress) = tracker.observe(&event) {
                        let _ = forward_tx.send(WorkerMessage::ExecutionProgress { progress });
                    }
                    let _ = forward_tx.send(WorkerMessage::StreamEvent { event });
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    });

    let result = run_session(provider, &session, &registry, cancel, &callbacks).await;

    drop(callbacks);
    let _ = forward.await;

    let code = exit_code_for(result.outcome);
    let _ = tx.send(WorkerMessage::TaskEvent {
        name: "session-finished".to_string(),
        payload: serde_json::json!({
            "outcome": result.outcome,
            "steps": result.steps_executed,
        }),
    });
    let _ = tx.send(WorkerMessage::Result { result });
    let _ = tx.send(WorkerMessage::Exit { code });
}

/// Production `SessionDriver`: one isolated worker per session, with
/// orchestrator-level cancellation mapped to worker termination and
/// worker messages fanned out to subscribers.
pub struct WorkerDriver {
    resolver: Arc<dyn ModelResolver>,
    cancel: CancellationToken,
    messages: broadcast::Sender<WorkerMessage>,
}

impl WorkerDriver {
    pub fn new(resolver: Arc<dyn ModelResolver>, cancel: CancellationToken) -> Self {
        let (messages, _) = broadcast::channel(256);
        Self {
            resolver,
            cancel,
            messages,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerMessage> {
        self.messages.subscribe()
    }
}

#[async_trait]
impl SessionDriver for WorkerDriver {
    async fn run(&self, config: SessionConfig) -> Result<SessionResult> {
        let mut bridge = WorkerBridge::spawn(ExecutorConfig::new(config), self.resolver.clone())?;

        let terminator = bridge.terminator();
        let cancel = self.cancel.clone();
        let watcher = tokio::spawn(async move {
            cancel.cancelled().await;
            terminator.terminate().await;
        });

        let mut result = None;
        while let Some(message) = bridge.recv().await {
            if let WorkerMessage::Result { result: r } = &message {
                result = Some(r.clone());
            }
            let _ = self.messages.send(message);
        }
        watcher.abort();

        result.ok_or_else(|| anyhow::anyhow!("worker exited without producing a result"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::AgentRole;
    use crate::session::testing::{test_config, ScriptStep, ScriptedProvider, ScriptedResolver};
    use cadre_provider::Provider;
    use std::sync::atomic::AtomicU32;

    fn resolver_with(provider: Arc<ScriptedProvider>) -> Arc<ScriptedResolver> {
        Arc::new(ScriptedResolver {
            replacement: provider,
            refresh_count: AtomicU32::new(0),
        })
    }

    /// Resolver that panics, to exercise crash synthesis.
    struct PanickingResolver;

    #[async_trait]
    impl ModelResolver for PanickingResolver {
        async fn resolve(
            &self,
            _model_identifier: &str,
        ) -> Result<Arc<dyn Provider>> {
            panic!("worker crashed");
        }
    }

    #[tokio::test]
    async fn emits_result_then_single_exit() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with(ScriptedProvider::text_reply("done"));
        let config = ExecutorConfig::new(test_config(dir.path(), AgentRole::Coder, 5));
        let mut bridge = WorkerBridge::spawn(config, resolver).unwrap();

        let mut results = 0;
        let mut exits = Vec::new();
        while let Some(message) = bridge.recv().await {
            match message {
                WorkerMessage::Result { result } => {
                    results += 1;
                    assert_eq!(result.outcome, SessionOutcome::Completed);
                }
                WorkerMessage::Exit { code } => exits.push(code),
                _ => {}
            }
        }
        assert_eq!(results, 1);
        assert_eq!(exits, vec![0]);
    }

    #[tokio::test]
    async fn forwards_stream_events_across_the_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with(ScriptedProvider::text_reply("streamed text"));
        let config = ExecutorConfig::new(test_config(dir.path(), AgentRole::Coder, 5));
        let mut bridge = WorkerBridge::spawn(config, resolver).unwrap();

        let mut saw_text = false;
        while let Some(message) = bridge.recv().await {
            if let WorkerMessage::StreamEvent {
                event: crate::events::SessionEvent::TextDelta { text },
            } = message
            {
                assert_eq!(text, "streamed text");
                saw_text = true;
            }
        }
        assert!(saw_text);
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_cancels_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with(ScriptedProvider::new(vec![ScriptStep::Pending]));
        let config = ExecutorConfig::new(test_config(dir.path(), AgentRole::Coder, 5));
        let bridge = WorkerBridge::spawn(config, resolver).unwrap();

        let terminator = bridge.terminator();
        let waiter = tokio::spawn(bridge.wait());
        // Let the worker start its pending stream before terminating.
        tokio::time::sleep(Duration::from_millis(10)).await;
        terminator.terminate().await;
        // Second call is a no-op.
        terminator.terminate().await;

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.outcome, SessionOutcome::Cancelled);
    }

    #[tokio::test]
    async fn crash_before_result_synthesizes_error_and_exit() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExecutorConfig::new(test_config(dir.path(), AgentRole::Coder, 5));
        let mut bridge = WorkerBridge::spawn(config, Arc::new(PanickingResolver)).unwrap();

        let mut saw_error = false;
        let mut exits = Vec::new();
        let mut results = 0;
        while let Some(message) = bridge.recv().await {
            match message {
                WorkerMessage::Error { .. } => saw_error = true,
                WorkerMessage::Exit { code } => exits.push(code),
                WorkerMessage::Result { .. } => results += 1,
                _ => {}
            }
        }
        assert!(saw_error);
        assert_eq!(exits, vec![1]);
        assert_eq!(results, 0);
    }

    #[tokio::test]
    async fn worker_driver_returns_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with(ScriptedProvider::text_reply("ok"));
        let driver = WorkerDriver::new(resolver, CancellationToken::new());

        let result = driver
            .run(test_config(dir.path(), AgentRole::Coder, 5))
            .await
            .unwrap();
        assert_eq!(result.outcome, SessionOutcome::Completed);
    }

    #[tokio::test]
    async fn invalid_cwd_is_rejected_at_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), AgentRole::Coder, 5);
        config.tool_context.cwd = std::path::PathBuf::from("/elsewhere");
        let resolver = resolver_with(ScriptedProvider::text_reply("x"));
        assert!(WorkerBridge::spawn(ExecutorConfig::new(config), resolver).is_err());
    }
}
