use anyhow::Result;
use async_trait::async_trait;

use crate::session::{SessionConfig, SessionResult};

/// The seam between orchestrators and session execution. Orchestrators
/// never talk to a provider directly; they hand a config to a driver and
/// receive the terminal result. The production driver runs the session in
/// an isolated worker (see `worker::WorkerDriver`); tests script this trait.
#[async_trait]
pub trait SessionDriver: Send + Sync {
    async fn run(&self, config: SessionConfig) -> Result<SessionResult>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::session::{SessionError, SessionOutcome};
    use cadre_provider::Usage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub fn result_with(outcome: SessionOutcome) -> SessionResult {
        SessionResult {
            outcome,
            steps_executed: 1,
            usage: Usage::default(),
            messages: vec![],
            tool_call_count: 0,
            duration_ms: 5,
            error: match outcome {
                SessionOutcome::Error => Some(SessionError {
                    code: "provider_error".to_string(),
                    message: "scripted failure".to_string(),
                    retryable: true,
                }),
                _ => None,
            },
        }
    }

    /// Driver that replays a scripted list of outcomes and optionally runs
    /// a side effect per session (to emulate agents writing artifacts).
    pub struct ScriptedDriver {
        outcomes: Mutex<Vec<SessionOutcome>>,
        pub calls: AtomicUsize,
        pub seen: Mutex<Vec<SessionConfig>>,
        #[allow(clippy::type_complexity)]
        pub side_effect: Option<Box<dyn Fn(&SessionConfig, usize) + Send + Sync>>,
    }

    impl ScriptedDriver {
        pub fn new(outcomes: Vec<SessionOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                side_effect: None,
            }
        }

        pub fn with_side_effect(
            outcomes: Vec<SessionOutcome>,
            side_effect: impl Fn(&SessionConfig, usize) + Send + Sync + 'static,
        ) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                side_effect: Some(Box::new(side_effect)),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionDriver for ScriptedDriver {
        async fn run(&self, config: SessionConfig) -> Result<SessionResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(effect) = &self.side_effect {
                effect(&config, call);
            }
            self.seen.lock().unwrap().push(config);
            let mut outcomes = self.outcomes.lock().unwrap();
            let outcome = if outcomes.is_empty() {
                SessionOutcome::Completed
            } else {
                outcomes.remove(0)
            };
            Ok(result_with(outcome))
        }
    }
}
