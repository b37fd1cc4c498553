use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::driver::SessionDriver;
use crate::events::OrchestratorEvent;
use crate::plan::ImplementationPlan;
use crate::prompts;
use crate::roles::{AgentRole, Phase};
use crate::session::{SessionOutcome, SessionTemplate};

/// How a subtask iteration run ended.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    /// Every subtask is completed or stuck.
    pub completed: bool,
    pub cancelled: bool,
    /// Set when the run stopped on a session outcome the caller must
    /// handle (`rate_limited`, `auth_failure`). No backoff is performed
    /// here; upstream owns it.
    pub interrupted: Option<SessionOutcome>,
    pub stuck: Vec<String>,
    pub sessions_run: u32,
}

/// Walks the plan file, launching one coder session per actionable
/// subtask. The agent itself transitions subtask status by rewriting the
/// plan; the iterator only reloads and schedules.
pub struct SubtaskIterator {
    driver: Arc<dyn SessionDriver>,
    template: SessionTemplate,
    max_retries: u32,
    auto_continue_delay_ms: u64,
    events: broadcast::Sender<OrchestratorEvent>,
    cancel: CancellationToken,
}

impl SubtaskIterator {
    pub fn new(
        driver: Arc<dyn SessionDriver>,
        template: SessionTemplate,
        max_retries: u32,
        auto_continue_delay_ms: u64,
        events: broadcast::Sender<OrchestratorEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            driver,
            template,
            max_retries,
            auto_continue_delay_ms,
            events,
            cancel,
        }
    }

    pub async fn run(&self) -> Result<IterationOutcome> {
        let mut attempts: HashMap<String, u32> = HashMap::new();
        let mut stuck: Vec<String> = Vec::new();
        let mut sessions_run: u32 = 0;
        let mut session_number: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.outcome(false, true, None, stuck, sessions_run));
            }

            let plan = ImplementationPlan::load(&self.template.spec_dir)?
                .ok_or_else(|| anyhow::anyhow!("No implementation plan in spec directory"))?;

            let stuck_set: HashSet<String> = stuck.iter().cloned().collect();
            let Some(subtask) = plan.next_actionable(&stuck_set) else {
                return Ok(self.outcome(true, false, None, stuck, sessions_run));
            };

            let attempt = attempts
                .entry(subtask.id.clone())
                .and_modify(|n| *n += 1)
                .or_insert(1);
            if *attempt > self.max_retries {
                tracing::warn!(subtask = %subtask.id, "subtask exceeded retry budget, marking stuck");
                let _ = self.events.send(OrchestratorEvent::Log {
                    message: format!("subtask {} marked stuck after {} attempts", subtask.id, *attempt - 1),
                });
                stuck.push(subtask.id.clone());
                continue;
            }

            let _ = self.events.send(OrchestratorEvent::Log {
                message: format!("subtask {} attempt {}", subtask.id, attempt),
            });

            session_number += 1;
            let mut config = self.template.config_for(
                AgentRole::Coder,
                Phase::Coding,
                prompts::coder_kickoff(subtask),
            );
            config.subtask_id = Some(subtask.id.clone());
            config.session_number = Some(session_number);

            let result = self.driver.run(config).await;
            sessions_run += 1;

            match result {
                Ok(session) => match session.outcome {
                    SessionOutcome::Cancelled => {
                        return Ok(self.outcome(false, true, None, stuck, sessions_run));
                    }
                    SessionOutcome::RateLimited | SessionOutcome::AuthFailure => {
                        return Ok(self.outcome(
                            false,
                            false,
                            Some(session.outcome),
                            stuck,
                            sessions_run,
                        ));
                    }
                    // Completed/max_steps advance via the rewritten plan;
                    // errors leave the subtask for the next pass.
                    _ => {}
                },
                Err(e) => {
                    let _ = self.events.send(OrchestratorEvent::Error {
                        message: format!("coder session failed: {e}"),
                    });
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Ok(self.outcome(false, true, None, stuck, sessions_run));
                }
                _ = tokio::time::sleep(Duration::from_millis(self.auto_continue_delay_ms)) => {}
            }
        }
    }

    fn outcome(
        &self,
        completed: bool,
        cancelled: bool,
        interrupted: Option<SessionOutcome>,
        stuck: Vec<String>,
        sessions_run: u32,
    ) -> IterationOutcome {
        IterationOutcome {
            completed,
            cancelled,
            interrupted,
            stuck,
            sessions_run,
        }
    }
}
