pub mod subtasks;

pub use subtasks::{IterationOutcome, SubtaskIterator};

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::artifacts::{append_task_log, TaskLogEntry};
use crate::driver::SessionDriver;
use crate::events::OrchestratorEvent;
use crate::plan::ImplementationPlan;
use crate::prompts;
use crate::qa::{QaLoop, QaPolicy};
use crate::roles::{AgentRole, Phase};
use crate::session::{SessionOutcome, SessionTemplate};

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub success: bool,
    pub total_iterations: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub stuck_subtasks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BuildPolicy {
    pub max_phase_retries: u32,
    pub max_subtask_retries: u32,
    pub auto_continue_delay_ms: u64,
    pub qa: QaPolicy,
}

impl Default for BuildPolicy {
    fn default() -> Self {
        Self {
            max_phase_retries: 2,
            max_subtask_retries: 3,
            auto_continue_delay_ms: 1000,
            qa: QaPolicy::default(),
        }
    }
}

impl From<&cadre_config::Config> for BuildPolicy {
    fn from(config: &cadre_config::Config) -> Self {
        Self {
            max_phase_retries: config.build.max_phase_retries,
            max_subtask_retries: config.build.max_subtask_retries,
            auto_continue_delay_ms: config.build.auto_continue_delay_ms,
            qa: QaPolicy::from(&config.qa),
        }
    }
}

/// Pipelines planning → coding → QA for one specification. At most one
/// session is in flight at a time; the spec directory is the sole
/// authoritative state between phases, so rerunning against the same
/// directory resumes from the existing plan.
///
/// `rate_limited` and `auth_failure` outcomes surface to the caller
/// without any sleeping here; upstream owns backoff.
pub struct BuildOrchestrator {
    driver: Arc<dyn SessionDriver>,
    template: SessionTemplate,
    policy: BuildPolicy,
    task_description: String,
    events: broadcast::Sender<OrchestratorEvent>,
    cancel: CancellationToken,
}

impl BuildOrchestrator {
    pub fn new(
        driver: Arc<dyn SessionDriver>,
        template: SessionTemplate,
        policy: BuildPolicy,
        task_description: String,
        events: broadcast::Sender<OrchestratorEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            driver,
            template,
            policy,
            task_description,
            events,
            cancel,
        }
    }

    pub fn events(&self) -> broadcast::Sender<OrchestratorEvent> {
        self.events.clone()
    }

    pub async fn run(&self) -> BuildOutcome {
        let start = Instant::now();

        self.phase_change(Phase::Planning);
        if let Err(error) = self.run_planning().await {
            return self.complete(start, false, 0, vec![], Some(error));
        }

        self.phase_change(Phase::Coding);
        let iteration = match self.run_coding().await {
            Ok(outcome) => outcome,
            Err(e) => {
                return self.complete(start, false, 0, vec![], Some(e.to_string()));
            }
        };
        if iteration.cancelled {
            return self.complete(
                start,
                false,
                0,
                iteration.stuck,
                Some("Cancelled".to_string()),
            );
        }
        if let Some(outcome) = iteration.interrupted {
            return self.complete(
                start,
                false,
                0,
                iteration.stuck,
                Some(format!("coding interrupted: {outcome}")),
            );
        }

        self.phase_change(Phase::Qa);
        let qa = QaLoop::new(
            self.driver.clone(),
            self.template.clone(),
            self.policy.qa.clone(),
            self.events.clone(),
            self.cancel.clone(),
        );
        let qa_outcome = qa.run().await;

        self.complete(
            start,
            qa_outcome.approved,
            qa_outcome.total_iterations,
            iteration.stuck,
            qa_outcome.error,
        )
    }

    /// Planning succeeds when a well-formed plan file exists afterwards.
    /// An existing well-formed plan short-circuits (resume semantics).
    async fn run_planning(&self) -> Result<(), String> {
        if let Ok(Some(plan)) = ImplementationPlan::load(&self.template.spec_dir) {
            if plan.is_well_formed() {
                self.log("resuming from existing implementation plan".to_string());
                return Ok(());
            }
        }

        for attempt in 1..=self.policy.max_phase_retries + 1 {
            if self.cancel.is_cancelled() {
                return Err("Cancelled".to_string());
            }
            self.log(format!("planning attempt {attempt}"));

            let config = self.template.config_for(
                AgentRole::Planner,
                Phase::Planning,
                prompts::planner_kickoff(&self.task_description),
            );
            match self.driver.run(config).await {
                Ok(result) => match result.outcome {
                    SessionOutcome::Cancelled => return Err("Cancelled".to_string()),
                    SessionOutcome::AuthFailure => {
                        return Err("planning failed: auth_failure".to_string());
                    }
                    _ => {}
                },
                Err(e) => {
                    self.log(format!("planner session failed: {e}"));
                }
            }

            match ImplementationPlan::load(&self.template.spec_dir) {
                Ok(Some(plan)) if plan.is_well_formed() => {
                    let _ = append_task_log(
                        &self.template.spec_dir,
                        TaskLogEntry::new("planning", "plan produced"),
                    );
                    return Ok(());
                }
                Ok(_) => self.log(format!("attempt {attempt}: no well-formed plan produced")),
                Err(e) => self.log(format!("attempt {attempt}: plan unreadable: {e}")),
            }
        }

        Err(format!(
            "planning failed after {} attempts",
            self.policy.max_phase_retries + 1
        ))
    }

    async fn run_coding(&self) -> anyhow::Result<IterationOutcome> {
        let iterator = SubtaskIterator::new(
            self.driver.clone(),
            self.template.clone(),
            self.policy.max_subtask_retries,
            self.policy.auto_continue_delay_ms,
            self.events.clone(),
            self.cancel.clone(),
        );
        iterator.run().await
    }

    fn phase_change(&self, phase: Phase) {
        let _ = append_task_log(
            &self.template.spec_dir,
            TaskLogEntry::new(phase.to_string(), "phase started"),
        );
        let _ = self.events.send(OrchestratorEvent::PhaseChange { phase });
    }

    fn log(&self, message: String) {
        tracing::debug!("{message}");
        let _ = self.events.send(OrchestratorEvent::Log { message });
    }

    fn complete(
        &self,
        start: Instant,
        success: bool,
        total_iterations: u32,
        stuck_subtasks: Vec<String>,
        error: Option<String>,
    ) -> BuildOutcome {
        let duration_ms = start.elapsed().as_millis() as u64;
        let _ = self.events.send(OrchestratorEvent::Complete {
            success,
            total_iterations,
            duration_ms,
            error: error.clone(),
        });
        BuildOutcome {
            success,
            total_iterations,
            duration_ms,
            error,
            stuck_subtasks,
        }
    }
}
