pub mod complexity;

pub use complexity::{Complexity, ComplexityAssessment};

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::driver::SessionDriver;
use crate::events::OrchestratorEvent;
use crate::prompts;
use crate::roles::{AgentRole, Phase};
use crate::session::{SessionOutcome, SessionTemplate};

/// Stages of specification development. The executed sequence is adaptive:
/// a fixed prefix, one assessment, then a tier-specific tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecPhase {
    Discovery,
    Requirements,
    ComplexityAssessment,
    Research,
    Context,
    QuickSpec,
    SpecWriting,
    SelfCritique,
    Planning,
    Validation,
}

impl SpecPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecPhase::Discovery => "discovery",
            SpecPhase::Requirements => "requirements",
            SpecPhase::ComplexityAssessment => "complexity_assessment",
            SpecPhase::Research => "research",
            SpecPhase::Context => "context",
            SpecPhase::QuickSpec => "quick_spec",
            SpecPhase::SpecWriting => "spec_writing",
            SpecPhase::SelfCritique => "self_critique",
            SpecPhase::Planning => "planning",
            SpecPhase::Validation => "validation",
        }
    }

    fn role(&self) -> AgentRole {
        match self {
            SpecPhase::Discovery => AgentRole::SpecDiscovery,
            SpecPhase::Requirements => AgentRole::SpecGatherer,
            SpecPhase::ComplexityAssessment => AgentRole::SpecGatherer,
            SpecPhase::Research => AgentRole::SpecResearcher,
            SpecPhase::Context => AgentRole::SpecContext,
            SpecPhase::QuickSpec => AgentRole::SpecWriter,
            SpecPhase::SpecWriting => AgentRole::SpecWriter,
            SpecPhase::SelfCritique => AgentRole::SpecCritic,
            SpecPhase::Planning => AgentRole::Planner,
            SpecPhase::Validation => AgentRole::SpecValidation,
        }
    }
}

impl std::fmt::Display for SpecPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SpecOutcome {
    pub success: bool,
    pub complexity: Option<Complexity>,
    pub phases_executed: Vec<SpecPhase>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub cancelled: bool,
}

enum PhaseStatus {
    Done,
    Cancelled,
    Failed(String),
}

/// Complexity-adaptive spec pipeline. Discovery and requirements always
/// run before the single assessment; the remaining sequence is chosen per
/// tier, with assessment flags able to insert `research` before `context`
/// and `self_critique` before `planning`.
pub struct SpecOrchestrator {
    driver: Arc<dyn SessionDriver>,
    template: SessionTemplate,
    max_phase_retries: u32,
    task_description: String,
    events: broadcast::Sender<OrchestratorEvent>,
    cancel: CancellationToken,
}

fn tail_for(tier: Complexity) -> Vec<SpecPhase> {
    match tier {
        Complexity::Simple => vec![SpecPhase::QuickSpec, SpecPhase::Validation],
        Complexity::Standard => vec![
            SpecPhase::Context,
            SpecPhase::SpecWriting,
            SpecPhase::Planning,
            SpecPhase::Validation,
        ],
        Complexity::Complex => vec![
            SpecPhase::Research,
            SpecPhase::Context,
            SpecPhase::SpecWriting,
            SpecPhase::SelfCritique,
            SpecPhase::Planning,
            SpecPhase::Validation,
        ],
    }
}

fn apply_flags(mut tail: Vec<SpecPhase>, assessment: &ComplexityAssessment) -> Vec<SpecPhase> {
    if assessment.needs_research == Some(true) && !tail.contains(&SpecPhase::Research) {
        let at = tail
            .iter()
            .position(|p| *p == SpecPhase::Context)
            .unwrap_or(0);
        tail.insert(at, SpecPhase::Research);
    }
    if assessment.needs_self_critique == Some(true) && !tail.contains(&SpecPhase::SelfCritique) {
        let at = tail
            .iter()
            .position(|p| *p == SpecPhase::Planning)
            .unwrap_or(tail.len());
        tail.insert(at, SpecPhase::SelfCritique);
    }
    tail
}

impl SpecOrchestrator {
    pub fn new(
        driver: Arc<dyn SessionDriver>,
        template: SessionTemplate,
        max_phase_retries: u32,
        task_description: String,
        events: broadcast::Sender<OrchestratorEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            driver,
            template,
            max_phase_retries,
            task_description,
            events,
            cancel,
        }
    }

    pub async fn run(&self) -> SpecOutcome {
        let start = Instant::now();
        let mut executed: Vec<SpecPhase> = Vec::new();

        // Fixed prefix, then the one assessment per pipeline.
        for phase in [
            SpecPhase::Discovery,
            SpecPhase::Requirements,
            SpecPhase::ComplexityAssessment,
        ] {
            match self.run_phase(phase).await {
                PhaseStatus::Done => executed.push(phase),
                PhaseStatus::Cancelled => {
                    return self.outcome(start, false, None, executed, true, Some("Cancelled"));
                }
                PhaseStatus::Failed(e) => {
                    return self.outcome(start, false, None, executed, false, Some(&e));
                }
            }
        }

        let assessment = ComplexityAssessment::load(&self.template.spec_dir);
        let tier = assessment.complexity;
        self.log(format!(
            "complexity assessed as {tier} (confidence {:.2})",
            assessment.confidence
        ));

        for phase in apply_flags(tail_for(tier), &assessment) {
            match self.run_phase(phase).await {
                PhaseStatus::Done => executed.push(phase),
                PhaseStatus::Cancelled => {
                    return self.outcome(
                        start,
                        false,
                        Some(tier),
                        executed,
                        true,
                        Some("Cancelled"),
                    );
                }
                PhaseStatus::Failed(e) => {
                    return self.outcome(start, false, Some(tier), executed, false, Some(&e));
                }
            }
        }

        self.outcome(start, true, Some(tier), executed, false, None)
    }

    /// One phase, attempted up to `max_phase_retries + 1` times.
    /// completed/max_steps succeed; cancelled and auth_failure end the
    /// pipeline; everything else retries.
    async fn run_phase(&self, phase: SpecPhase) -> PhaseStatus {
        for attempt in 1..=self.max_phase_retries + 1 {
            if self.cancel.is_cancelled() {
                return PhaseStatus::Cancelled;
            }
            self.log(format!("spec phase {phase} attempt {attempt}"));

            let config = self.template.config_for(
                phase.role(),
                Phase::Spec,
                prompts::spec_phase_kickoff(phase.as_str(), &self.task_description),
            );
            match self.driver.run(config).await {
                Ok(result) => match result.outcome {
                    outcome if outcome.is_success() => return PhaseStatus::Done,
                    SessionOutcome::Cancelled => return PhaseStatus::Cancelled,
                    SessionOutcome::AuthFailure => {
                        return PhaseStatus::Failed(format!("{phase} failed: auth_failure"));
                    }
                    outcome => {
                        self.log(format!("{phase} attempt {attempt} ended with {outcome}"));
                    }
                },
                Err(e) => {
                    self.log(format!("{phase} attempt {attempt} failed: {e}"));
                }
            }
        }
        PhaseStatus::Failed(format!(
            "{phase} failed after {} attempts",
            self.max_phase_retries + 1
        ))
    }

    fn log(&self, message: String) {
        tracing::debug!("{message}");
        let _ = self.events.send(OrchestratorEvent::Log { message });
    }

    #[allow(clippy::too_many_arguments)]
    fn outcome(
        &self,
        start: Instant,
        success: bool,
        complexity: Option<Complexity>,
        phases_executed: Vec<SpecPhase>,
        cancelled: bool,
        error: Option<&str>,
    ) -> SpecOutcome {
        let duration_ms = start.elapsed().as_millis() as u64;
        let _ = self.events.send(OrchestratorEvent::Complete {
            success,
            total_iterations: phases_executed.len() as u32,
            duration_ms,
            error: error.map(|e| e.to_string()),
        });
        SpecOutcome {
            success,
            complexity,
            phases_executed,
            duration_ms,
            error: error.map(|e| e.to_string()),
            cancelled,
        }
    }
}
