pub mod report;

pub use report::{
    find_recurring, issue_similarity, normalize_title, parse_report, QaIssue, QaIterationRecord,
    QaReport, QaStatus,
};

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::artifacts::{
    append_task_log, atomic_write, TaskLogEntry, MANUAL_TEST_PLAN_FILE, QA_ESCALATION_FILE,
    QA_FIX_REQUEST_FILE, QA_REPORT_FILE,
};
use crate::driver::SessionDriver;
use crate::events::OrchestratorEvent;
use crate::prompts;
use crate::roles::{AgentRole, Phase};
use crate::session::{SessionOutcome, SessionTemplate};

/// Policy knobs for the review/fix loop. The defaults are the engine's
/// long-standing constants; callers may override them.
#[derive(Debug, Clone)]
pub struct QaPolicy {
    pub max_iterations: u32,
    pub recurring_threshold: u32,
    pub similarity_threshold: f64,
}

impl Default for QaPolicy {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            recurring_threshold: 3,
            similarity_threshold: 0.8,
        }
    }
}

impl From<&cadre_config::QaSettings> for QaPolicy {
    fn from(settings: &cadre_config::QaSettings) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            recurring_threshold: settings.recurring_threshold,
            similarity_threshold: settings.similarity_threshold,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QaOutcome {
    pub approved: bool,
    pub total_iterations: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Iterated review → fix cycle. Runs a reviewer session each iteration;
/// on rejection, checks for recurring issues (escalating if found) and
/// runs a fixer session keyed to the report. Session errors count as an
/// iteration; only cancellation aborts the loop.
pub struct QaLoop {
    driver: Arc<dyn SessionDriver>,
    template: SessionTemplate,
    policy: QaPolicy,
    events: broadcast::Sender<OrchestratorEvent>,
    cancel: CancellationToken,
}

impl QaLoop {
    pub fn new(
        driver: Arc<dyn SessionDriver>,
        template: SessionTemplate,
        policy: QaPolicy,
        events: broadcast::Sender<OrchestratorEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            driver,
            template,
            policy,
            events,
            cancel,
        }
    }

    pub async fn run(&self) -> QaOutcome {
        let start = Instant::now();
        let mut history: Vec<QaIterationRecord> = Vec::new();

        if !has_test_framework(&self.template.project_dir) {
            if let Err(e) = write_manual_test_plan(&self.template.spec_dir) {
                tracing::warn!("failed to write manual test plan: {e}");
            }
        }

        for iteration in 1..=self.policy.max_iterations {
            if self.cancel.is_cancelled() {
                return self.finish(false, iteration - 1, start, Some("Cancelled".to_string()));
            }

            let iter_start = Instant::now();
            self.log(format!("qa iteration {iteration}: review"));

            let reviewer_config = self.template.config_for(
                AgentRole::QaReviewer,
                Phase::Qa,
                prompts::qa_reviewer_kickoff(iteration),
            );

            let review = self.driver.run(reviewer_config).await;
            if matches!(&review, Ok(r) if r.outcome == SessionOutcome::Cancelled) {
                return self.finish(false, iteration, start, Some("Cancelled".to_string()));
            }

            let record = match review {
                Ok(result) if result.outcome.is_success() => {
                    match self.read_report() {
                        Ok(report) if report.approved => {
                            history.push(QaIterationRecord {
                                iteration,
                                status: QaStatus::Approved,
                                issues: report.issues,
                                timestamp: Utc::now(),
                                duration_ms: iter_start.elapsed().as_millis() as u64,
                            });
                            let _ = append_task_log(
                                &self.template.spec_dir,
                                TaskLogEntry::new("qa", format!("approved at iteration {iteration}")),
                            );
                            return self.finish(true, iteration, start, None);
                        }
                        Ok(report) => QaIterationRecord {
                            iteration,
                            status: QaStatus::Rejected,
                            issues: report.issues,
                            timestamp: Utc::now(),
                            duration_ms: iter_start.elapsed().as_millis() as u64,
                        },
                        Err(e) => {
                            self.log(format!("qa iteration {iteration}: report parse failed: {e}"));
                            QaIterationRecord {
                                iteration,
                                status: QaStatus::Error,
                                issues: vec![],
                                timestamp: Utc::now(),
                                duration_ms: iter_start.elapsed().as_millis() as u64,
                            }
                        }
                    }
                }
                Ok(result) => {
                    self.log(format!(
                        "qa iteration {iteration}: reviewer session ended with {}",
                        result.outcome
                    ));
                    QaIterationRecord {
                        iteration,
                        status: QaStatus::Error,
                        issues: vec![],
                        timestamp: Utc::now(),
                        duration_ms: iter_start.elapsed().as_millis() as u64,
                    }
                }
                Err(e) => {
                    self.log(format!("qa iteration {iteration}: reviewer failed: {e}"));
                    QaIterationRecord {
                        iteration,
                        status: QaStatus::Error,
                        issues: vec![],
                        timestamp: Utc::now(),
                        duration_ms: iter_start.elapsed().as_millis() as u64,
                    }
                }
            };

            let _ = append_task_log(
                &self.template.spec_dir,
                TaskLogEntry::new(
                    "qa",
                    format!(
                        "iteration {iteration}: {:?}, {} issue(s)",
                        record.status,
                        record.issues.len()
                    ),
                ),
            );
            let rejected = record.status == QaStatus::Rejected;
            history.push(record);

            if rejected {
                let recurring = find_recurring(
                    &history,
                    self.policy.similarity_threshold,
                    self.policy.recurring_threshold,
                );
                if !recurring.is_empty() {
                    if let Err(e) =
                        write_escalation(&self.template.spec_dir, &recurring, &history)
                    {
                        tracing::warn!("failed to write escalation report: {e}");
                    }
                    return self.finish(
                        false,
                        iteration,
                        start,
                        Some("Recurring issues escalated to human review".to_string()),
                    );
                }

                self.log(format!("qa iteration {iteration}: fix"));
                let report_text = std::fs::read_to_string(
                    self.template.spec_dir.join(QA_REPORT_FILE),
                )
                .unwrap_or_default();
                let fix_request =
                    std::fs::read_to_string(self.template.spec_dir.join(QA_FIX_REQUEST_FILE)).ok();

                let fixer_config = self.template.config_for(
                    AgentRole::QaFixer,
                    Phase::Qa,
                    prompts::qa_fixer_kickoff(&report_text, fix_request.as_deref()),
                );
                match self.driver.run(fixer_config).await {
                    Ok(result) if result.outcome == SessionOutcome::Cancelled => {
                        return self.finish(false, iteration, start, Some("Cancelled".to_string()));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.log(format!("qa iteration {iteration}: fixer failed: {e}"));
                    }
                }
            }
        }

        self.finish(
            false,
            self.policy.max_iterations,
            start,
            Some("max_iterations".to_string()),
        )
    }

    fn read_report(&self) -> anyhow::Result<QaReport> {
        let content = std::fs::read_to_string(self.template.spec_dir.join(QA_REPORT_FILE))?;
        parse_report(&content)
    }

    fn finish(
        &self,
        approved: bool,
        total_iterations: u32,
        start: Instant,
        error: Option<String>,
    ) -> QaOutcome {
        QaOutcome {
            approved,
            total_iterations,
            duration_ms: start.elapsed().as_millis() as u64,
            error,
        }
    }

    fn log(&self, message: String) {
        tracing::debug!("{message}");
        let _ = self.events.send(OrchestratorEvent::Log { message });
    }
}

const TEST_FRAMEWORK_MARKERS: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "go.mod",
    "pytest.ini",
    "pyproject.toml",
    "setup.py",
    "build.gradle",
    "pom.xml",
    "Gemfile",
];

fn has_test_framework(project_dir: &Path) -> bool {
    TEST_FRAMEWORK_MARKERS
        .iter()
        .any(|marker| project_dir.join(marker).exists())
        || project_dir.join("tests").is_dir()
}

fn write_manual_test_plan(spec_dir: &Path) -> anyhow::Result<()> {
    let path = spec_dir.join(MANUAL_TEST_PLAN_FILE);
    if path.exists() {
        return Ok(());
    }
    let content = "\
# Manual Test Plan

No automated test framework was detected in this project. Verify the
implementation manually:

1. Review each completed subtask in implementation_plan.json against its
   description.
2. Exercise the changed behavior end to end.
3. Record outcomes below before sign-off.

## Results

";
    atomic_write(&path, content.as_bytes())
}

fn write_escalation(
    spec_dir: &Path,
    recurring: &[QaIssue],
    history: &[QaIterationRecord],
) -> anyhow::Result<()> {
    let mut content = String::from(
        "# QA Escalation\n\n\
         The QA loop detected issues that keep recurring after repeated fix\n\
         attempts. Human review is required.\n\n## Recurring issues\n\n",
    );
    for issue in recurring {
        content.push_str(&format!("- {} ({})\n", issue.title, issue.location));
        if let Some(description) = &issue.description {
            content.push_str(&format!("  {description}\n"));
        }
    }
    content.push_str("\n## Iteration history\n\n");
    for record in history {
        content.push_str(&format!(
            "- iteration {}: {:?}, {} issue(s)\n",
            record.iteration,
            record.status,
            record.issues.len()
        ));
    }
    atomic_write(&spec_dir.join(QA_ESCALATION_FILE), content.as_bytes())
}
