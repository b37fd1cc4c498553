use crate::events::{ExecutionProgress, SessionEvent};
use crate::plan::PLAN_FILE;
use crate::roles::Phase;

const MAX_MESSAGE_LEN: usize = 200;

/// Derives user-facing progress from the raw event stream plus
/// orchestrator-emitted phase notes. Emitted as `execution-progress`
/// independent of the stream itself.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    progress: ExecutionProgress,
}

impl ProgressTracker {
    pub fn new(phase: Option<Phase>) -> Self {
        Self {
            progress: ExecutionProgress {
                current_phase: phase,
                ..Default::default()
            },
        }
    }

    pub fn snapshot(&self) -> ExecutionProgress {
        self.progress.clone()
    }

    /// Orchestrator-driven phase transition. The previous phase is recorded
    /// as completed.
    pub fn note_phase(&mut self, phase: Phase) -> ExecutionProgress {
        if let Some(previous) = self.progress.current_phase {
            if previous != phase && !self.progress.completed_phases.contains(&previous) {
                self.progress.completed_phases.push(previous);
            }
        }
        self.progress.current_phase = Some(phase);
        self.progress.current_subtask = None;
        self.snapshot()
    }

    pub fn note_subtask(&mut self, subtask_id: impl Into<String>) -> ExecutionProgress {
        self.progress.current_subtask = Some(subtask_id.into());
        self.snapshot()
    }

    /// Inspect a stream event against the rule set. Returns a progress
    /// update when the event changes the derived state.
    pub fn observe(&mut self, event: &SessionEvent) -> Option<ExecutionProgress> {
        match event {
            SessionEvent::TextDelta { text } => {
                let message = self.progress.current_message.get_or_insert_with(String::new);
                message.push_str(text);
                if let Some(last_line) = message.rsplit('\n').next().map(|s| s.to_string()) {
                    *message = last_line;
                }
                if message.len() > MAX_MESSAGE_LEN {
                    let mut cut = message.len() - MAX_MESSAGE_LEN;
                    while !message.is_char_boundary(cut) {
                        cut += 1;
                    }
                    *message = message[cut..].to_string();
                }
                None
            }
            SessionEvent::ToolCall {
                tool_name,
                arguments,
            } => {
                if is_plan_write(tool_name, arguments)
                    && self.progress.current_phase == Some(Phase::Planning)
                {
                    // The planner persisting its plan marks the phase ending.
                    if !self.progress.completed_phases.contains(&Phase::Planning) {
                        self.progress.completed_phases.push(Phase::Planning);
                    }
                    return Some(self.snapshot());
                }
                None
            }
            SessionEvent::StepFinish => Some(self.snapshot()),
            _ => None,
        }
    }
}

fn is_plan_write(tool_name: &str, arguments: &serde_json::Value) -> bool {
    if tool_name != "write" && tool_name != "edit" {
        return false;
    }
    arguments
        .get("file_path")
        .and_then(|v| v.as_str())
        .is_some_and(|p| p.ends_with(PLAN_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn phase_notes_complete_previous_phase() {
        let mut tracker = ProgressTracker::new(Some(Phase::Planning));
        let progress = tracker.note_phase(Phase::Coding);
        assert_eq!(progress.current_phase, Some(Phase::Coding));
        assert_eq!(progress.completed_phases, vec![Phase::Planning]);
    }

    #[test]
    fn plan_write_marks_planning_ending() {
        let mut tracker = ProgressTracker::new(Some(Phase::Planning));
        let update = tracker.observe(&SessionEvent::ToolCall {
            tool_name: "write".to_string(),
            arguments: json!({ "file_path": "spec/implementation_plan.json", "content": "{}" }),
        });
        let progress = update.expect("plan write should emit progress");
        assert!(progress.completed_phases.contains(&Phase::Planning));
    }

    #[test]
    fn unrelated_writes_do_not_complete_planning() {
        let mut tracker = ProgressTracker::new(Some(Phase::Planning));
        let update = tracker.observe(&SessionEvent::ToolCall {
            tool_name: "write".to_string(),
            arguments: json!({ "file_path": "src/main.rs", "content": "" }),
        });
        assert!(update.is_none());
    }

    #[test]
    fn current_message_tracks_last_line() {
        let mut tracker = ProgressTracker::new(None);
        tracker.observe(&SessionEvent::TextDelta {
            text: "first line\nsecond".to_string(),
        });
        tracker.observe(&SessionEvent::TextDelta {
            text: " half".to_string(),
        });
        assert_eq!(
            tracker.snapshot().current_message.as_deref(),
            Some("second half")
        );
    }
}
