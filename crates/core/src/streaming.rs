use cadre_provider::{StreamEvent, Usage};

/// Accumulates one model step from its stream: final text, tool calls with
/// their argument buffers, and usage.
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    pub text: String,
    pub tool_calls: Vec<AccumulatedToolCall>,
    pub usage: Option<Usage>,
    pub done: bool,
}

#[derive(Debug, Clone)]
pub struct AccumulatedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta(text) => {
                self.text.push_str(text);
            }
            StreamEvent::ToolCallStart { id, name, .. } => {
                self.tool_calls.push(AccumulatedToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: String::new(),
                });
            }
            StreamEvent::ToolCallDelta {
                arguments_delta, ..
            } => {
                if let Some(tc) = self.tool_calls.last_mut() {
                    tc.arguments.push_str(arguments_delta);
                }
            }
            StreamEvent::Usage(usage) => {
                self.usage = Some(*usage);
            }
            StreamEvent::Done => {
                self.done = true;
            }
            _ => {}
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_text_and_tool_calls() {
        let mut acc = StreamAccumulator::new();
        acc.process(&StreamEvent::TextDelta("Hello ".into()));
        acc.process(&StreamEvent::TextDelta("world".into()));
        acc.process(&StreamEvent::ToolCallStart {
            index: 0,
            id: "tc_1".into(),
            name: "bash".into(),
        });
        acc.process(&StreamEvent::ToolCallDelta {
            index: 0,
            arguments_delta: "{\"command\":".into(),
        });
        acc.process(&StreamEvent::ToolCallDelta {
            index: 0,
            arguments_delta: "\"ls\"}".into(),
        });
        acc.process(&StreamEvent::Done);

        assert_eq!(acc.text, "Hello world");
        assert!(acc.has_tool_calls());
        assert_eq!(acc.tool_calls[0].arguments, "{\"command\":\"ls\"}");
        assert!(acc.done);
    }
}
