//! Folding an orchestrator event stream back into history messages.

use crate::normalized::NormalizedEvent;

use super::{Message, MessageRole, ToolCall, ToolCallFunction};

/// Accumulates [`NormalizedEvent`]s into the messages a turn adds to history.
///
/// Text that precedes a batch of tool calls is attached to the assistant
/// message carrying those calls; text after the last tool result becomes the
/// final assistant reply.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    text: String,
    pending_calls: Vec<ToolCall>,
    error: Option<String>,
    done: bool,
}

impl Transcript {
    /// Feed one event.
    pub fn record(&mut self, event: &NormalizedEvent) {
        match event {
            NormalizedEvent::MessageDelta { text } => self.text.push_str(text),
            NormalizedEvent::ToolCallComplete {
                id,
                name,
                arguments_json,
                ..
            } => self.pending_calls.push(ToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: ToolCallFunction {
                    name: name.clone(),
                    arguments: arguments_json.clone(),
                },
            }),
            NormalizedEvent::ToolResult { id, content, .. } => {
                if !self.pending_calls.is_empty() {
                    self.messages.push(Message {
                        role: MessageRole::Assistant,
                        content: std::mem::take(&mut self.text),
                        tool_call_id: None,
                        tool_calls: Some(std::mem::take(&mut self.pending_calls)),
                    });
                }
                self.messages.push(Message {
                    role: MessageRole::Tool,
                    content: content.clone(),
                    tool_call_id: Some(id.clone()),
                    tool_calls: None,
                });
            }
            NormalizedEvent::Error { message, .. } => self.error = Some(message.clone()),
            NormalizedEvent::Done => {
                // Calls that never produced results were not executed.
                self.pending_calls.clear();
                if !self.text.is_empty() {
                    let text = std::mem::take(&mut self.text);
                    self.messages.push(Message::text(MessageRole::Assistant, text));
                }
                self.done = true;
            }
            NormalizedEvent::StreamStart { .. } | NormalizedEvent::ToolCallDelta { .. } => {}
        }
    }

    /// Error reported by the stream, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether a `Done` event was seen.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Messages recorded so far.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Text of the final assistant message, or empty when the model only
    /// called tools.
    #[must_use]
    pub fn reply(&self) -> &str {
        self.messages
            .last()
            .filter(|m| m.role == MessageRole::Assistant && m.tool_calls.is_none())
            .map_or("", |m| m.content.as_str())
    }

    /// Consume the transcript, returning its messages.
    #[must_use]
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> NormalizedEvent {
        NormalizedEvent::MessageDelta {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_plain_reply() {
        let mut t = Transcript::default();
        t.record(&delta("Hel"));
        t.record(&delta("lo"));
        t.record(&NormalizedEvent::Done);
        assert!(t.is_done());
        assert_eq!(t.reply(), "Hello");
        assert_eq!(t.messages().len(), 1);
    }

    #[test]
    fn test_tool_round_trip_shape() {
        let mut t = Transcript::default();
        t.record(&delta("Let me check."));
        t.record(&NormalizedEvent::ToolCallComplete {
            call_index: 0,
            id: "call_1".to_string(),
            name: "countRows".to_string(),
            arguments_json: "{}".to_string(),
        });
        t.record(&NormalizedEvent::ToolResult {
            id: "call_1".to_string(),
            name: "countRows".to_string(),
            content: "3".to_string(),
            success: true,
        });
        t.record(&delta("There are 3 rows."));
        t.record(&NormalizedEvent::Done);

        let messages = t.into_messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "Let me check.");
        assert_eq!(messages[0].tool_calls.as_ref().unwrap()[0].id, "call_1");
        assert_eq!(messages[1].role, MessageRole::Tool);
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[2].content, "There are 3 rows.");
    }

    #[test]
    fn test_error_recorded() {
        let mut t = Transcript::default();
        t.record(&NormalizedEvent::Error {
            message: "boom".to_string(),
            code: None,
        });
        assert_eq!(t.error(), Some("boom"));
        assert_eq!(t.reply(), "");
    }
}
