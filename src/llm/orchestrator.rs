//! LLM orchestrator with tool loop execution.
//!
//! The orchestrator manages the complete lifecycle of an LLM interaction:
//! 1. Send the conversation to the LLM
//! 2. Stream the response, detecting tool calls
//! 3. Execute tool calls against the request's [`ToolRegistry`]
//! 4. Feed tool results back to the LLM
//! 5. Repeat until the model produces a final response
//!
//! # Example
//!
//! ```rust,ignore
//! use csv_analyst::llm::{Orchestrator, Message, MessageRole};
//! use csv_analyst::tools::ToolRegistry;
//!
//! let orchestrator = Orchestrator::new(settings);
//! let history = vec![Message::text(MessageRole::User, "What is the mean price?")];
//! let transcript = orchestrator.complete(history, ToolRegistry::for_dataset(table)).await?;
//! println!("{}", transcript.reply());
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use uuid::Uuid;

use crate::normalized::NormalizedEvent;
use crate::tools::ToolRegistry;

use super::{
    ChatCompletionsDriver, LlmDriver, LlmRequest, LlmSettings, Message, ToolCall, ToolCallFunction,
    Transcript,
};

/// Maximum number of tool loop iterations to prevent infinite loops.
const MAX_TOOL_ITERATIONS: usize = 10;

/// Accumulated state for a streaming tool call.
#[derive(Debug, Default, Clone)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// LLM orchestrator with tool loop execution.
///
/// The orchestrator wraps an [`LlmDriver`] and adds:
/// - Tool call detection and accumulation
/// - Tool execution via a per-request [`ToolRegistry`]
/// - Automatic tool result feeding
/// - Request ID tracking
#[derive(Clone)]
pub struct Orchestrator {
    settings: LlmSettings,
    driver: Arc<dyn LlmDriver>,
}

#[allow(clippy::missing_fields_in_debug)]
impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .finish()
    }
}

impl Orchestrator {
    /// Create an orchestrator talking to the Chat Completions API.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        let driver: Arc<dyn LlmDriver> = Arc::new(ChatCompletionsDriver::new(settings.clone()));
        Self { settings, driver }
    }

    /// Create an orchestrator over an existing driver.
    #[must_use]
    pub fn with_driver(settings: LlmSettings, driver: Arc<dyn LlmDriver>) -> Self {
        Self { settings, driver }
    }

    /// Get the LLM settings.
    #[must_use]
    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    /// Start a chat interaction with existing message history.
    ///
    /// Returns a stream of [`NormalizedEvent`]s that includes:
    /// - `StreamStart` with a unique request ID
    /// - `MessageDelta` for assistant text
    /// - `ToolCallDelta` and `ToolCallComplete` for tool calls
    /// - `ToolResult` after tool execution
    /// - `Done` when complete, or `Error` on failure
    #[allow(clippy::too_many_lines)]
    pub fn chat_with_history(
        &self,
        messages: Vec<Message>,
        tools: ToolRegistry,
    ) -> impl Stream<Item = NormalizedEvent> + Send + use<> {
        let request_id = Uuid::new_v4().to_string();
        let tool_defs = tools.openai_tools_json();

        tracing::info!(
            request_id = %request_id,
            message_count = messages.len(),
            tool_count = tool_defs.len(),
            "Starting orchestrator chat"
        );

        let driver = Arc::clone(&self.driver);

        async_stream::stream! {
            yield NormalizedEvent::StreamStart {
                request_id: request_id.clone(),
            };

            let mut message_json: Vec<serde_json::Value> = messages
                .iter()
                .map(|m| serde_json::to_value(m).unwrap_or_default())
                .collect();

            let mut iteration = 0;

            loop {
                if iteration >= MAX_TOOL_ITERATIONS {
                    tracing::error!(
                        request_id = %request_id,
                        max_iterations = MAX_TOOL_ITERATIONS,
                        "Maximum tool loop iterations exceeded"
                    );
                    yield NormalizedEvent::Error {
                        message: "Maximum tool loop iterations exceeded".to_string(),
                        code: Some("MAX_ITERATIONS".to_string()),
                    };
                    break;
                }
                iteration += 1;

                tracing::debug!(
                    request_id = %request_id,
                    iteration = iteration,
                    message_count = message_json.len(),
                    "Starting tool loop iteration"
                );

                let req = LlmRequest {
                    messages: message_json.clone(),
                    tools: tool_defs.clone(),
                };

                let driver_stream = match driver.stream(req).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(
                            request_id = %request_id,
                            iteration = iteration,
                            error = %e,
                            "Failed to create driver stream"
                        );
                        yield NormalizedEvent::Error {
                            message: e.to_string(),
                            code: None,
                        };
                        break;
                    }
                };

                let mut tool_accumulators: BTreeMap<usize, ToolCallAccumulator> = BTreeMap::new();
                let mut assistant_text = String::new();
                let mut has_tool_calls = false;
                let mut finish_reason: Option<String> = None;

                futures::pin_mut!(driver_stream);

                while let Some(result) = driver_stream.next().await {
                    match result {
                        Ok(event) => {
                            match &event {
                                NormalizedEvent::MessageDelta { text } => {
                                    assistant_text.push_str(text);
                                }
                                NormalizedEvent::ToolCallDelta {
                                    call_index,
                                    id,
                                    name,
                                    arguments_delta,
                                } => {
                                    has_tool_calls = true;
                                    let acc = tool_accumulators.entry(*call_index).or_default();
                                    if acc.id.is_none() {
                                        acc.id.clone_from(id);
                                    }
                                    if acc.name.is_none() {
                                        acc.name.clone_from(name);
                                    }
                                    if let Some(delta) = arguments_delta {
                                        acc.arguments.push_str(delta);
                                    }
                                }
                                NormalizedEvent::ToolCallComplete { call_index, id, name, arguments_json } => {
                                    has_tool_calls = true;
                                    finish_reason = Some("tool_calls".to_string());
                                    // Complete events are authoritative over accumulated deltas.
                                    let acc = tool_accumulators.entry(*call_index).or_default();
                                    acc.id = Some(id.clone());
                                    acc.name = Some(name.clone());
                                    acc.arguments.clone_from(arguments_json);
                                }
                                NormalizedEvent::Done => {
                                    // Don't yield Done yet if we have tool calls to process
                                    if !has_tool_calls {
                                        yield event;
                                        return;
                                    }
                                    continue;
                                }
                                NormalizedEvent::Error { .. } => {
                                    yield event;
                                    return;
                                }
                                _ => {}
                            }
                            yield event;
                        }
                        Err(e) => {
                            yield NormalizedEvent::Error {
                                message: e.to_string(),
                                code: None,
                            };
                            return;
                        }
                    }
                }

                if !has_tool_calls || finish_reason.as_deref() != Some("tool_calls") {
                    tracing::info!(
                        request_id = %request_id,
                        iteration = iteration,
                        has_tool_calls = has_tool_calls,
                        "No tool calls to process, completing stream"
                    );
                    yield NormalizedEvent::Done;
                    break;
                }

                let tool_calls: Vec<ToolCall> = tool_accumulators
                    .values()
                    .filter_map(|acc| {
                        let id = acc.id.clone()?;
                        let name = acc.name.clone()?;
                        Some(ToolCall {
                            id,
                            call_type: "function".to_string(),
                            function: ToolCallFunction {
                                name,
                                arguments: acc.arguments.clone(),
                            },
                        })
                    })
                    .collect();

                if tool_calls.is_empty() {
                    tracing::warn!(
                        request_id = %request_id,
                        iteration = iteration,
                        "No valid tool calls built from accumulators"
                    );
                    yield NormalizedEvent::Done;
                    break;
                }

                // Add assistant message with tool calls to history
                message_json.push(serde_json::json!({
                    "role": "assistant",
                    "content": if assistant_text.is_empty() { serde_json::Value::Null } else { serde_json::Value::String(assistant_text.clone()) },
                    "tool_calls": tool_calls,
                }));

                for tool_call in &tool_calls {
                    let tool_name = &tool_call.function.name;
                    let arguments: serde_json::Value = serde_json::from_str(&tool_call.function.arguments)
                        .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

                    tracing::info!(
                        request_id = %request_id,
                        iteration = iteration,
                        tool_id = %tool_call.id,
                        tool_name = %tool_name,
                        "Executing tool call"
                    );

                    let (content, success) = match tools.call_tool(tool_name, arguments).await {
                        Ok(serde_json::Value::String(text)) => (text, true),
                        Ok(result) => (result.to_string(), true),
                        Err(e) => {
                            tracing::warn!(
                                request_id = %request_id,
                                tool_id = %tool_call.id,
                                tool_name = %tool_name,
                                error = %e,
                                "Tool call failed"
                            );
                            (format!("Error: {e}"), false)
                        }
                    };

                    tracing::debug!(
                        request_id = %request_id,
                        tool_id = %tool_call.id,
                        result = %content,
                        "Tool call result"
                    );

                    yield NormalizedEvent::ToolResult {
                        id: tool_call.id.clone(),
                        name: tool_name.clone(),
                        content: content.clone(),
                        success,
                    };

                    message_json.push(serde_json::json!({
                        "role": "tool",
                        "tool_call_id": tool_call.id,
                        "content": content
                    }));
                }
            }
        }
    }

    /// Run the tool loop to completion and collect the new history messages.
    ///
    /// Fails if the stream reports an error; nothing is returned in that case.
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        tools: ToolRegistry,
    ) -> anyhow::Result<Transcript> {
        let stream = self.chat_with_history(messages, tools);
        futures::pin_mut!(stream);

        let mut transcript = Transcript::default();
        while let Some(event) = stream.next().await {
            transcript.record(&event);
        }

        if let Some(message) = transcript.error() {
            return Err(anyhow::anyhow!("{message}"));
        }
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::analysis::CsvTable;
    use crate::llm::{EventStream, MessageRole, Provider};

    /// Driver that replays one scripted response per request.
    struct ScriptedDriver {
        turns: Mutex<VecDeque<Vec<NormalizedEvent>>>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedDriver {
        fn new(turns: Vec<Vec<NormalizedEvent>>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmDriver for ScriptedDriver {
        async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream> {
            self.requests.lock().unwrap().push(req);
            let events = self
                .turns
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no scripted turn left"))?;
            Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
        }
    }

    fn settings() -> LlmSettings {
        LlmSettings {
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            model: "test".to_string(),
            provider: Provider::Ollama,
            parallel_tool_calls: None,
        }
    }

    fn tools() -> ToolRegistry {
        let table = CsvTable::parse("region,units\nnorth,10\nsouth,4\n").unwrap();
        ToolRegistry::for_dataset(Arc::new(table))
    }

    fn text(t: &str) -> NormalizedEvent {
        NormalizedEvent::MessageDelta {
            text: t.to_string(),
        }
    }

    fn call(id: &str, name: &str, args: &str) -> NormalizedEvent {
        NormalizedEvent::ToolCallComplete {
            call_index: 0,
            id: id.to_string(),
            name: name.to_string(),
            arguments_json: args.to_string(),
        }
    }

    #[tokio::test]
    async fn test_plain_answer() {
        let driver = ScriptedDriver::new(vec![vec![text("Hi"), NormalizedEvent::Done]]);
        let orchestrator = Orchestrator::with_driver(settings(), driver.clone());

        let transcript = orchestrator
            .complete(vec![Message::text(MessageRole::User, "hello")], tools())
            .await
            .unwrap();

        assert_eq!(transcript.reply(), "Hi");
        let requests = driver.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tools.len(), tools().len());
    }

    #[tokio::test]
    async fn test_tool_loop_feeds_results_back() {
        let driver = ScriptedDriver::new(vec![
            vec![call("call_1", "calculateMean", r#"{"colName":"units"}"#), NormalizedEvent::Done],
            vec![text("The mean is 7."), NormalizedEvent::Done],
        ]);
        let orchestrator = Orchestrator::with_driver(settings(), driver.clone());

        let transcript = orchestrator
            .complete(vec![Message::text(MessageRole::User, "mean units?")], tools())
            .await
            .unwrap();

        assert_eq!(transcript.reply(), "The mean is 7.");
        let messages = transcript.messages();
        assert_eq!(messages[1].role, MessageRole::Tool);
        assert_eq!(messages[1].content, "7.0");

        let requests = driver.requests.lock().unwrap();
        let second = &requests[1].messages;
        assert_eq!(second.len(), 3);
        assert_eq!(second[1]["tool_calls"][0]["function"]["name"], "calculateMean");
        assert_eq!(second[2]["role"], "tool");
        assert_eq!(second[2]["content"], "7.0");
    }

    #[tokio::test]
    async fn test_unknown_tool_reports_error_to_model() {
        let driver = ScriptedDriver::new(vec![
            vec![call("call_1", "plotChart", "{}"), NormalizedEvent::Done],
            vec![text("Sorry."), NormalizedEvent::Done],
        ]);
        let orchestrator = Orchestrator::with_driver(settings(), driver);

        let events: Vec<NormalizedEvent> = orchestrator
            .chat_with_history(vec![Message::text(MessageRole::User, "chart")], tools())
            .collect()
            .await;

        let failed = events.iter().any(|e| {
            matches!(e, NormalizedEvent::ToolResult { success: false, content, .. } if content.contains("unknown tool"))
        });
        assert!(failed);
        assert!(matches!(events.last(), Some(NormalizedEvent::Done)));
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let turns = (0..MAX_TOOL_ITERATIONS)
            .map(|i| vec![call(&format!("call_{i}"), "countRows", "{}"), NormalizedEvent::Done])
            .collect();
        let orchestrator = Orchestrator::with_driver(settings(), ScriptedDriver::new(turns));

        let err = orchestrator
            .complete(vec![Message::text(MessageRole::User, "loop")], tools())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Maximum tool loop iterations"));
    }

    #[tokio::test]
    async fn test_driver_failure_is_error() {
        let orchestrator = Orchestrator::with_driver(settings(), ScriptedDriver::new(Vec::new()));
        let result = orchestrator
            .complete(vec![Message::text(MessageRole::User, "hi")], tools())
            .await;
        assert!(result.is_err());
    }
}
