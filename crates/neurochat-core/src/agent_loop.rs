// Agent loop
//
// The multi-turn streaming engine. One call services one chat request: it
// opens an LLM stream per turn, translates provider events into output
// frames, accumulates parts into the assistant message being built, runs
// tool calls through the dispatcher between turns, and terminates on a
// final text, on max-turns exhaustion, or by suspending on HIL tool calls.
//
// Frames go out through an mpsc sender; when the receiver is dropped (client
// disconnect) the loop exits silently without appending the in-flight
// message, so only parts committed by earlier requests survive.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::agent::Agent;
use crate::context::ToolContext;
use crate::dispatcher::{partition_hil, ToolCallRequest, ToolDispatcher};
use crate::error::Result;
use crate::events::{PendingToolCallAnnotation, StreamFrame, SSE_DONE};
use crate::llm::{ResponseRequest, ResponseStreamEvent, ResponsesClient};
use crate::message::{
    function_call_item, function_call_output_item, history_from_messages, message_item,
    ChatMessage, MessageRole, PartType,
};
use crate::tokens::{consumption_from_tool_usage, consumption_from_usage, ResponseUsage, TaskKind};

/// Instructions used for the forced final turn once max turns are exhausted
const MAX_TURNS_INSTRUCTIONS: &str = "You are a very nice assistant that is unable to further help the user due to rate limiting. The user just reached the maximum amount of turns he can take with you in a single query. Your one and only job is to let him know that in a nice way, and that the only way to continue the conversation is to send another message. Completely disregard his demand since you cannot fulfill it, simply state that he reached the limit.";

/// Loop configuration
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Tool turns before the final text turn is forced
    pub max_turns: usize,
    /// Parallelism cap for non-HIL tool calls
    pub max_parallel_tool_calls: usize,
    /// Model to use instead of the agent's, when the client picked one
    pub model_override: Option<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_parallel_tool_calls: 5,
            model_override: None,
        }
    }
}

/// A tool call accumulated while a turn streams in
#[derive(Debug, Clone)]
struct StreamedToolCall {
    call_id: String,
    name: String,
    arguments: String,
}

/// Per-turn accumulator fed by the stream event handlers
#[derive(Default)]
struct TurnState {
    reasoning: HashMap<String, String>,
    /// Calls in submission order, keyed by server-minted call id
    tool_calls: Vec<StreamedToolCall>,
    /// Provider item id -> server call id
    id_map: HashMap<String, String>,
    usage: Option<ResponseUsage>,
}

impl TurnState {
    fn call_mut(&mut self, item_id: &str) -> Option<&mut StreamedToolCall> {
        let call_id = self.id_map.get(item_id)?.clone();
        self.tool_calls.iter_mut().find(|c| c.call_id == call_id)
    }
}

/// The multi-turn agent streaming engine
pub struct AgentLoop {
    client: Arc<dyn ResponsesClient>,
}

impl AgentLoop {
    pub fn new(client: Arc<dyn ResponsesClient>) -> Self {
        Self { client }
    }

    /// Run the loop for one chat request.
    ///
    /// `conversation` holds the thread's messages with the new user message
    /// last (or, on HIL resume, the reopened assistant message last). On
    /// normal or HIL termination the built assistant message is appended to
    /// `conversation`; on client disconnect it is discarded.
    pub async fn stream(
        &self,
        agent: Agent,
        conversation: &mut Vec<ChatMessage>,
        ctx: &ToolContext,
        config: &LoopConfig,
        tx: &mpsc::Sender<String>,
    ) -> Result<()> {
        let mut active_agent = agent;
        let mut history = history_from_messages(conversation);
        let mut pending: Vec<PendingToolCallAnnotation> = Vec::new();

        let thread_id = ctx.thread_id;
        // New user message: open a fresh assistant message. Otherwise this is
        // a HIL resume and the incomplete assistant message is reopened.
        let mut new_message = match conversation.last() {
            Some(last) if last.role == MessageRole::User => {
                let message = ChatMessage::assistant(thread_id);
                let frame = StreamFrame::Start {
                    message_id: format!("msg_{}", Uuid::new_v4().simple()),
                };
                if !emit(tx, frame).await {
                    return Ok(());
                }
                message
            }
            Some(_) => match conversation.pop() {
                Some(message) => message,
                None => ChatMessage::assistant(thread_id),
            },
            None => ChatMessage::assistant(thread_id),
        };

        let mut turns = 0usize;
        while turns <= config.max_turns {
            let forced_final = turns == config.max_turns;
            let request = self.build_request(&active_agent, &history, config, forced_final);
            let model = request.model.clone();

            let mut stream = self.client.stream_response(request).await?;
            turns += 1;

            let mut turn = TurnState::default();
            while let Some(event) = stream.next().await {
                if !self
                    .handle_event(event?, &mut turn, &mut new_message, &mut history, &active_agent, tx)
                    .await
                {
                    return Ok(());
                }
            }

            new_message.token_consumption.extend(consumption_from_usage(
                turn.usage.as_ref(),
                &model,
                TaskKind::ChatCompletion,
            ));

            if turn.tool_calls.is_empty() {
                // Terminal text reached
                if !emit(tx, StreamFrame::FinishStep).await {
                    return Ok(());
                }
                break;
            }

            let calls: Vec<ToolCallRequest> = turn
                .tool_calls
                .iter()
                .map(|c| ToolCallRequest {
                    call_id: c.call_id.clone(),
                    name: c.name.clone(),
                    arguments: c.arguments.clone(),
                })
                .collect();
            let (to_execute, with_hil) = partition_hil(calls, &active_agent.tools);

            let mut handoff = None;
            if !to_execute.is_empty() {
                let outcome = ToolDispatcher::dispatch(
                    &to_execute,
                    &active_agent.tools,
                    ctx,
                    config.max_parallel_tool_calls,
                )
                .await;
                handoff = outcome.handoff;

                let usage_map = ctx.usage_snapshot();
                for response in &outcome.responses {
                    new_message
                        .token_consumption
                        .extend(consumption_from_tool_usage(&response.call_id, &usage_map));

                    let item = function_call_output_item(
                        &response.call_id,
                        &response.output,
                        response.status.as_str(),
                    );
                    new_message.push_part(PartType::FunctionCallOutput, item.clone());
                    history.push(item);

                    let frame = StreamFrame::ToolOutputAvailable {
                        tool_call_id: response.call_id.clone(),
                        output: response.output.clone(),
                    };
                    if !emit(tx, frame).await {
                        return Ok(());
                    }
                }
            }

            if !emit(tx, StreamFrame::FinishStep).await {
                return Ok(());
            }

            // HIL calls suspend the loop: no outputs, control goes back to
            // the client for validation.
            if !with_hil.is_empty() {
                pending = with_hil
                    .iter()
                    .map(|call| PendingToolCallAnnotation::pending(&call.call_id))
                    .collect();
                if !emit(tx, StreamFrame::FinishStep).await {
                    return Ok(());
                }
                break;
            }

            if let Some(next_agent) = handoff {
                tracing::info!(from = %active_agent.name, to = %next_agent.name, "Agent handoff");
                active_agent = next_agent;
            }
        }

        conversation.push(new_message);

        let finish = if pending.is_empty() {
            StreamFrame::finish()
        } else {
            StreamFrame::finish_with_pending(pending)
        };
        if emit(tx, finish).await {
            let _ = tx.send(SSE_DONE.to_string()).await;
        }
        Ok(())
    }

    fn build_request(
        &self,
        agent: &Agent,
        history: &[Value],
        config: &LoopConfig,
        forced_final: bool,
    ) -> ResponseRequest {
        let model = config
            .model_override
            .clone()
            .unwrap_or_else(|| agent.model.clone());

        if forced_final {
            return ResponseRequest {
                model,
                instructions: MAX_TURNS_INSTRUCTIONS.to_string(),
                input: history.to_vec(),
                tools: Vec::new(),
                temperature: agent.temperature,
                tool_choice: Some("none".to_string()),
                reasoning_effort: agent.reasoning,
                parallel_tool_calls: None,
            };
        }

        let tools: Vec<Value> = agent.tools.iter().map(|t| t.schema_document()).collect();
        let parallel_tool_calls = (!tools.is_empty()).then_some(agent.parallel_tool_calls);

        ResponseRequest {
            model,
            instructions: agent.instructions.clone(),
            input: history.to_vec(),
            tools,
            temperature: agent.temperature,
            tool_choice: agent.tool_choice.clone(),
            reasoning_effort: agent.reasoning,
            parallel_tool_calls,
        }
    }

    /// Dispatch one provider event; returns false when the client went away
    async fn handle_event(
        &self,
        event: ResponseStreamEvent,
        turn: &mut TurnState,
        new_message: &mut ChatMessage,
        history: &mut Vec<Value>,
        agent: &Agent,
        tx: &mpsc::Sender<String>,
    ) -> bool {
        match event {
            ResponseStreamEvent::ReasoningPartAdded { item_id } => {
                turn.reasoning.insert(item_id.clone(), String::new());
                emit(tx, StreamFrame::StartStep).await
                    && emit(tx, StreamFrame::ReasoningStart { id: item_id }).await
            }
            ResponseStreamEvent::ReasoningDelta { item_id, delta } => {
                if let Some(summary) = turn.reasoning.get_mut(&item_id) {
                    summary.push_str(&delta);
                }
                emit(tx, StreamFrame::ReasoningDelta { id: item_id, delta }).await
            }
            ResponseStreamEvent::ReasoningPartDone { item_id } => {
                turn.reasoning.remove(&item_id);
                emit(tx, StreamFrame::ReasoningEnd { id: item_id }).await
                    && emit(tx, StreamFrame::FinishStep).await
            }
            ResponseStreamEvent::ContentPartAdded { item_id } => {
                emit(tx, StreamFrame::TextStart { id: item_id }).await
            }
            ResponseStreamEvent::OutputTextDelta { item_id, delta } => {
                emit(tx, StreamFrame::TextDelta { id: item_id, delta }).await
            }
            ResponseStreamEvent::ContentPartDone { item_id, text } => {
                if text.is_empty() {
                    return true;
                }
                let item = message_item(&text);
                new_message.push_part(PartType::Message, item.clone());
                history.push(item);
                emit(tx, StreamFrame::TextEnd { id: item_id }).await
                    && emit(tx, StreamFrame::FinishStep).await
            }
            ResponseStreamEvent::FunctionCallAdded { item_id, name } => {
                // Provider ids collide across turns; mint a private id
                let call_id = Uuid::new_v4().simple().to_string();
                turn.id_map.insert(item_id, call_id.clone());
                turn.tool_calls.push(StreamedToolCall {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: String::new(),
                });
                emit(tx, StreamFrame::StartStep).await
                    && emit(
                        tx,
                        StreamFrame::ToolInputStart {
                            tool_call_id: call_id,
                            tool_name: name,
                        },
                    )
                    .await
            }
            ResponseStreamEvent::FunctionCallArgumentsDelta { item_id, delta } => {
                let Some(call) = turn.call_mut(&item_id) else {
                    return true;
                };
                call.arguments.push_str(&delta);
                let frame = StreamFrame::ToolInputDelta {
                    tool_call_id: call.call_id.clone(),
                    input_text_delta: delta,
                };
                emit(tx, frame).await
            }
            ResponseStreamEvent::FunctionCallDone {
                item_id,
                name,
                arguments,
            } => {
                let Some(call_id) = turn.id_map.get(&item_id).cloned() else {
                    return true;
                };
                // Re-validate and canonicalize the full arguments; invalid
                // input is kept raw so the model can be corrected later.
                let arguments = match agent.tool(&name) {
                    Some(tool) => {
                        crate::tools::sanitize_arguments(&tool.input_schema(), &arguments)
                    }
                    None => arguments,
                };
                if let Some(call) = turn.call_mut(&item_id) {
                    call.arguments = arguments.clone();
                }

                let item = function_call_item(&name, &call_id, &arguments);
                new_message.push_part(PartType::FunctionCall, item.clone());
                history.push(item);

                let input = serde_json::from_str::<Value>(&arguments)
                    .unwrap_or(Value::String(arguments));
                let frame = StreamFrame::ToolInputAvailable {
                    tool_call_id: call_id,
                    tool_name: name,
                    input,
                };
                emit(tx, frame).await && emit(tx, StreamFrame::FinishStep).await
            }
            ResponseStreamEvent::Completed { usage } => {
                turn.usage = usage;
                true
            }
        }
    }
}

/// Send a frame; false means the receiver is gone and the stream is over
async fn emit(tx: &mpsc::Sender<String>, frame: StreamFrame) -> bool {
    tx.send(frame.to_sse()).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    use crate::llm::{ResponseEventStream, StructuredRequest, StructuredResponse};
    use crate::tools::{Tool, ToolError, ToolOutput};

    // ========================================================================
    // Mock LLM client
    // ========================================================================

    /// Replays scripted event turns and records every request it receives
    struct MockClient {
        turns: Mutex<Vec<Vec<ResponseStreamEvent>>>,
        requests: Mutex<Vec<ResponseRequest>>,
    }

    impl MockClient {
        fn new(turns: Vec<Vec<ResponseStreamEvent>>) -> Self {
            Self {
                turns: Mutex::new(turns),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<ResponseRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ResponsesClient for MockClient {
        async fn stream_response(&self, request: ResponseRequest) -> Result<ResponseEventStream> {
            self.requests.lock().unwrap().push(request);
            let mut turns = self.turns.lock().unwrap();
            let events = if turns.is_empty() {
                vec![ResponseStreamEvent::Completed { usage: None }]
            } else {
                turns.remove(0)
            };
            Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
        }

        async fn structured_output(&self, _request: StructuredRequest) -> Result<StructuredResponse> {
            Ok(StructuredResponse {
                output: Value::Null,
                usage: None,
            })
        }
    }

    fn text_turn(text: &str) -> Vec<ResponseStreamEvent> {
        vec![
            ResponseStreamEvent::ContentPartAdded {
                item_id: "item_1".into(),
            },
            ResponseStreamEvent::OutputTextDelta {
                item_id: "item_1".into(),
                delta: text.to_string(),
            },
            ResponseStreamEvent::ContentPartDone {
                item_id: "item_1".into(),
                text: text.to_string(),
            },
            ResponseStreamEvent::Completed {
                usage: Some(ResponseUsage {
                    input_tokens: 10,
                    cached_input_tokens: 0,
                    output_tokens: 5,
                }),
            },
        ]
    }

    fn tool_turn(name: &str, arguments: &str) -> Vec<ResponseStreamEvent> {
        vec![
            ResponseStreamEvent::FunctionCallAdded {
                item_id: format!("fc_{name}"),
                name: name.to_string(),
            },
            ResponseStreamEvent::FunctionCallArgumentsDelta {
                item_id: format!("fc_{name}"),
                delta: arguments.to_string(),
            },
            ResponseStreamEvent::FunctionCallDone {
                item_id: format!("fc_{name}"),
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
            ResponseStreamEvent::Completed {
                usage: Some(ResponseUsage {
                    input_tokens: 20,
                    cached_input_tokens: 8,
                    output_tokens: 4,
                }),
            },
        ]
    }

    // ========================================================================
    // Test tools
    // ========================================================================

    struct WeatherTool;

    #[async_trait]
    impl Tool for WeatherTool {
        fn name(&self) -> &str {
            "get_weather"
        }
        fn name_frontend(&self) -> &str {
            "Get Weather"
        }
        fn description(&self) -> &str {
            "Get the current weather for a location."
        }
        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"location": {"type": "string"}},
                "required": ["location"],
                "additionalProperties": false
            })
        }
        async fn run(&self, _ctx: &ToolContext, _call_id: &str, arguments: Value) -> std::result::Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Text(format!(
                "The weather in {} is sunny today!",
                arguments["location"].as_str().unwrap_or("?")
            )))
        }
    }

    struct HandoffToB;

    #[async_trait]
    impl Tool for HandoffToB {
        fn name(&self) -> &str {
            "handoff_to_b"
        }
        fn name_frontend(&self) -> &str {
            "Handoff to B"
        }
        fn description(&self) -> &str {
            "Hand the conversation to agent B."
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}, "additionalProperties": false})
        }
        async fn run(&self, _ctx: &ToolContext, _call_id: &str, _arguments: Value) -> std::result::Result<ToolOutput, ToolError> {
            let agent = Agent::new("agent-b", "You are agent B.", "gpt-5-mini")
                .with_tools(vec![Arc::new(WeatherTool)]);
            Ok(ToolOutput::Handoff(agent))
        }
    }

    struct DestructiveOp;

    #[async_trait]
    impl Tool for DestructiveOp {
        fn name(&self) -> &str {
            "destructive_op"
        }
        fn name_frontend(&self) -> &str {
            "Destructive Op"
        }
        fn description(&self) -> &str {
            "Dangerous operation requiring approval."
        }
        fn hil(&self) -> bool {
            true
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}, "additionalProperties": false})
        }
        async fn run(&self, _ctx: &ToolContext, _call_id: &str, _arguments: Value) -> std::result::Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Text("done".to_string()))
        }
    }

    // ========================================================================
    // Harness
    // ========================================================================

    struct RunResult {
        frames: Vec<Value>,
        done: bool,
        conversation: Vec<ChatMessage>,
    }

    async fn run_loop(
        client: Arc<MockClient>,
        agent: Agent,
        mut conversation: Vec<ChatMessage>,
        config: LoopConfig,
    ) -> RunResult {
        let ctx = ToolContext::new(
            conversation
                .first()
                .map(|m| m.thread_id)
                .unwrap_or_else(Uuid::now_v7),
            Uuid::now_v7(),
        );
        let (tx, mut rx) = mpsc::channel(256);

        let agent_loop = AgentLoop::new(client);
        agent_loop
            .stream(agent, &mut conversation, &ctx, &config, &tx)
            .await
            .unwrap();
        drop(tx);

        let mut frames = Vec::new();
        let mut done = false;
        while let Some(line) = rx.recv().await {
            let data = line
                .strip_prefix("data: ")
                .and_then(|s| s.strip_suffix("\n\n"))
                .unwrap()
                .to_string();
            if data == "[DONE]" {
                done = true;
            } else {
                frames.push(serde_json::from_str(&data).unwrap());
            }
        }

        RunResult {
            frames,
            done,
            conversation,
        }
    }

    fn frame_types(frames: &[Value]) -> Vec<String> {
        frames
            .iter()
            .map(|f| f["type"].as_str().unwrap().to_string())
            .collect()
    }

    // ========================================================================
    // Scenarios
    // ========================================================================

    #[tokio::test]
    async fn test_simple_echo_no_tools() {
        let thread_id = Uuid::now_v7();
        let client = Arc::new(MockClient::new(vec![text_turn("Hello there!")]));
        let agent = Agent::new("agent", "You are helpful.", "gpt-5-mini");
        let conversation = vec![ChatMessage::user(thread_id, "Hello")];

        let result = run_loop(client, agent, conversation, LoopConfig::default()).await;

        assert_eq!(
            frame_types(&result.frames),
            vec![
                "start",
                "text-start",
                "text-delta",
                "text-end",
                "finish-step",
                "finish-step",
                "finish"
            ]
        );
        assert!(result.done);

        // The thread now carries a new assistant message with one MESSAGE part
        assert_eq!(result.conversation.len(), 2);
        let assistant = &result.conversation[1];
        assert_eq!(assistant.role, MessageRole::Assistant);
        assert_eq!(assistant.parts.len(), 1);
        assert_eq!(assistant.parts[0].part_type, PartType::Message);
        assert_eq!(assistant.text(), "Hello there!");
    }

    #[tokio::test]
    async fn test_handoff_then_weather() {
        let thread_id = Uuid::now_v7();
        let client = Arc::new(MockClient::new(vec![
            tool_turn("handoff_to_b", "{}"),
            tool_turn("get_weather", "{\"location\": \"San Francisco\"}"),
            text_turn("The weather in San Francisco is sunny today!"),
        ]));
        let agent = Agent::new("agent-a", "You are agent A.", "gpt-5-mini")
            .with_tools(vec![Arc::new(HandoffToB)]);
        let conversation = vec![ChatMessage::user(thread_id, "What's the weather in SF?")];

        let result = run_loop(client, agent, conversation, LoopConfig::default()).await;

        let types = frame_types(&result.frames);
        assert_eq!(
            types
                .iter()
                .filter(|t| *t == "tool-output-available")
                .count(),
            2
        );
        assert!(result.done);

        // 5 parts: two call/output pairs then the final text
        let assistant = &result.conversation[1];
        let kinds: Vec<PartType> = assistant.parts.iter().map(|p| p.part_type).collect();
        assert_eq!(
            kinds,
            vec![
                PartType::FunctionCall,
                PartType::FunctionCallOutput,
                PartType::FunctionCall,
                PartType::FunctionCallOutput,
                PartType::Message,
            ]
        );
        assert_eq!(
            assistant.text(),
            "The weather in San Francisco is sunny today!"
        );
    }

    #[tokio::test]
    async fn test_hil_interrupt_suspends_without_output() {
        let thread_id = Uuid::now_v7();
        let client = Arc::new(MockClient::new(vec![tool_turn("destructive_op", "{}")]));
        let agent = Agent::new("agent", "You are helpful.", "gpt-5-mini")
            .with_tools(vec![Arc::new(DestructiveOp)]);
        let conversation = vec![ChatMessage::user(thread_id, "Wipe it")];

        let result = run_loop(client, agent, conversation, LoopConfig::default()).await;

        let types = frame_types(&result.frames);
        assert!(types.contains(&"tool-input-available".to_string()));
        assert!(!types.contains(&"tool-output-available".to_string()));

        let finish = result.frames.last().unwrap();
        assert_eq!(finish["type"], "finish");
        let pending = &finish["messageMetadata"]["toolCalls"][0];
        assert_eq!(pending["validated"], "pending");
        assert_eq!(pending["isComplete"], true);
        assert!(result.done);

        // FUNCTION_CALL persisted, no output part
        let assistant = &result.conversation[1];
        assert_eq!(assistant.parts.len(), 1);
        assert_eq!(assistant.parts[0].part_type, PartType::FunctionCall);
        assert_eq!(assistant.unanswered_function_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_hil_resume_reopens_assistant_message() {
        let thread_id = Uuid::now_v7();

        // Previously persisted: user message + suspended assistant message
        let user = ChatMessage::user(thread_id, "Wipe it");
        let mut suspended = ChatMessage::assistant(thread_id);
        suspended.push_part(
            PartType::FunctionCall,
            function_call_item("destructive_op", "call_1", "{}"),
        );
        suspended.push_part(
            PartType::FunctionCallOutput,
            function_call_output_item("call_1", "done", "complete"),
        );
        suspended.persisted_parts = 2;

        let client = Arc::new(MockClient::new(vec![text_turn("All wiped.")]));
        let agent = Agent::new("agent", "You are helpful.", "gpt-5-mini")
            .with_tools(vec![Arc::new(DestructiveOp)]);

        let result = run_loop(
            client,
            agent,
            vec![user, suspended],
            LoopConfig::default(),
        )
        .await;

        // No `start` frame on resume; the existing message is extended
        let types = frame_types(&result.frames);
        assert_ne!(types[0], "start");
        assert_eq!(result.conversation.len(), 2);
        let assistant = &result.conversation[1];
        assert_eq!(assistant.parts.len(), 3);
        assert_eq!(assistant.persisted_parts, 2);
        assert_eq!(assistant.text(), "All wiped.");
    }

    #[tokio::test]
    async fn test_max_turns_forces_final_text_turn() {
        let thread_id = Uuid::now_v7();
        // The model asks for a tool on every turn; with max_turns = 2 the
        // third request must run with tools disabled.
        let client = Arc::new(MockClient::new(vec![
            tool_turn("get_weather", "{\"location\": \"Paris\"}"),
            tool_turn("get_weather", "{\"location\": \"Lyon\"}"),
            text_turn("You reached the limit, please send a new message."),
        ]));
        let agent = Agent::new("agent", "You are helpful.", "gpt-5-mini")
            .with_tools(vec![Arc::new(WeatherTool)]);
        let conversation = vec![ChatMessage::user(thread_id, "Weather everywhere")];

        let config = LoopConfig {
            max_turns: 2,
            ..LoopConfig::default()
        };
        let result = run_loop(client.clone(), agent, conversation, config).await;

        let requests = client.requests();
        assert_eq!(requests.len(), 3);
        assert!(!requests[0].tools.is_empty());
        assert!(!requests[1].tools.is_empty());
        // Forced final turn: tools off, rate-limit notice instructions
        assert!(requests[2].tools.is_empty());
        assert_eq!(requests[2].tool_choice.as_deref(), Some("none"));
        assert!(requests[2].instructions.contains("rate limiting"));

        assert!(result
            .conversation[1]
            .text()
            .contains("reached the limit"));
    }

    #[tokio::test]
    async fn test_parallel_cap_synthesizes_rate_limit_outputs() {
        let thread_id = Uuid::now_v7();
        let turn = vec![
            ResponseStreamEvent::FunctionCallAdded {
                item_id: "fc_1".into(),
                name: "get_weather".into(),
            },
            ResponseStreamEvent::FunctionCallDone {
                item_id: "fc_1".into(),
                name: "get_weather".into(),
                arguments: "{\"location\": \"Paris\"}".into(),
            },
            ResponseStreamEvent::FunctionCallAdded {
                item_id: "fc_2".into(),
                name: "get_weather".into(),
            },
            ResponseStreamEvent::FunctionCallDone {
                item_id: "fc_2".into(),
                name: "get_weather".into(),
                arguments: "{\"location\": \"Lyon\"}".into(),
            },
            ResponseStreamEvent::FunctionCallAdded {
                item_id: "fc_3".into(),
                name: "get_weather".into(),
            },
            ResponseStreamEvent::FunctionCallDone {
                item_id: "fc_3".into(),
                name: "get_weather".into(),
                arguments: "{\"location\": \"Nice\"}".into(),
            },
            ResponseStreamEvent::Completed { usage: None },
        ];
        let client = Arc::new(MockClient::new(vec![turn, text_turn("Summed up.")]));
        let agent = Agent::new("agent", "You are helpful.", "gpt-5-mini")
            .with_tools(vec![Arc::new(WeatherTool)]);
        let conversation = vec![ChatMessage::user(thread_id, "Three cities")];

        let config = LoopConfig {
            max_parallel_tool_calls: 2,
            ..LoopConfig::default()
        };
        let result = run_loop(client, agent, conversation, config).await;

        let outputs: Vec<&str> = result
            .frames
            .iter()
            .filter(|f| f["type"] == "tool-output-available")
            .map(|f| f["output"].as_str().unwrap())
            .collect();
        assert_eq!(outputs.len(), 3);
        assert!(outputs[0].contains("sunny"));
        assert!(outputs[1].contains("sunny"));
        assert!(outputs[2].contains("could not be executed due to rate limit"));
    }

    #[tokio::test]
    async fn test_tool_call_ids_are_server_minted() {
        let thread_id = Uuid::now_v7();
        let client = Arc::new(MockClient::new(vec![
            tool_turn("get_weather", "{\"location\": \"Paris\"}"),
            text_turn("Done."),
        ]));
        let agent = Agent::new("agent", "You are helpful.", "gpt-5-mini")
            .with_tools(vec![Arc::new(WeatherTool)]);
        let conversation = vec![ChatMessage::user(thread_id, "Weather in Paris")];

        let result = run_loop(client, agent, conversation, LoopConfig::default()).await;

        let start = result
            .frames
            .iter()
            .find(|f| f["type"] == "tool-input-start")
            .unwrap();
        let call_id = start["toolCallId"].as_str().unwrap();
        // The provider item id never leaks out
        assert_ne!(call_id, "fc_get_weather");
        assert_eq!(call_id.len(), 32);

        // Same id in part payloads and the output frame
        let assistant = &result.conversation[1];
        assert_eq!(assistant.parts[0].payload["call_id"], call_id);
        assert_eq!(assistant.parts[1].payload["call_id"], call_id);
    }

    #[tokio::test]
    async fn test_token_ledger_matches_usage_blocks() {
        let thread_id = Uuid::now_v7();
        let client = Arc::new(MockClient::new(vec![
            tool_turn("get_weather", "{\"location\": \"Paris\"}"),
            text_turn("Done."),
        ]));
        let agent = Agent::new("agent", "You are helpful.", "gpt-5-mini")
            .with_tools(vec![Arc::new(WeatherTool)]);
        let conversation = vec![ChatMessage::user(thread_id, "Weather in Paris")];

        let result = run_loop(client, agent, conversation, LoopConfig::default()).await;

        let assistant = &result.conversation[1];
        let total: i64 = assistant.token_consumption.iter().map(|r| r.count).sum();
        // Turn 1: 20 input + 4 output; turn 2: 10 input + 5 output
        assert_eq!(total, 39);
        assert!(assistant
            .token_consumption
            .iter()
            .all(|r| r.task == TaskKind::ChatCompletion));
    }

    #[tokio::test]
    async fn test_arguments_sanitized_against_schema() {
        let thread_id = Uuid::now_v7();
        let client = Arc::new(MockClient::new(vec![
            tool_turn(
                "get_weather",
                "{\"location\": \"Paris\", \"hallucinated\": true}",
            ),
            text_turn("Done."),
        ]));
        let agent = Agent::new("agent", "You are helpful.", "gpt-5-mini")
            .with_tools(vec![Arc::new(WeatherTool)]);
        let conversation = vec![ChatMessage::user(thread_id, "Weather in Paris")];

        let result = run_loop(client, agent, conversation, LoopConfig::default()).await;

        // Unknown field dropped by canonicalization
        let available = result
            .frames
            .iter()
            .find(|f| f["type"] == "tool-input-available")
            .unwrap();
        assert_eq!(available["input"], json!({"location": "Paris"}));

        let assistant = &result.conversation[1];
        assert_eq!(
            assistant.parts[0].payload["arguments"],
            "{\"location\":\"Paris\"}"
        );
    }

    #[tokio::test]
    async fn test_client_disconnect_discards_in_flight_message() {
        let thread_id = Uuid::now_v7();
        let client = Arc::new(MockClient::new(vec![text_turn("Hello there!")]));
        let agent = Agent::new("agent", "You are helpful.", "gpt-5-mini");
        let mut conversation = vec![ChatMessage::user(thread_id, "Hello")];
        let ctx = ToolContext::new(thread_id, Uuid::now_v7());

        let (tx, rx) = mpsc::channel(1);
        drop(rx); // client went away before the first frame

        let agent_loop = AgentLoop::new(client);
        agent_loop
            .stream(agent, &mut conversation, &ctx, &LoopConfig::default(), &tx)
            .await
            .unwrap();

        // Only the user message survives
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn test_reasoning_frames() {
        let thread_id = Uuid::now_v7();
        let turn = vec![
            ResponseStreamEvent::ReasoningPartAdded {
                item_id: "rs_1".into(),
            },
            ResponseStreamEvent::ReasoningDelta {
                item_id: "rs_1".into(),
                delta: "Considering...".into(),
            },
            ResponseStreamEvent::ReasoningPartDone {
                item_id: "rs_1".into(),
            },
            ResponseStreamEvent::ContentPartAdded {
                item_id: "item_1".into(),
            },
            ResponseStreamEvent::ContentPartDone {
                item_id: "item_1".into(),
                text: "Answer.".into(),
            },
            ResponseStreamEvent::Completed { usage: None },
        ];
        let client = Arc::new(MockClient::new(vec![turn]));
        let agent = Agent::new("agent", "You are helpful.", "gpt-5-mini");
        let conversation = vec![ChatMessage::user(thread_id, "Think hard")];

        let result = run_loop(client, agent, conversation, LoopConfig::default()).await;

        let types = frame_types(&result.frames);
        assert_eq!(
            types,
            vec![
                "start",
                "start-step",
                "reasoning-start",
                "reasoning-delta",
                "reasoning-end",
                "finish-step",
                "text-start",
                "text-end",
                "finish-step",
                "finish-step",
                "finish"
            ]
        );
    }
}
