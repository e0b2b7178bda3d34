// Tool dispatcher
//
// Takes the batch of tool calls collected during one LLM turn and runs the
// non-HIL ones concurrently, bounded by the parallelism cap. Calls beyond the
// cap are not executed; they get a synthetic "call it again" output so the
// model can retry on the next turn. Every failure mode is isolated per call
// and fed back to the LLM as an `incomplete` output.

use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::agent::Agent;
use crate::context::ToolContext;
use crate::tools::{coerce_arguments, Tool, ToolError, ToolOutput};

/// A pending tool call streamed out of the LLM; `call_id` is server-minted
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// Completion status of a tool call output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    Complete,
    Incomplete,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCallStatus::Complete => "complete",
            ToolCallStatus::Incomplete => "incomplete",
        }
    }
}

/// One tool call output, ready to become a FUNCTION_CALL_OUTPUT part
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResponse {
    pub call_id: String,
    pub status: ToolCallStatus,
    pub output: String,
}

/// Result of dispatching a batch
#[derive(Debug)]
pub struct DispatchOutcome {
    pub responses: Vec<ToolCallResponse>,
    /// Agent to swap to, if any tool handed off
    pub handoff: Option<Agent>,
}

/// Split a batch into calls to execute now and calls that must wait for user
/// validation. Calls whose tool is unknown are executed (and fail with a
/// not-found output) rather than suspended.
pub fn partition_hil(
    calls: Vec<ToolCallRequest>,
    tools: &[Arc<dyn Tool>],
) -> (Vec<ToolCallRequest>, Vec<ToolCallRequest>) {
    calls.into_iter().partition(|call| {
        !tools
            .iter()
            .any(|tool| tool.name() == call.name && tool.hil())
    })
}

/// Stateless dispatcher over an agent's active tool set
pub struct ToolDispatcher;

impl ToolDispatcher {
    /// Run a batch of non-HIL calls.
    ///
    /// The first `max_parallel` calls run concurrently; the rest receive the
    /// synthetic rate-limit output. When several tools hand off in one batch,
    /// the last non-null handoff in reverse submission order wins.
    pub async fn dispatch(
        calls: &[ToolCallRequest],
        tools: &[Arc<dyn Tool>],
        ctx: &ToolContext,
        max_parallel: usize,
    ) -> DispatchOutcome {
        let cap = max_parallel.min(calls.len());
        let (to_run, overflow) = calls.split_at(cap);

        let results = join_all(
            to_run
                .iter()
                .map(|call| Self::handle_call(call, tools, ctx)),
        )
        .await;

        let handoff = results
            .iter()
            .rev()
            .find_map(|(_, agent)| agent.clone());

        let mut responses: Vec<ToolCallResponse> =
            results.into_iter().map(|(response, _)| response).collect();

        responses.extend(overflow.iter().map(|call| ToolCallResponse {
            call_id: call.call_id.clone(),
            status: ToolCallStatus::Complete,
            output: format!(
                "The tool {} with arguments {} could not be executed due to rate limit. Call it again.",
                call.name, call.arguments
            ),
        }));

        DispatchOutcome { responses, handoff }
    }

    /// Run one call with full error isolation
    async fn handle_call(
        call: &ToolCallRequest,
        tools: &[Arc<dyn Tool>],
        ctx: &ToolContext,
    ) -> (ToolCallResponse, Option<Agent>) {
        let incomplete = |output: String| ToolCallResponse {
            call_id: call.call_id.clone(),
            status: ToolCallStatus::Incomplete,
            output,
        };

        let Some(tool) = tools.iter().find(|t| t.name() == call.name) else {
            return (
                incomplete(format!("Error: Tool {} not found.", call.name)),
                None,
            );
        };

        let arguments: Value = match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => {
                return (
                    incomplete(format!("Error: invalid tool arguments: {e}")),
                    None,
                )
            }
        };

        let arguments = match coerce_arguments(&tool.input_schema(), &arguments) {
            Ok(canonical) => canonical,
            Err(errors) => {
                let payload =
                    serde_json::to_string(&errors).unwrap_or_else(|_| errors.to_string());
                return (incomplete(payload), None);
            }
        };

        tracing::info!(tool = %call.name, call_id = %call.call_id, "Running tool");

        match tool.run(ctx, &call.call_id, arguments).await {
            Ok(ToolOutput::Text(output)) => (
                ToolCallResponse {
                    call_id: call.call_id.clone(),
                    status: ToolCallStatus::Complete,
                    output,
                },
                None,
            ),
            Ok(ToolOutput::Handoff(agent)) => {
                let output = json!({"assistant": agent.name}).to_string();
                (
                    ToolCallResponse {
                        call_id: call.call_id.clone(),
                        status: ToolCallStatus::Complete,
                        output,
                    },
                    Some(agent),
                )
            }
            Err(ToolError::Forbidden(reason)) => {
                tracing::warn!(tool = %call.name, %reason, "Tool refused by context");
                (
                    incomplete(
                        "The user is not allowed to run this tool. Don't call it again.".to_string(),
                    ),
                    None,
                )
            }
            Err(ToolError::Execution(err)) => (incomplete(err), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    fn ctx() -> ToolContext {
        ToolContext::new(Uuid::now_v7(), Uuid::now_v7())
    }

    fn call(id: &str, name: &str, args: &str) -> ToolCallRequest {
        ToolCallRequest {
            call_id: id.to_string(),
            name: name.to_string(),
            arguments: args.to_string(),
        }
    }

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
        async fn run(&self, _ctx: &ToolContext, _call_id: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Text(format!(
                "The weather in {} is sunny today!",
                arguments["location"].as_str().unwrap_or("?")
            )))
        }
    }

    struct HandoffTool {
        target: &'static str,
    }

    #[async_trait]
    impl Tool for HandoffTool {
        fn name(&self) -> &str {
            "handoff_to_b"
        }
        fn name_frontend(&self) -> &str {
            "Handoff"
        }
        fn description(&self) -> &str {
            "Hand the conversation to agent B."
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}, "additionalProperties": false})
        }
        async fn run(&self, _ctx: &ToolContext, _call_id: &str, _arguments: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Handoff(Agent::new(
                self.target,
                "You are agent B.",
                "gpt-5-mini",
            )))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing_tool"
        }
        fn name_frontend(&self) -> &str {
            "Failing"
        }
        fn description(&self) -> &str {
            "Always fails."
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}, "additionalProperties": false})
        }
        async fn run(&self, _ctx: &ToolContext, _call_id: &str, _arguments: Value) -> Result<ToolOutput, ToolError> {
            Err(ToolError::Execution("backend returned 500".to_string()))
        }
    }

    struct ForbiddenTool;

    #[async_trait]
    impl Tool for ForbiddenTool {
        fn name(&self) -> &str {
            "project_only"
        }
        fn name_frontend(&self) -> &str {
            "Project Only"
        }
        fn description(&self) -> &str {
            "Requires a project scope."
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}, "additionalProperties": false})
        }
        async fn run(&self, ctx: &ToolContext, _call_id: &str, _arguments: Value) -> Result<ToolOutput, ToolError> {
            match ctx.project_id {
                Some(_) => Ok(ToolOutput::Text("ok".to_string())),
                None => Err(ToolError::Forbidden("no project in context".to_string())),
            }
        }
    }

    struct DestructiveTool;

    #[async_trait]
    impl Tool for DestructiveTool {
        fn name(&self) -> &str {
            "destructive_op"
        }
        fn name_frontend(&self) -> &str {
            "Destructive Op"
        }
        fn description(&self) -> &str {
            "Needs approval."
        }
        fn hil(&self) -> bool {
            true
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}, "additionalProperties": false})
        }
        async fn run(&self, _ctx: &ToolContext, _call_id: &str, _arguments: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Text("done".to_string()))
        }
    }

    /// Probe that tracks the peak number of concurrent executions
    struct CountingTool {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "counting"
        }
        fn name_frontend(&self) -> &str {
            "Counting"
        }
        fn description(&self) -> &str {
            "Concurrency probe."
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}, "additionalProperties": false})
        }
        async fn run(&self, _ctx: &ToolContext, _call_id: &str, _arguments: Value) -> Result<ToolOutput, ToolError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ToolOutput::Text("counted".to_string()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_runs_tool() {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(WeatherTool)];
        let calls = vec![call("c1", "get_weather", "{\"location\": \"San Francisco\"}")];

        let outcome = ToolDispatcher::dispatch(&calls, &tools, &ctx(), 5).await;

        assert_eq!(outcome.responses.len(), 1);
        assert_eq!(outcome.responses[0].status, ToolCallStatus::Complete);
        assert_eq!(
            outcome.responses[0].output,
            "The weather in San Francisco is sunny today!"
        );
        assert!(outcome.handoff.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(WeatherTool)];
        let calls = vec![call("c1", "nope", "{}")];

        let outcome = ToolDispatcher::dispatch(&calls, &tools, &ctx(), 5).await;

        assert_eq!(outcome.responses[0].status, ToolCallStatus::Incomplete);
        assert_eq!(outcome.responses[0].output, "Error: Tool nope not found.");
    }

    #[tokio::test]
    async fn test_dispatch_invalid_arguments_return_validator_payload() {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(WeatherTool)];
        let calls = vec![call("c1", "get_weather", "{\"location\": 4}")];

        let outcome = ToolDispatcher::dispatch(&calls, &tools, &ctx(), 5).await;

        assert_eq!(outcome.responses[0].status, ToolCallStatus::Incomplete);
        // The payload is the serialized validator error list
        let errors: Value = serde_json::from_str(&outcome.responses[0].output).unwrap();
        assert!(errors.as_array().unwrap()[0]["message"]
            .as_str()
            .unwrap()
            .contains("4"));
    }

    #[tokio::test]
    async fn test_dispatch_forbidden_context() {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(ForbiddenTool)];
        let calls = vec![call("c1", "project_only", "{}")];

        let outcome = ToolDispatcher::dispatch(&calls, &tools, &ctx(), 5).await;

        assert_eq!(outcome.responses[0].status, ToolCallStatus::Incomplete);
        assert_eq!(
            outcome.responses[0].output,
            "The user is not allowed to run this tool. Don't call it again."
        );
    }

    #[tokio::test]
    async fn test_dispatch_execution_error_is_isolated() {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(FailingTool), Arc::new(WeatherTool)];
        let calls = vec![
            call("c1", "failing_tool", "{}"),
            call("c2", "get_weather", "{\"location\": \"Paris\"}"),
        ];

        let outcome = ToolDispatcher::dispatch(&calls, &tools, &ctx(), 5).await;

        assert_eq!(outcome.responses[0].status, ToolCallStatus::Incomplete);
        assert_eq!(outcome.responses[0].output, "backend returned 500");
        assert_eq!(outcome.responses[1].status, ToolCallStatus::Complete);
    }

    #[tokio::test]
    async fn test_dispatch_overflow_gets_rate_limit_output() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(CountingTool {
            active: active.clone(),
            peak: peak.clone(),
        })];
        let calls = vec![
            call("c1", "counting", "{}"),
            call("c2", "counting", "{}"),
            call("c3", "counting", "{}"),
        ];

        let outcome = ToolDispatcher::dispatch(&calls, &tools, &ctx(), 2).await;

        assert_eq!(outcome.responses.len(), 3);
        assert_eq!(outcome.responses[0].output, "counted");
        assert_eq!(outcome.responses[1].output, "counted");
        assert_eq!(
            outcome.responses[2].output,
            "The tool counting with arguments {} could not be executed due to rate limit. Call it again."
        );
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_dispatch_last_handoff_wins_in_reverse_order() {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(HandoffTool { target: "agent-b" }),
            Arc::new(WeatherTool),
        ];
        let calls = vec![
            call("c1", "handoff_to_b", "{}"),
            call("c2", "get_weather", "{\"location\": \"Paris\"}"),
        ];

        let outcome = ToolDispatcher::dispatch(&calls, &tools, &ctx(), 5).await;

        let handoff = outcome.handoff.unwrap();
        assert_eq!(handoff.name, "agent-b");
        let output: Value = serde_json::from_str(&outcome.responses[0].output).unwrap();
        assert_eq!(output["assistant"], "agent-b");
    }

    #[tokio::test]
    async fn test_partition_hil() {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(WeatherTool), Arc::new(DestructiveTool)];
        let calls = vec![
            call("c1", "get_weather", "{}"),
            call("c2", "destructive_op", "{}"),
        ];

        let (to_run, hil) = partition_hil(calls, &tools);

        assert_eq!(to_run.len(), 1);
        assert_eq!(to_run[0].name, "get_weather");
        assert_eq!(hil.len(), 1);
        assert_eq!(hil[0].name, "destructive_op");
    }
}
