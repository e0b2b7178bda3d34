// LLM client abstraction
//
// Provider-agnostic view of the streaming "responses" API the agent loop
// consumes. Drivers translate their wire events into `ResponseStreamEvent`
// values; the loop never sees provider SDK types.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

use crate::error::Result;
use crate::tokens::ResponseUsage;

/// Type alias for the LLM response stream
pub type ResponseEventStream = Pin<Box<dyn Stream<Item = Result<ResponseStreamEvent>> + Send>>;

/// Reasoning effort requested from reasoning-capable models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

/// Events emitted while a response streams in.
///
/// `item_id` is the provider-assigned output item id; it is only unique
/// within a single response, which is why the loop maps it to a fresh UUID
/// before anything reaches the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseStreamEvent {
    /// A reasoning summary block opened
    ReasoningPartAdded { item_id: String },
    /// Incremental reasoning summary text
    ReasoningDelta { item_id: String, delta: String },
    /// The reasoning summary block closed
    ReasoningPartDone { item_id: String },
    /// A text content block opened
    ContentPartAdded { item_id: String },
    /// Incremental output text
    OutputTextDelta { item_id: String, delta: String },
    /// The text content block closed, carrying the full text
    ContentPartDone { item_id: String, text: String },
    /// A function call output item opened
    FunctionCallAdded { item_id: String, name: String },
    /// Incremental function call arguments
    FunctionCallArgumentsDelta { item_id: String, delta: String },
    /// The function call output item closed, carrying full arguments
    FunctionCallDone {
        item_id: String,
        name: String,
        arguments: String,
    },
    /// The response finished; usage is captured for the token ledger
    Completed { usage: Option<ResponseUsage> },
}

/// A streaming request against the responses API
#[derive(Debug, Clone, Default)]
pub struct ResponseRequest {
    pub model: String,
    pub instructions: String,
    /// History items, exactly as persisted in part payloads
    pub input: Vec<Value>,
    /// Tool schema documents; empty disables tools
    pub tools: Vec<Value>,
    pub temperature: Option<f32>,
    /// "none" forces a text-only final turn
    pub tool_choice: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Only sent when tools are present
    pub parallel_tool_calls: Option<bool>,
}

/// A non-streaming structured-output request (tool filter, title generation,
/// question suggestions)
#[derive(Debug, Clone, Default)]
pub struct StructuredRequest {
    pub model: String,
    pub instructions: String,
    pub input: Vec<Value>,
    pub schema_name: String,
    /// JSON schema the output must conform to
    pub schema: Value,
    pub reasoning_effort: Option<ReasoningEffort>,
}

/// Parsed structured output plus the usage it cost
#[derive(Debug, Clone)]
pub struct StructuredResponse {
    pub output: Value,
    pub usage: Option<ResponseUsage>,
}

/// Trait for LLM drivers speaking the responses protocol
#[async_trait]
pub trait ResponsesClient: Send + Sync {
    /// Open a streaming response
    async fn stream_response(&self, request: ResponseRequest) -> Result<ResponseEventStream>;

    /// Request a schema-constrained output and parse it
    async fn structured_output(&self, request: StructuredRequest) -> Result<StructuredResponse>;
}
