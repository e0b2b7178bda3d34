// Core agent abstractions for Neurochat
//
// This crate holds everything the chat endpoint needs that is not HTTP or
// storage: the multi-turn agent loop, the streaming frame protocol, the tool
// trait with its registry/dispatcher/filter, the token ledger, the
// shared-state patch engine, and the LLM client abstraction.

pub mod agent;
pub mod agent_loop;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod filter;
pub mod llm;
pub mod mcp;
pub mod message;
pub mod state;
pub mod tokens;
pub mod tools;

pub use agent::Agent;
pub use agent_loop::{AgentLoop, LoopConfig};
pub use context::{ServiceEndpoints, ToolContext};
pub use dispatcher::{
    partition_hil, DispatchOutcome, ToolCallRequest, ToolCallResponse, ToolCallStatus,
    ToolDispatcher,
};
pub use error::{AgentError, Result};
pub use events::{FinishMetadata, PendingToolCallAnnotation, StreamFrame, SSE_DONE};
pub use filter::{effort_for_complexity, FilterOutcome, ToolFilter};
pub use llm::{
    ReasoningEffort, ResponseEventStream, ResponseRequest, ResponseStreamEvent, ResponsesClient,
    StructuredRequest, StructuredResponse,
};
pub use mcp::{synthesize_mcp_tools, McpClient, McpTool, McpToolDescriptor};
pub use message::{
    function_call_item, function_call_output_item, history_from_messages, message_item,
    ChatMessage, FunctionCallRef, MessagePart, MessageRole, PartType,
};
pub use state::{apply_patches, infer_return_urls, validate_partial_state, PatchOp, PatchOperation};
pub use tokens::{
    consumption_from_tool_usage, consumption_from_usage, ResponseUsage, TaskKind, TokenConsumption,
    TokenType, ToolTokenUsage,
};
pub use tools::{
    canonicalize_arguments, coerce_arguments, omit_properties, sanitize_arguments,
    validate_arguments, EditStateTool,
    GetStateTool, HandoffTool, LiteratureSearchTool, MorphologyGetAllTool, MorphologyGetOneTool,
    Tool, ToolError, ToolOutput, ToolRegistry,
};
