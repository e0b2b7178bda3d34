// Error types for the agent loop

use thiserror::Error;

/// Result type alias for agent loop operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur while running the agent loop and its collaborators
#[derive(Debug, Error)]
pub enum AgentError {
    /// LLM provider error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Structured output did not match the expected shape
    #[error("Structured output error: {0}")]
    StructuredOutput(String),

    /// Shared-state patch error
    #[error("State patch error: {0}")]
    StatePatch(String),

    /// MCP server error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AgentError {
    /// Create an LLM error
    pub fn llm(msg: impl Into<String>) -> Self {
        AgentError::Llm(msg.into())
    }

    /// Create a tool execution error
    pub fn tool(msg: impl Into<String>) -> Self {
        AgentError::ToolExecution(msg.into())
    }

    /// Create a structured output error
    pub fn structured(msg: impl Into<String>) -> Self {
        AgentError::StructuredOutput(msg.into())
    }

    /// Create a state patch error
    pub fn patch(msg: impl Into<String>) -> Self {
        AgentError::StatePatch(msg.into())
    }

    /// Create an MCP error
    pub fn mcp(msg: impl Into<String>) -> Self {
        AgentError::Mcp(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        AgentError::Configuration(msg.into())
    }
}
