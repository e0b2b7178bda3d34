// MCP (Model Context Protocol) client
//
// Speaks JSON-RPC 2.0 over HTTP against an MCP server: `initialize`,
// `tools/list` and `tools/call`. Remote tools are wrapped into dynamic
// registry entries so the dispatcher treats them exactly like internal ones.
//
// The MCP specification version targeted is `2024-11-05`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::error::{AgentError, Result};
use crate::tools::{Tool, ToolError, ToolOutput};

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "neurochat";

/// A JSON-RPC 2.0 request
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: i64,
    method: String,
    params: Value,
}

/// A JSON-RPC 2.0 response
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// A tool advertised by the MCP server
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
}

/// HTTP JSON-RPC client against a single MCP server
pub struct McpClient {
    http: reqwest::Client,
    server_url: String,
    next_id: AtomicI64,
}

impl McpClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            server_url: server_url.into(),
            next_id: AtomicI64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_string(),
            params,
        };

        let response = self
            .http
            .post(&self.server_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::mcp(format!("request to {method} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AgentError::mcp(format!(
                "{method} returned HTTP {}",
                response.status()
            )));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| AgentError::mcp(format!("invalid {method} response: {e}")))?;

        if let Some(error) = body.error {
            return Err(AgentError::mcp(format!(
                "{method} error {}: {}",
                error.code, error.message
            )));
        }
        body.result
            .ok_or_else(|| AgentError::mcp(format!("{method} returned no result")))
    }

    /// Perform the protocol handshake
    pub async fn initialize(&self) -> Result<()> {
        self.call(
            "initialize",
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION")},
            }),
        )
        .await?;
        Ok(())
    }

    /// Fetch the remote tool list
    pub async fn list_tools(&self) -> Result<Vec<McpToolDescriptor>> {
        let result = self.call("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| AgentError::mcp("tools/list result has no tools field"))?;
        serde_json::from_value(tools).map_err(|e| AgentError::mcp(format!("bad tool list: {e}")))
    }

    /// Invoke a remote tool and flatten its content to a string
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        let result = self
            .call("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;

        if result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let message = flatten_content(&result);
            return Err(AgentError::mcp(message));
        }
        Ok(flatten_content(&result))
    }
}

/// Concatenate the text blocks of a tools/call result; non-text results are
/// serialized as-is.
fn flatten_content(result: &Value) -> String {
    match result.get("content").and_then(Value::as_array) {
        Some(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        None => result.to_string(),
    }
}

/// A remote MCP tool exposed through the regular tool trait
pub struct McpTool {
    client: Arc<McpClient>,
    descriptor: McpToolDescriptor,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn name_frontend(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        self.descriptor.description.as_deref().unwrap_or("NO DESCRIPTION")
    }

    fn input_schema(&self) -> Value {
        self.descriptor
            .input_schema
            .clone()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}}))
    }

    async fn run(&self, _ctx: &ToolContext, _call_id: &str, arguments: Value) -> std::result::Result<ToolOutput, ToolError> {
        self.client
            .call_tool(&self.descriptor.name, arguments)
            .await
            .map(ToolOutput::Text)
            .map_err(|e| ToolError::Execution(e.to_string()))
    }
}

/// Wrap every advertised remote tool; an unconfigured client yields an empty
/// list.
pub async fn synthesize_mcp_tools(client: Option<Arc<McpClient>>) -> Result<Vec<Arc<dyn Tool>>> {
    let Some(client) = client else {
        return Ok(Vec::new());
    };
    client.initialize().await?;

    let descriptors = client.list_tools().await?;
    tracing::info!(count = descriptors.len(), "Synthesized MCP tools");

    Ok(descriptors
        .into_iter()
        .map(|descriptor| {
            Arc::new(McpTool {
                client: client.clone(),
                descriptor,
            }) as Arc<dyn Tool>
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_content_joins_text_blocks() {
        let result = json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "text", "text": "line two"},
                {"type": "image", "data": "..."}
            ]
        });
        assert_eq!(flatten_content(&result), "line one\nline two");
    }

    #[test]
    fn test_flatten_content_without_blocks() {
        let result = json!({"raw": 1});
        assert_eq!(flatten_content(&result), "{\"raw\":1}");
    }

    #[test]
    fn test_descriptor_deserialization() {
        let descriptor: McpToolDescriptor = serde_json::from_value(json!({
            "name": "remote-search",
            "description": "Search the remote index.",
            "inputSchema": {"type": "object", "properties": {"q": {"type": "string"}}}
        }))
        .unwrap();

        assert_eq!(descriptor.name, "remote-search");
        assert!(descriptor.input_schema.is_some());
    }

    #[tokio::test]
    async fn test_synthesize_without_client() {
        let tools = synthesize_mcp_tools(None).await.unwrap();
        assert!(tools.is_empty());
    }
}
