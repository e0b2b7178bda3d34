// OpenAI Responses API wire types
//
// Request body and streaming chunk shapes for the /v1/responses endpoint.
// Chunks are deserialized into one loose struct keyed by the `type` string;
// unknown chunk kinds are skipped by the driver.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ResponsesApiRequest {
    pub model: String,
    pub instructions: String,
    pub input: Vec<Value>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    /// Encrypted reasoning must be requested explicitly when store is off
    pub include: Vec<String>,
    pub store: bool,
    pub text: TextOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct TextOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<TextFormat>,
}

/// Structured output format constraint
#[derive(Debug, Serialize)]
pub struct TextFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

#[derive(Debug, Serialize)]
pub struct ReasoningOptions {
    pub effort: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<&'static str>,
}

// ============================================================================
// Streaming chunk types
// ============================================================================

pub const EVENT_REASONING_PART_ADDED: &str = "response.reasoning_summary_part.added";
pub const EVENT_REASONING_TEXT_DELTA: &str = "response.reasoning_summary_text.delta";
pub const EVENT_REASONING_PART_DONE: &str = "response.reasoning_summary_part.done";
pub const EVENT_CONTENT_PART_ADDED: &str = "response.content_part.added";
pub const EVENT_OUTPUT_TEXT_DELTA: &str = "response.output_text.delta";
pub const EVENT_CONTENT_PART_DONE: &str = "response.content_part.done";
pub const EVENT_OUTPUT_ITEM_ADDED: &str = "response.output_item.added";
pub const EVENT_FUNCTION_ARGS_DELTA: &str = "response.function_call_arguments.delta";
pub const EVENT_OUTPUT_ITEM_DONE: &str = "response.output_item.done";
pub const EVENT_COMPLETED: &str = "response.completed";

/// One SSE chunk of a streaming response
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub delta: Option<String>,
    #[serde(default)]
    pub part: Option<ContentPart>,
    #[serde(default)]
    pub item: Option<OutputItem>,
    #[serde(default)]
    pub response: Option<ResponseBody>,
}

#[derive(Debug, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Response body carried by `response.completed` (and by non-streaming calls)
#[derive(Debug, Deserialize)]
pub struct ResponseBody {
    #[serde(default)]
    pub output: Vec<Value>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ApiUsage {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub input_tokens_details: Option<InputTokensDetails>,
    #[serde(default)]
    pub output_tokens: i64,
}

#[derive(Debug, Deserialize)]
pub struct InputTokensDetails {
    #[serde(default)]
    pub cached_tokens: i64,
}

impl ApiUsage {
    pub fn cached_tokens(&self) -> i64 {
        self.input_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization_skips_empty_fields() {
        let request = ResponsesApiRequest {
            model: "gpt-5-mini".into(),
            instructions: "Be helpful.".into(),
            input: vec![],
            stream: true,
            temperature: None,
            tools: vec![],
            tool_choice: None,
            include: vec!["reasoning.encrypted_content".into()],
            store: false,
            text: TextOptions {
                verbosity: Some("medium"),
                format: None,
            },
            reasoning: None,
            parallel_tool_calls: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("temperature").is_none());
        assert_eq!(value["store"], false);
        assert_eq!(value["include"][0], "reasoning.encrypted_content");
        assert_eq!(value["text"]["verbosity"], "medium");
    }

    #[test]
    fn test_stream_chunk_deserialization() {
        let chunk: StreamChunk = serde_json::from_value(json!({
            "type": "response.output_item.done",
            "item": {
                "type": "function_call",
                "id": "fc_123",
                "name": "get_weather",
                "arguments": "{\"location\": \"Geneva\"}"
            }
        }))
        .unwrap();

        assert_eq!(chunk.kind, EVENT_OUTPUT_ITEM_DONE);
        let item = chunk.item.unwrap();
        assert_eq!(item.kind, "function_call");
        assert_eq!(item.name.as_deref(), Some("get_weather"));
    }

    #[test]
    fn test_usage_cached_tokens() {
        let usage: ApiUsage = serde_json::from_value(json!({
            "input_tokens": 100,
            "input_tokens_details": {"cached_tokens": 60},
            "output_tokens": 20
        }))
        .unwrap();
        assert_eq!(usage.cached_tokens(), 60);

        let bare: ApiUsage = serde_json::from_value(json!({"input_tokens": 5, "output_tokens": 1})).unwrap();
        assert_eq!(bare.cached_tokens(), 0);
    }
}
