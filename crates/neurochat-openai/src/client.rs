// OpenAI Responses client
//
// Implements the core `ResponsesClient` trait against the /v1/responses
// endpoint: streaming chat turns for the agent loop and schema-constrained
// non-streaming calls for the filter/title/suggestion paths.
//
// Works against any OpenAI-compatible responses endpoint (a router base URL
// can be substituted for the default).

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use neurochat_core::error::{AgentError, Result};
use neurochat_core::llm::{
    ReasoningEffort, ResponseEventStream, ResponseRequest, ResponseStreamEvent, ResponsesClient,
    StructuredRequest, StructuredResponse,
};
use neurochat_core::tokens::ResponseUsage;
use reqwest::Client;
use serde_json::Value;

use crate::types::*;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/responses";

/// Client for an OpenAI-compatible responses endpoint
#[derive(Clone)]
pub struct OpenAIResponsesClient {
    client: Client,
    api_key: String,
    api_url: String,
}

impl OpenAIResponsesClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Create a client from the OPENAI_API_KEY environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AgentError::llm("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }

    /// Point the client at a compatible endpoint (e.g. a model router)
    pub fn with_base_url(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: api_url.into(),
        }
    }

    fn effort_str(effort: ReasoningEffort) -> &'static str {
        match effort {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }

    async fn post(&self, body: &ResponsesApiRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::llm(format!("Failed to send request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::llm(format!(
                "Responses API error ({status}): {error_text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ResponsesClient for OpenAIResponsesClient {
    async fn stream_response(&self, request: ResponseRequest) -> Result<ResponseEventStream> {
        let body = ResponsesApiRequest {
            model: request.model,
            instructions: request.instructions,
            input: request.input,
            stream: true,
            temperature: request.temperature,
            tools: request.tools,
            tool_choice: request.tool_choice,
            include: vec!["reasoning.encrypted_content".to_string()],
            store: false,
            text: TextOptions {
                verbosity: Some("medium"),
                format: None,
            },
            reasoning: request.reasoning_effort.map(|effort| ReasoningOptions {
                effort: Self::effort_str(effort),
                summary: Some("auto"),
            }),
            parallel_tool_calls: request.parallel_tool_calls,
        };

        let response = self.post(&body).await?;
        let event_stream = response.bytes_stream().eventsource();

        let converted: ResponseEventStream = Box::pin(event_stream.filter_map(|result| async move {
            match result {
                Ok(event) => {
                    if event.data == "[DONE]" {
                        return None;
                    }
                    match serde_json::from_str::<StreamChunk>(&event.data) {
                        Ok(chunk) => convert_chunk(chunk).map(Ok),
                        Err(e) => Some(Err(AgentError::llm(format!(
                            "Failed to parse stream chunk: {e}"
                        )))),
                    }
                }
                Err(e) => Some(Err(AgentError::llm(format!("Stream error: {e}")))),
            }
        }));

        Ok(converted)
    }

    async fn structured_output(&self, request: StructuredRequest) -> Result<StructuredResponse> {
        let body = ResponsesApiRequest {
            model: request.model,
            instructions: request.instructions,
            input: request.input,
            stream: false,
            temperature: None,
            tools: Vec::new(),
            tool_choice: None,
            include: Vec::new(),
            store: false,
            text: TextOptions {
                verbosity: None,
                format: Some(TextFormat {
                    kind: "json_schema",
                    name: request.schema_name,
                    schema: request.schema,
                    strict: true,
                }),
            },
            reasoning: request.reasoning_effort.map(|effort| ReasoningOptions {
                effort: Self::effort_str(effort),
                summary: None,
            }),
            parallel_tool_calls: None,
        };

        let response = self.post(&body).await?;
        let parsed: ResponseBody = response
            .json()
            .await
            .map_err(|e| AgentError::llm(format!("Invalid responses body: {e}")))?;

        let usage = parsed.usage.as_ref().map(|u| ResponseUsage {
            input_tokens: u.input_tokens,
            cached_input_tokens: u.cached_tokens(),
            output_tokens: u.output_tokens,
        });

        let text = output_text(&parsed.output).ok_or_else(|| {
            AgentError::structured("response carries no message output text")
        })?;
        let output: Value = serde_json::from_str(&text)
            .map_err(|e| AgentError::structured(format!("output is not the requested JSON: {e}")))?;

        Ok(StructuredResponse { output, usage })
    }
}

impl std::fmt::Debug for OpenAIResponsesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIResponsesClient")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Translate one wire chunk into a loop event; unknown kinds are skipped
fn convert_chunk(chunk: StreamChunk) -> Option<ResponseStreamEvent> {
    match chunk.kind.as_str() {
        EVENT_REASONING_PART_ADDED => Some(ResponseStreamEvent::ReasoningPartAdded {
            item_id: chunk.item_id?,
        }),
        EVENT_REASONING_TEXT_DELTA => Some(ResponseStreamEvent::ReasoningDelta {
            item_id: chunk.item_id?,
            delta: chunk.delta?,
        }),
        EVENT_REASONING_PART_DONE => Some(ResponseStreamEvent::ReasoningPartDone {
            item_id: chunk.item_id?,
        }),
        EVENT_CONTENT_PART_ADDED => Some(ResponseStreamEvent::ContentPartAdded {
            item_id: chunk.item_id?,
        }),
        EVENT_OUTPUT_TEXT_DELTA => Some(ResponseStreamEvent::OutputTextDelta {
            item_id: chunk.item_id?,
            delta: chunk.delta?,
        }),
        EVENT_CONTENT_PART_DONE => {
            let part = chunk.part?;
            Some(ResponseStreamEvent::ContentPartDone {
                item_id: chunk.item_id?,
                text: part.text.unwrap_or_default(),
            })
        }
        EVENT_OUTPUT_ITEM_ADDED => {
            let item = chunk.item?;
            if item.kind != "function_call" {
                return None;
            }
            Some(ResponseStreamEvent::FunctionCallAdded {
                item_id: item.id?,
                name: item.name?,
            })
        }
        EVENT_FUNCTION_ARGS_DELTA => Some(ResponseStreamEvent::FunctionCallArgumentsDelta {
            item_id: chunk.item_id?,
            delta: chunk.delta?,
        }),
        EVENT_OUTPUT_ITEM_DONE => {
            let item = chunk.item?;
            if item.kind != "function_call" {
                return None;
            }
            Some(ResponseStreamEvent::FunctionCallDone {
                item_id: item.id?,
                name: item.name?,
                arguments: item.arguments.unwrap_or_default(),
            })
        }
        EVENT_COMPLETED => {
            let usage = chunk.response.and_then(|r| r.usage).map(|u| ResponseUsage {
                input_tokens: u.input_tokens,
                cached_input_tokens: u.cached_tokens(),
                output_tokens: u.output_tokens,
            });
            Some(ResponseStreamEvent::Completed { usage })
        }
        _ => None,
    }
}

/// First message output text of a non-streaming response
fn output_text(output: &[Value]) -> Option<String> {
    output
        .iter()
        .find(|item| item.get("type").and_then(Value::as_str) == Some("message"))
        .and_then(|item| item.get("content"))
        .and_then(Value::as_array)
        .and_then(|content| {
            content
                .iter()
                .find_map(|part| part.get("text").and_then(Value::as_str))
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_convert_text_chunks() {
        let added: StreamChunk = serde_json::from_value(json!({
            "type": "response.content_part.added",
            "item_id": "item_1",
            "part": {"type": "output_text", "text": ""}
        }))
        .unwrap();
        assert_eq!(
            convert_chunk(added),
            Some(ResponseStreamEvent::ContentPartAdded {
                item_id: "item_1".into()
            })
        );

        let done: StreamChunk = serde_json::from_value(json!({
            "type": "response.content_part.done",
            "item_id": "item_1",
            "part": {"type": "output_text", "text": "Hello!"}
        }))
        .unwrap();
        assert_eq!(
            convert_chunk(done),
            Some(ResponseStreamEvent::ContentPartDone {
                item_id: "item_1".into(),
                text: "Hello!".into()
            })
        );
    }

    #[test]
    fn test_convert_function_call_chunks() {
        let added: StreamChunk = serde_json::from_value(json!({
            "type": "response.output_item.added",
            "item": {"type": "function_call", "id": "fc_1", "name": "get_weather"}
        }))
        .unwrap();
        assert_eq!(
            convert_chunk(added),
            Some(ResponseStreamEvent::FunctionCallAdded {
                item_id: "fc_1".into(),
                name: "get_weather".into()
            })
        );

        // Non function-call items (e.g. reasoning containers) are skipped
        let reasoning: StreamChunk = serde_json::from_value(json!({
            "type": "response.output_item.added",
            "item": {"type": "reasoning", "id": "rs_1"}
        }))
        .unwrap();
        assert_eq!(convert_chunk(reasoning), None);
    }

    #[test]
    fn test_convert_completed_carries_usage() {
        let chunk: StreamChunk = serde_json::from_value(json!({
            "type": "response.completed",
            "response": {
                "output": [],
                "usage": {
                    "input_tokens": 50,
                    "input_tokens_details": {"cached_tokens": 20},
                    "output_tokens": 9
                }
            }
        }))
        .unwrap();

        let Some(ResponseStreamEvent::Completed { usage: Some(usage) }) = convert_chunk(chunk)
        else {
            panic!("expected completed event with usage");
        };
        assert_eq!(usage.input_tokens, 50);
        assert_eq!(usage.cached_input_tokens, 20);
        assert_eq!(usage.output_tokens, 9);
    }

    #[test]
    fn test_unknown_chunk_is_skipped() {
        let chunk: StreamChunk =
            serde_json::from_value(json!({"type": "response.created"})).unwrap();
        assert_eq!(convert_chunk(chunk), None);
    }

    #[test]
    fn test_output_text_extraction() {
        let output = vec![
            json!({"type": "reasoning", "content": []}),
            json!({"type": "message", "content": [{"type": "output_text", "text": "{\"title\": \"Neuron talk\"}"}]}),
        ];
        assert_eq!(
            output_text(&output).unwrap(),
            "{\"title\": \"Neuron talk\"}"
        );
        assert!(output_text(&[]).is_none());
    }
}
