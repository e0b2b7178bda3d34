// Streaming wire protocol
//
// The chat endpoint emits a sequence of SSE frames, each `data: <json>\n\n`,
// terminated by `data: [DONE]\n\n`. Frame order mirrors the LLM event order;
// `toolCallId` is always the server-minted UUID, never the provider id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal SSE sentinel
pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// One frame of the output stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamFrame {
    Start {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    StartStep,
    FinishStep,
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ToolInputStart {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
    },
    ToolInputDelta {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "inputTextDelta")]
        input_text_delta: String,
    },
    ToolInputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },
    ToolOutputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        output: String,
    },
    Finish {
        #[serde(rename = "messageMetadata", skip_serializing_if = "Option::is_none")]
        message_metadata: Option<FinishMetadata>,
    },
}

/// Metadata attached to the `finish` frame when the loop suspends on
/// human-in-the-loop tool calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishMetadata {
    #[serde(rename = "toolCalls")]
    pub tool_calls: Vec<PendingToolCallAnnotation>,
}

/// A tool call waiting for user validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingToolCallAnnotation {
    #[serde(rename = "toolCallId")]
    pub tool_call_id: String,
    pub validated: String,
    #[serde(rename = "isComplete")]
    pub is_complete: bool,
}

impl PendingToolCallAnnotation {
    pub fn pending(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            validated: "pending".to_string(),
            is_complete: true,
        }
    }
}

impl StreamFrame {
    /// Render the frame as an SSE data line
    pub fn to_sse(&self) -> String {
        // Serialization of these shapes cannot fail; fall back to an empty
        // object rather than poisoning the stream.
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {json}\n\n")
    }

    pub fn finish() -> Self {
        StreamFrame::Finish {
            message_metadata: None,
        }
    }

    pub fn finish_with_pending(pending: Vec<PendingToolCallAnnotation>) -> Self {
        StreamFrame::Finish {
            message_metadata: Some(FinishMetadata {
                tool_calls: pending,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_type_tags() {
        let cases = [
            (
                StreamFrame::Start {
                    message_id: "msg_1".into(),
                },
                json!({"type": "start", "messageId": "msg_1"}),
            ),
            (StreamFrame::StartStep, json!({"type": "start-step"})),
            (StreamFrame::FinishStep, json!({"type": "finish-step"})),
            (
                StreamFrame::ReasoningDelta {
                    id: "rs_1".into(),
                    delta: "thinking".into(),
                },
                json!({"type": "reasoning-delta", "id": "rs_1", "delta": "thinking"}),
            ),
            (
                StreamFrame::TextDelta {
                    id: "item_1".into(),
                    delta: "Hi".into(),
                },
                json!({"type": "text-delta", "id": "item_1", "delta": "Hi"}),
            ),
            (
                StreamFrame::ToolInputStart {
                    tool_call_id: "abc".into(),
                    tool_name: "get_weather".into(),
                },
                json!({"type": "tool-input-start", "toolCallId": "abc", "toolName": "get_weather"}),
            ),
            (
                StreamFrame::ToolOutputAvailable {
                    tool_call_id: "abc".into(),
                    output: "sunny".into(),
                },
                json!({"type": "tool-output-available", "toolCallId": "abc", "output": "sunny"}),
            ),
        ];

        for (frame, expected) in cases {
            let value = serde_json::to_value(&frame).unwrap();
            assert_eq!(value, expected);
        }
    }

    #[test]
    fn test_finish_without_metadata_omits_field() {
        let value = serde_json::to_value(StreamFrame::finish()).unwrap();
        assert_eq!(value, json!({"type": "finish"}));
    }

    #[test]
    fn test_finish_with_pending_tool_calls() {
        let frame =
            StreamFrame::finish_with_pending(vec![PendingToolCallAnnotation::pending("call_9")]);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "finish",
                "messageMetadata": {
                    "toolCalls": [
                        {"toolCallId": "call_9", "validated": "pending", "isComplete": true}
                    ]
                }
            })
        );
    }

    #[test]
    fn test_sse_framing() {
        let sse = StreamFrame::StartStep.to_sse();
        assert_eq!(sse, "data: {\"type\":\"start-step\"}\n\n");
        assert_eq!(SSE_DONE, "data: [DONE]\n\n");
    }
}
