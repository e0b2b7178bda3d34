// In-memory conversation model
//
// The agent loop works on plain structs loaded from storage at the start of a
// request and committed back after the stream ends. Each message owns an
// ordered, dense list of parts; a part payload is the provider response item
// for that part type and doubles as the LLM history entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::tokens::TokenConsumption;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// The four kinds of response items a part can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartType {
    Message,
    Reasoning,
    FunctionCall,
    FunctionCallOutput,
}

impl PartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartType::Message => "message",
            PartType::Reasoning => "reasoning",
            PartType::FunctionCall => "function_call",
            PartType::FunctionCallOutput => "function_call_output",
        }
    }
}

/// One ordered fragment of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePart {
    pub id: Uuid,
    pub part_type: PartType,
    /// Provider response item for this part type; opaque to storage
    pub payload: Value,
    pub order_index: i32,
    /// Tri-state HIL flag: None = not required / pending, Some(true) accepted,
    /// Some(false) rejected
    pub validated: Option<bool>,
    pub created_at: DateTime<Utc>,
}

/// One turn of a thread, with its parts and accounting records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub role: MessageRole,
    pub created_at: DateTime<Utc>,
    pub parts: Vec<MessagePart>,
    pub token_consumption: Vec<TokenConsumption>,
    /// Tool names admitted by the filter for the request that produced this
    /// assistant message
    pub tool_selection: Vec<String>,
    /// How many leading parts are already stored; commit only writes beyond
    /// this index (non-zero when a HIL-interrupted message is reopened)
    pub persisted_parts: usize,
}

impl ChatMessage {
    fn new(thread_id: Uuid, role: MessageRole) -> Self {
        Self {
            id: Uuid::now_v7(),
            thread_id,
            role,
            created_at: Utc::now(),
            parts: Vec::new(),
            token_consumption: Vec::new(),
            tool_selection: Vec::new(),
            persisted_parts: 0,
        }
    }

    /// Create a user message carrying a single text part
    pub fn user(thread_id: Uuid, text: impl Into<String>) -> Self {
        let mut message = Self::new(thread_id, MessageRole::User);
        message.push_part(
            PartType::Message,
            json!({
                "type": "message",
                "role": "user",
                "content": [{"type": "input_text", "text": text.into()}],
                "status": "completed",
            }),
        );
        message
    }

    /// Create an empty assistant message the loop will accumulate parts into
    pub fn assistant(thread_id: Uuid) -> Self {
        Self::new(thread_id, MessageRole::Assistant)
    }

    /// Append a part, assigning the next dense order index
    pub fn push_part(&mut self, part_type: PartType, payload: Value) -> &MessagePart {
        let part = MessagePart {
            id: Uuid::now_v7(),
            part_type,
            payload,
            order_index: self.parts.len() as i32,
            validated: None,
            created_at: Utc::now(),
        };
        self.parts.push(part);
        // Just pushed, cannot be empty
        self.parts.last().unwrap_or_else(|| unreachable!())
    }

    /// Concatenated text of all MESSAGE parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter(|p| p.part_type == PartType::Message)
            .filter_map(|p| p.payload.get("content"))
            .filter_map(|c| c.as_array())
            .flatten()
            .filter_map(|c| c.get("text").and_then(Value::as_str))
            .collect()
    }

    /// An assistant message is complete once it ends in terminal text; a
    /// suspended one ends in a function call (or its injected output)
    pub fn is_complete(&self) -> bool {
        if self.role != MessageRole::Assistant {
            return true;
        }
        matches!(
            self.parts.last(),
            Some(part) if part.part_type == PartType::Message
        )
    }

    /// Function calls without a matching output part, in order
    pub fn unanswered_function_calls(&self) -> Vec<FunctionCallRef> {
        let answered: Vec<&str> = self
            .parts
            .iter()
            .filter(|p| p.part_type == PartType::FunctionCallOutput)
            .filter_map(|p| p.payload.get("call_id").and_then(Value::as_str))
            .collect();

        self.parts
            .iter()
            .filter(|p| p.part_type == PartType::FunctionCall)
            .filter_map(|p| {
                let call_id = p.payload.get("call_id").and_then(Value::as_str)?;
                if answered.contains(&call_id) {
                    return None;
                }
                Some(FunctionCallRef {
                    call_id: call_id.to_string(),
                    name: p
                        .payload
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    arguments: p
                        .payload
                        .get("arguments")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect()
    }
}

/// A function call extracted from persisted parts
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallRef {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

// ============================================================================
// Part payload builders + history synthesis
// ============================================================================

/// Assistant text item
pub fn message_item(text: &str) -> Value {
    json!({
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "status": "completed",
    })
}

/// Function call item; `call_id` is the server-minted UUID
pub fn function_call_item(name: &str, call_id: &str, arguments: &str) -> Value {
    json!({
        "type": "function_call",
        "call_id": call_id,
        "name": name,
        "arguments": arguments,
        "status": "completed",
    })
}

/// Function call output item
pub fn function_call_output_item(call_id: &str, output: &str, status: &str) -> Value {
    json!({
        "type": "function_call_output",
        "call_id": call_id,
        "output": output,
        "status": status,
    })
}

/// Replay persisted parts as the LLM input list.
///
/// Part payloads already are provider response items, so history synthesis is
/// plain concatenation in (message, part) order.
pub fn history_from_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .flat_map(|m| m.parts.iter())
        .map(|p| p.payload.clone())
        .collect()
}
