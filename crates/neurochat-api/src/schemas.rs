// Public DTOs for the HTTP surface

use chrono::{DateTime, Utc};
use neurochat_core::message::{ChatMessage, MessageRole, PartType};
use neurochat_storage::models::ThreadRow;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

// ============================================
// Threads
// ============================================

fn default_title() -> String {
    "New chat".to_string()
}

/// Request to create a thread
#[derive(Debug, Deserialize, ToSchema)]
pub struct ThreadCreate {
    #[serde(default = "default_title")]
    pub title: String,
    pub virtual_lab_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
}

impl Default for ThreadCreate {
    fn default() -> Self {
        Self {
            title: default_title(),
            virtual_lab_id: None,
            project_id: None,
        }
    }
}

/// Request to update a thread (title only for now)
#[derive(Debug, Deserialize, ToSchema)]
pub struct ThreadUpdate {
    pub title: String,
}

/// Thread as returned by the API
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ThreadsRead {
    pub thread_id: Uuid,
    pub user_id: Uuid,
    pub vlab_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub title: String,
    pub creation_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
}

impl From<ThreadRow> for ThreadsRead {
    fn from(row: ThreadRow) -> Self {
        Self {
            thread_id: row.id,
            user_id: row.user_id,
            vlab_id: row.vlab_id,
            project_id: row.project_id,
            title: row.title,
            creation_date: row.creation_date,
            update_date: row.update_date,
        }
    }
}

fn default_page_size() -> i64 {
    20
}

/// Query parameters of the thread listing
#[derive(Debug, Deserialize)]
pub struct ThreadListQuery {
    pub virtual_lab_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub exclude_empty: bool,
    pub creation_date_lte: Option<DateTime<Utc>>,
    pub creation_date_gte: Option<DateTime<Utc>>,
    /// One of update_date, -update_date, creation_date, -creation_date
    pub sort: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    /// Sort-column value echoed from the previous page
    pub cursor: Option<DateTime<Utc>>,
}

/// Query parameters of the message listing
#[derive(Debug, Deserialize)]
pub struct MessageListQuery {
    /// Restrict to "user" or "assistant" messages
    pub entity: Option<String>,
    /// creation_date or -creation_date
    pub sort: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    pub cursor: Option<DateTime<Utc>>,
    #[serde(default)]
    pub vercel_format: bool,
}

/// Cursor-paginated response wrapper
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub next_cursor: Option<DateTime<Utc>>,
    pub has_more: bool,
    pub page_size: i64,
    pub results: Vec<T>,
}

impl<T> PaginatedResponse<T> {
    /// Trim a page fetched with limit page_size + 1 and compute the cursor
    pub fn from_rows(
        mut rows: Vec<T>,
        page_size: i64,
        cursor_of: impl Fn(&T) -> DateTime<Utc>,
    ) -> Self {
        let has_more = rows.len() as i64 > page_size;
        if has_more {
            rows.truncate(page_size as usize);
        }
        Self {
            next_cursor: rows.last().map(&cursor_of),
            has_more,
            page_size,
            results: rows,
        }
    }
}

// ============================================
// Messages
// ============================================

/// One persisted part
#[derive(Debug, Serialize, ToSchema)]
pub struct PartRead {
    pub part_id: Uuid,
    #[serde(rename = "type")]
    pub part_type: String,
    #[schema(value_type = Object)]
    pub payload: Value,
    pub order_index: i32,
    pub validated: Option<bool>,
    pub creation_date: DateTime<Utc>,
}

/// Message with its parts
#[derive(Debug, Serialize, ToSchema)]
pub struct MessagesRead {
    pub message_id: Uuid,
    pub entity: String,
    pub thread_id: Uuid,
    pub creation_date: DateTime<Utc>,
    pub parts: Vec<PartRead>,
}

impl From<&ChatMessage> for MessagesRead {
    fn from(message: &ChatMessage) -> Self {
        Self {
            message_id: message.id,
            entity: message.role.as_str().to_string(),
            thread_id: message.thread_id,
            creation_date: message.created_at,
            parts: message
                .parts
                .iter()
                .map(|p| PartRead {
                    part_id: p.id,
                    part_type: p.part_type.as_str().to_string(),
                    payload: p.payload.clone(),
                    order_index: p.order_index,
                    validated: p.validated,
                    creation_date: p.created_at,
                })
                .collect(),
        }
    }
}

// ============================================
// Vercel message format
// ============================================

#[derive(Debug, Serialize, ToSchema)]
pub struct ToolCallVercel {
    #[serde(rename = "toolCallId")]
    pub tool_call_id: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    #[schema(value_type = Object)]
    pub args: Value,
    /// "call" while pending, "result" once the output exists
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "type")]
pub enum VercelPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool-invocation")]
    ToolInvocation {
        #[serde(rename = "toolInvocation")]
        tool_invocation: ToolCallVercel,
    },
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnnotationVercel {
    #[serde(rename = "toolCallId", skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<String>,
    #[serde(rename = "isComplete")]
    pub is_complete: bool,
}

/// Message in the shape the Vercel AI SDK UI consumes
#[derive(Debug, Serialize, ToSchema)]
pub struct MessagesReadVercel {
    pub id: Uuid,
    pub role: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<VercelPart>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<AnnotationVercel>>,
}

/// HIL validation state shown to the UI
fn validated_label(hil: bool, validated: Option<bool>) -> String {
    if !hil {
        return "not_required".to_string();
    }
    match validated {
        None => "pending".to_string(),
        Some(true) => "accepted".to_string(),
        Some(false) => "rejected".to_string(),
    }
}

/// Convert one persisted message into the Vercel UI shape.
///
/// `hil_by_tool` maps tool names to their HIL flag, used to label tool-call
/// annotations.
pub fn vercel_from_message(
    message: &ChatMessage,
    hil_by_tool: &HashMap<String, bool>,
) -> MessagesReadVercel {
    if message.role == MessageRole::User {
        return MessagesReadVercel {
            id: message.id,
            role: "user".to_string(),
            created_at: message.created_at,
            content: message.text(),
            parts: None,
            annotations: None,
        };
    }

    let outputs: HashMap<&str, &str> = message
        .parts
        .iter()
        .filter(|p| p.part_type == PartType::FunctionCallOutput)
        .filter_map(|p| {
            Some((
                p.payload.get("call_id")?.as_str()?,
                p.payload.get("output")?.as_str()?,
            ))
        })
        .collect();

    let mut parts = Vec::new();
    let mut annotations = Vec::new();

    for part in &message.parts {
        match part.part_type {
            PartType::Message => {
                let text: String = part
                    .payload
                    .get("content")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|c| c.get("text").and_then(Value::as_str))
                    .collect();
                parts.push(VercelPart::Text { text });
            }
            PartType::FunctionCall => {
                let call_id = part
                    .payload
                    .get("call_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let tool_name = part
                    .payload
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let args = part
                    .payload
                    .get("arguments")
                    .and_then(Value::as_str)
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or(Value::Object(Default::default()));

                let result = outputs.get(call_id.as_str()).map(|s| s.to_string());
                let hil = hil_by_tool.get(&tool_name).copied().unwrap_or(false);

                annotations.push(AnnotationVercel {
                    tool_call_id: Some(call_id.clone()),
                    message_id: None,
                    validated: Some(validated_label(hil, part.validated)),
                    is_complete: result.is_some(),
                });
                parts.push(VercelPart::ToolInvocation {
                    tool_invocation: ToolCallVercel {
                        tool_call_id: call_id,
                        tool_name,
                        args,
                        state: if result.is_some() { "result" } else { "call" }.to_string(),
                        result,
                    },
                });
            }
            PartType::Reasoning | PartType::FunctionCallOutput => {}
        }
    }

    annotations.push(AnnotationVercel {
        tool_call_id: None,
        message_id: Some(message.id.to_string()),
        validated: None,
        is_complete: message.unanswered_function_calls().is_empty(),
    });

    MessagesReadVercel {
        id: message.id,
        role: "assistant".to_string(),
        created_at: message.created_at,
        content: message.text(),
        parts: Some(parts),
        annotations: Some(annotations),
    }
}

// ============================================
// Search
// ============================================

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchMessagesResult {
    pub thread_id: Uuid,
    pub message_id: Uuid,
    pub title: String,
    pub content: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchMessagesList {
    pub result_list: Vec<SearchMessagesResult>,
}

// ============================================
// Chat / QA
// ============================================

/// Body of the streamed chat request
#[derive(Debug, Deserialize, ToSchema)]
pub struct ClientRequest {
    pub content: String,
    /// Explicit tool pre-selection from the frontend
    pub tool_selection: Option<Vec<String>>,
    /// Page the user sent the request from
    pub frontend_url: Option<String>,
    /// Shared-state document for the state tools
    #[schema(value_type = Object)]
    pub shared_state: Option<Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ThreadGenerateBody {
    pub first_user_message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct QuestionsSuggestionsRequest {
    pub thread_id: Option<Uuid>,
    /// Pages the user visited, most recent last
    pub click_history: Option<Vec<String>>,
    pub frontend_url: Option<String>,
}

/// Exactly three suggested user actions
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QuestionsSuggestions {
    pub suggestions: Vec<String>,
}

/// Whitelisted LLM model descriptor
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
}

// ============================================
// HIL validation
// ============================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct ExecuteToolCallRequest {
    /// "accept" or "reject"
    pub validation: String,
    /// Replacement arguments, used only on accept
    pub args: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExecuteToolCallResponse {
    pub status: String,
}

/// A tool call awaiting user validation
#[derive(Debug, Serialize, ToSchema)]
pub struct HILResponse {
    pub message: String,
    pub name: String,
    #[schema(value_type = Object)]
    pub inputs: Value,
    pub tool_call_id: String,
}
