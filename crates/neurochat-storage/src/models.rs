// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use neurochat_core::message::{ChatMessage, MessagePart, MessageRole, PartType};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================
// Thread models
// ============================================

/// Thread row from database
#[derive(Debug, Clone, FromRow)]
pub struct ThreadRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub vlab_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub title: String,
    pub creation_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
}

/// Input for creating a new thread
#[derive(Debug, Clone)]
pub struct CreateThread {
    pub user_id: Uuid,
    pub title: String,
    pub vlab_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
}

/// Sort column for thread listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSortColumn {
    CreationDate,
    UpdateDate,
}

impl ThreadSortColumn {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ThreadSortColumn::CreationDate => "creation_date",
            ThreadSortColumn::UpdateDate => "update_date",
        }
    }
}

/// Filter and pagination inputs for thread listings
#[derive(Debug, Clone)]
pub struct ListThreads {
    pub user_id: Uuid,
    pub vlab_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub exclude_empty: bool,
    pub creation_date_lte: Option<DateTime<Utc>>,
    pub creation_date_gte: Option<DateTime<Utc>>,
    pub sort: ThreadSortColumn,
    pub descending: bool,
    /// Sort-column value of the last row from the previous page
    pub cursor: Option<DateTime<Utc>>,
    /// Caller asks for page_size + 1 to detect more pages
    pub limit: i64,
}

// ============================================
// Message and part models
// ============================================

/// Message row from database
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub entity: String,
    pub creation_date: DateTime<Utc>,
}

/// Part row from database
#[derive(Debug, Clone, FromRow)]
pub struct PartRow {
    pub id: Uuid,
    pub message_id: Uuid,
    pub order_index: i32,
    pub part_type: String,
    pub payload: sqlx::types::JsonValue,
    pub validated: Option<bool>,
    pub creation_date: DateTime<Utc>,
}

/// Filter and pagination inputs for message listings
#[derive(Debug, Clone, Default)]
pub struct ListMessages {
    /// Restrict to these entities ("user" / "assistant"); empty means all
    pub entities: Vec<String>,
    pub descending: bool,
    pub cursor: Option<DateTime<Utc>>,
    pub limit: i64,
}

/// Token consumption row
#[derive(Debug, Clone, FromRow)]
pub struct TokenConsumptionRow {
    pub id: Uuid,
    pub message_id: Uuid,
    pub token_type: String,
    pub task: String,
    pub count: i64,
    pub model: String,
}

/// Tool selection row
#[derive(Debug, Clone, FromRow)]
pub struct ToolSelectionRow {
    pub id: Uuid,
    pub message_id: Uuid,
    pub tool_name: String,
}

/// One full-text search hit (top-ranked message of a thread)
#[derive(Debug, Clone, FromRow)]
pub struct SearchHitRow {
    pub thread_id: Uuid,
    pub message_id: Uuid,
    pub title: String,
}

// ============================================
// Row <-> conversation model conversion
// ============================================

/// Build the in-memory message from its rows; the loaded parts count is
/// remembered so a later commit only appends new parts.
pub fn message_from_rows(message: &MessageRow, parts: &[PartRow]) -> ChatMessage {
    let role = match message.entity.as_str() {
        "user" => MessageRole::User,
        _ => MessageRole::Assistant,
    };

    let parts: Vec<MessagePart> = parts
        .iter()
        .map(|p| MessagePart {
            id: p.id,
            part_type: part_type_from_str(&p.part_type),
            payload: p.payload.clone(),
            order_index: p.order_index,
            validated: p.validated,
            created_at: p.creation_date,
        })
        .collect();

    ChatMessage {
        id: message.id,
        thread_id: message.thread_id,
        role,
        created_at: message.creation_date,
        persisted_parts: parts.len(),
        parts,
        token_consumption: Vec::new(),
        tool_selection: Vec::new(),
    }
}

pub fn part_type_from_str(value: &str) -> PartType {
    match value {
        "reasoning" => PartType::Reasoning,
        "function_call" => PartType::FunctionCall,
        "function_call_output" => PartType::FunctionCallOutput,
        _ => PartType::Message,
    }
}
