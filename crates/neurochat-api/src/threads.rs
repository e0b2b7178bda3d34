// Thread CRUD HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use neurochat_core::llm::StructuredRequest;
use neurochat_core::message::PartType;
use neurochat_storage::models::{CreateThread, ListMessages, ListThreads, ThreadSortColumn};
use neurochat_storage::{message_from_rows, purge_thread_objects};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::auth::validate_project;
use crate::config::Settings;
use crate::error::ApiError;
use crate::rate_limit::RateLimitHeaders;
use crate::schemas::*;
use crate::state::AppState;

/// Create thread routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/threads", post(create_thread).get(get_threads))
        .route("/threads/search", get(search))
        .route(
            "/threads/:thread_id",
            get(get_thread_by_id)
                .patch(update_thread_title)
                .delete(delete_thread),
        )
        .route(
            "/threads/:thread_id/generate_title",
            patch(generate_title),
        )
        .route("/threads/:thread_id/messages", get(get_thread_messages))
        .with_state(state)
}

/// POST /threads - Create a new thread
#[utoipa::path(
    post,
    path = "/threads",
    request_body = ThreadCreate,
    responses(
        (status = 200, description = "Thread created", body = ThreadsRead),
        (status = 403, description = "Not a member of the project")
    ),
    tag = "threads"
)]
pub async fn create_thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<ThreadCreate>>,
) -> Result<Json<ThreadsRead>, ApiError> {
    let (user, _) = state.authenticate(&headers).await?;
    let body = body.map(|Json(b)| b).unwrap_or_default();

    // The vlab/project pair is fixed at creation and authoritative afterwards
    validate_project(&user.groups, body.virtual_lab_id, body.project_id)?;

    let row = state
        .db
        .create_thread(CreateThread {
            user_id: user.sub,
            title: body.title,
            vlab_id: body.virtual_lab_id,
            project_id: body.project_id,
        })
        .await?;

    Ok(Json(row.into()))
}

/// GET /threads - Paginated thread listing
#[utoipa::path(
    get,
    path = "/threads",
    responses(
        (status = 200, description = "One page of threads")
    ),
    tag = "threads"
)]
pub async fn get_threads(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ThreadListQuery>,
) -> Result<Json<PaginatedResponse<ThreadsRead>>, ApiError> {
    let (user, _) = state.authenticate(&headers).await?;
    validate_project(&user.groups, query.virtual_lab_id, query.project_id)?;

    let sort = query.sort.as_deref().unwrap_or("-update_date");
    let descending = sort.starts_with('-');
    let column = match sort.trim_start_matches('-') {
        "creation_date" => ThreadSortColumn::CreationDate,
        "update_date" => ThreadSortColumn::UpdateDate,
        other => {
            return Err(ApiError::unprocessable(format!(
                "Unknown sort column: {other}"
            )))
        }
    };

    let rows = state
        .db
        .list_threads(ListThreads {
            user_id: user.sub,
            vlab_id: query.virtual_lab_id,
            project_id: query.project_id,
            exclude_empty: query.exclude_empty,
            creation_date_lte: query.creation_date_lte,
            creation_date_gte: query.creation_date_gte,
            sort: column,
            descending,
            cursor: query.cursor,
            limit: query.page_size + 1,
        })
        .await?;

    let page = PaginatedResponse::from_rows(rows, query.page_size, |row| match column {
        ThreadSortColumn::CreationDate => row.creation_date,
        ThreadSortColumn::UpdateDate => row.update_date,
    });

    Ok(Json(PaginatedResponse {
        next_cursor: page.next_cursor,
        has_more: page.has_more,
        page_size: page.page_size,
        results: page.results.into_iter().map(ThreadsRead::from).collect(),
    }))
}

#[derive(Debug, serde::Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub virtual_lab_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    #[serde(default = "default_search_limit")]
    pub limit: i64,
}

fn default_search_limit() -> i64 {
    20
}

/// GET /threads/search - Cross-thread full-text message search
#[utoipa::path(
    get,
    path = "/threads/search",
    responses(
        (status = 200, description = "Top-ranked message per matching thread", body = SearchMessagesList)
    ),
    tag = "threads"
)]
pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchMessagesList>, ApiError> {
    let (user, _) = state.authenticate(&headers).await?;
    validate_project(&user.groups, query.virtual_lab_id, query.project_id)?;

    let hits = state
        .db
        .search_messages(
            user.sub,
            query.virtual_lab_id,
            query.project_id,
            &query.query,
            query.limit,
        )
        .await?;

    let message_ids: Vec<Uuid> = hits.iter().map(|h| h.message_id).collect();
    let parts = state.db.list_parts(&message_ids).await?;

    let result_list = hits
        .into_iter()
        .map(|hit| {
            // Content preview: text of the hit message's last MESSAGE part
            let content = parts
                .iter()
                .filter(|p| p.message_id == hit.message_id)
                .filter(|p| p.part_type == PartType::Message.as_str())
                .last()
                .and_then(|p| {
                    p.payload
                        .get("content")
                        .and_then(Value::as_array)
                        .and_then(|c| c.first())
                        .and_then(|c| c.get("text"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                });
            SearchMessagesResult {
                thread_id: hit.thread_id,
                message_id: hit.message_id,
                title: hit.title,
                content,
            }
        })
        .collect();

    Ok(Json(SearchMessagesList { result_list }))
}

/// PATCH /threads/{thread_id}/generate_title - LLM-generated thread title
#[utoipa::path(
    patch,
    path = "/threads/{thread_id}/generate_title",
    request_body = ThreadGenerateBody,
    responses(
        (status = 200, description = "Thread with its generated title", body = ThreadsRead),
        (status = 429, description = "Rate limited")
    ),
    tag = "threads"
)]
pub async fn generate_title(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ThreadGenerateBody>,
) -> Result<impl IntoResponse, ApiError> {
    let (user, _) = state.authenticate(&headers).await?;
    let thread = state.get_thread(&user, thread_id).await?;

    let (limit_headers, rate_limited) = state
        .rate_limiter
        .check(
            "/threads/{thread_id}/generate_title",
            &thread.user_id.to_string(),
            state.settings.rate_limiter.limit_title,
            state.settings.rate_limiter.expiry_title,
        )
        .await?;
    if rate_limited {
        return Err(ApiError::RateLimited(limit_headers));
    }

    let model = state.settings.llm.suggestion_model.clone();
    let request = StructuredRequest {
        model: model.clone(),
        instructions: "Given the user's first message of a conversation, generate a short title for this conversation (max 5 words).".to_string(),
        input: vec![json!({
            "type": "message",
            "role": "user",
            "content": [{"type": "input_text", "text": body.first_user_message}],
        })],
        schema_name: "thread_title".to_string(),
        schema: json!({
            "type": "object",
            "properties": {"title": {"type": "string"}},
            "required": ["title"],
            "additionalProperties": false
        }),
        reasoning_effort: Settings::structured_effort(&model),
    };

    let title = match state.llm.structured_output(request).await {
        Ok(response) => response.output["title"].as_str().map(str::to_string),
        Err(e) => {
            tracing::warn!(error = %e, "Unable to generate title.");
            None
        }
    };

    let row = match title {
        Some(title) => state
            .db
            .update_thread_title(thread_id, &title)
            .await?
            .ok_or_else(ApiError::thread_not_found)?,
        None => thread,
    };

    Ok((rate_limit_headers(&limit_headers), Json(ThreadsRead::from(row))))
}

/// GET /threads/{thread_id} - Thread metadata
#[utoipa::path(
    get,
    path = "/threads/{thread_id}",
    responses(
        (status = 200, description = "Thread found", body = ThreadsRead),
        (status = 404, description = "Thread not found")
    ),
    tag = "threads"
)]
pub async fn get_thread_by_id(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ThreadsRead>, ApiError> {
    let (user, _) = state.authenticate(&headers).await?;
    let thread = state.get_thread(&user, thread_id).await?;
    Ok(Json(thread.into()))
}

/// PATCH /threads/{thread_id} - Update the title
#[utoipa::path(
    patch,
    path = "/threads/{thread_id}",
    request_body = ThreadUpdate,
    responses(
        (status = 200, description = "Updated thread", body = ThreadsRead),
        (status = 404, description = "Thread not found")
    ),
    tag = "threads"
)]
pub async fn update_thread_title(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ThreadUpdate>,
) -> Result<Json<ThreadsRead>, ApiError> {
    let (user, _) = state.authenticate(&headers).await?;
    state.get_thread(&user, thread_id).await?;

    let row = state
        .db
        .update_thread_title(thread_id, &body.title)
        .await?
        .ok_or_else(ApiError::thread_not_found)?;

    Ok(Json(row.into()))
}

/// DELETE /threads/{thread_id} - Cascade delete plus storage purge
#[utoipa::path(
    delete,
    path = "/threads/{thread_id}",
    responses(
        (status = 200, description = "Thread deleted"),
        (status = 404, description = "Thread not found")
    ),
    tag = "threads"
)]
pub async fn delete_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let (user, _) = state.authenticate(&headers).await?;
    state.get_thread(&user, thread_id).await?;

    // DB first; the storage purge below is deliberately outside the
    // transaction, so a failure there leaks objects instead of resurrecting
    // the thread.
    let deleted = state.db.delete_thread(thread_id).await?;
    if !deleted {
        return Err(ApiError::thread_not_found());
    }

    if let Err(e) = purge_thread_objects(state.storage.as_ref(), user.sub, thread_id).await {
        tracing::error!(error = %e, %thread_id, "Storage purge failed after thread delete");
    }

    Ok(Json(json!({"Acknowledged": "true"})))
}

/// GET /threads/{thread_id}/messages - Paginated messages with parts
#[utoipa::path(
    get,
    path = "/threads/{thread_id}/messages",
    responses(
        (status = 200, description = "One page of messages"),
        (status = 404, description = "Thread not found")
    ),
    tag = "threads"
)]
pub async fn get_thread_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    headers: HeaderMap,
    Query(query): Query<MessageListQuery>,
) -> Result<axum::response::Response, ApiError> {
    let (user, _) = state.authenticate(&headers).await?;
    state.get_thread(&user, thread_id).await?;

    let sort = query.sort.as_deref().unwrap_or("-creation_date");
    let descending = sort.starts_with('-') || query.vercel_format;

    let rows = state
        .db
        .list_messages(
            thread_id,
            ListMessages {
                entities: query
                    .entity
                    .iter()
                    .map(|e| e.to_lowercase())
                    .collect(),
                descending,
                cursor: query.cursor,
                limit: query.page_size + 1,
            },
        )
        .await?;

    let page = PaginatedResponse::from_rows(rows, query.page_size, |row| row.creation_date);
    let ids: Vec<Uuid> = page.results.iter().map(|m| m.id).collect();
    let parts = state.db.list_parts(&ids).await?;

    let messages: Vec<_> = page
        .results
        .iter()
        .map(|row| {
            let message_parts: Vec<_> = parts
                .iter()
                .filter(|p| p.message_id == row.id)
                .cloned()
                .collect();
            message_from_rows(row, &message_parts)
        })
        .collect();

    if query.vercel_format {
        let hil_by_tool: HashMap<String, bool> = state
            .registry
            .tools()
            .iter()
            .map(|t| (t.name().to_string(), t.hil()))
            .collect();
        let results: Vec<MessagesReadVercel> = messages
            .iter()
            .map(|m| vercel_from_message(m, &hil_by_tool))
            .collect();
        return Ok(Json(PaginatedResponse {
            next_cursor: page.next_cursor,
            has_more: page.has_more,
            page_size: page.page_size,
            results,
        })
        .into_response());
    }

    let results: Vec<MessagesRead> = messages.iter().map(MessagesRead::from).collect();
    Ok(Json(PaginatedResponse {
        next_cursor: page.next_cursor,
        has_more: page.has_more,
        page_size: page.page_size,
        results,
    })
    .into_response())
}

/// Build the X-RateLimit-* header map attached to successful responses
pub fn rate_limit_headers(headers: &RateLimitHeaders) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers.as_pairs() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            map.insert(name, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&RateLimitHeaders::exposed_names()) {
        map.insert("Access-Control-Expose-Headers", value);
    }
    map
}
