// Endpoints for the agent's question answering pipeline

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::StreamExt;
use neurochat_core::agent::Agent;
use neurochat_core::agent_loop::{AgentLoop, LoopConfig};
use neurochat_core::filter::ToolFilter;
use neurochat_core::llm::StructuredRequest;
use neurochat_core::message::{history_from_messages, ChatMessage, MessageRole};
use neurochat_core::tokens::{consumption_from_usage, TaskKind};
use regex::Regex;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::auth::validate_project;
use crate::config::Settings;
use crate::error::ApiError;
use crate::rate_limit::RateLimitInfo;
use crate::schemas::*;
use crate::state::AppState;
use crate::threads::rate_limit_headers;

const SYSTEM_PROMPT: &str = "# NEUROSCIENCE AI ASSISTANT

You are a neuroscience AI assistant for an open brain research platform. You help researchers explore brain data, run analyses, and navigate the platform. Use the available tools whenever they can ground your answer in platform data, cite tool outputs rather than inventing values, and keep answers concise and technical.";

/// Create QA routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/qa/chat_streamed/:thread_id", post(stream_chat_agent))
        .route("/qa/question_suggestions", post(question_suggestions))
        .route("/qa/models", get(get_available_models))
        .route("/rate_limit", get(get_rate_limit))
        .with_state(state)
}

/// POST /qa/chat_streamed/{thread_id} - Run the agent loop over SSE
#[utoipa::path(
    post,
    path = "/qa/chat_streamed/{thread_id}",
    request_body = ClientRequest,
    responses(
        (status = 200, description = "SSE stream of agent output frames"),
        (status = 404, description = "Thread not found"),
        (status = 413, description = "Query too large"),
        (status = 429, description = "Rate limited outside a project")
    ),
    tag = "qa"
)]
pub async fn stream_chat_agent(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ClientRequest>,
) -> Result<Response, ApiError> {
    let (user, token) = state.authenticate(&headers).await?;
    let thread = state.get_thread(&user, thread_id).await?;

    let (limit_headers, rate_limited) = state
        .rate_limiter
        .check(
            "/qa/chat_streamed/{thread_id}",
            &thread.user_id.to_string(),
            state.settings.rate_limiter.limit_chat,
            state.settings.rate_limiter.expiry_chat,
        )
        .await?;
    if rate_limited {
        match (thread.vlab_id, thread.project_id) {
            // Inside a project the request switches to billable mode
            (Some(_), Some(project_id)) => {
                state.accounting.oneshot(thread.user_id, project_id, 1).await?;
            }
            _ => return Err(ApiError::RateLimited(limit_headers)),
        }
    }

    if body.content.chars().count() > state.settings.misc.query_max_size {
        return Err(ApiError::PayloadTooLarge(format!(
            "Query string has {} characters. Maximum allowed is {}.",
            body.content.chars().count(),
            state.settings.misc.query_max_size
        )));
    }

    let mut conversation = state.db.load_conversation(thread_id).await?;

    // HIL resume: the last message is a suspended assistant message (no
    // terminal text yet). The filter is not re-run; its previous selection is
    // reused so the catalog stays stable across the interruption.
    let resume = matches!(
        conversation.last(),
        Some(last) if last.role == MessageRole::Assistant && !last.is_complete()
    );

    let catalog = state.registry.tools().to_vec();
    let (tools, filter_meta) = if resume {
        let last_id = conversation
            .last()
            .map(|m| m.id)
            .unwrap_or_else(Uuid::now_v7);
        let previous = state.db.tool_selection_for_message(last_id).await?;
        let tools = if previous.is_empty() {
            catalog
        } else {
            state.registry.select(&previous)
        };
        (tools, None)
    } else {
        conversation.push(ChatMessage::user(thread_id, &body.content));

        let preselected = match &body.tool_selection {
            Some(names) => state.registry.select(names),
            None => catalog,
        };
        let filter = ToolFilter::new(
            state.llm.clone(),
            state.settings.llm.filter_model.clone(),
            state.settings.tools.min_tool_selection,
        );
        let history = history_from_messages(&conversation);
        let outcome = filter.filter(&history, preselected).await?;
        (
            outcome.tools.clone(),
            Some((outcome.selected_names, outcome.reasoning, outcome.usage)),
        )
    };

    let instructions = format!(
        "{SYSTEM_PROMPT}\n\n# CURRENT CONTEXT\n\nCurrent time: {}",
        Utc::now().to_rfc3339()
    );
    let mut agent = Agent::new("agent", instructions, state.settings.llm.default_model.clone())
        .with_tools(tools);
    agent.temperature = state.settings.llm.temperature;
    if let Some((_, Some(effort), _)) = &filter_meta {
        agent.reasoning = Some(*effort);
    }

    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ctx = state.build_tool_context(
        &thread,
        &user,
        &token,
        body.frontend_url.clone(),
        body.shared_state.clone(),
        request_id,
    );

    let config = LoopConfig {
        max_turns: state.settings.agent.max_turns,
        max_parallel_tool_calls: state.settings.agent.max_parallel_tool_calls,
        model_override: None,
    };

    let (tx, rx) = mpsc::channel::<String>(64);
    let agent_loop = AgentLoop::new(state.llm.clone());
    let db = state.db.clone();
    let filter_model = state.settings.llm.filter_model.clone();

    // The loop streams into the channel; once it returns (normally, on HIL
    // suspension, or on client disconnect) the conversation is committed in
    // the background. A commit failure is logged, never surfaced: the client
    // is already gone or already has its [DONE].
    tokio::spawn(async move {
        if let Err(e) = agent_loop
            .stream(agent, &mut conversation, &ctx, &config, &tx)
            .await
        {
            tracing::error!(error = %e, %thread_id, "Agent loop failed");
        }
        drop(tx);

        // The assistant message built this request sits last; on client
        // disconnect it was discarded and there is nothing to attach to.
        if let Some((selected_names, _, usage)) = filter_meta {
            if let Some(message) = conversation
                .last_mut()
                .filter(|m| m.role == MessageRole::Assistant)
            {
                message.tool_selection = selected_names;
                message.token_consumption.extend(consumption_from_usage(
                    usage.as_ref(),
                    &filter_model,
                    TaskKind::ToolSelection,
                ));
            }
        }

        if let Err(e) = db.commit_conversation(&conversation).await {
            tracing::error!(error = %e, %thread_id, "Failed to commit conversation");
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-vercel-ai-data-stream", "v1");
    for (name, value) in rate_limit_headers(&limit_headers) {
        if let Some(name) = name {
            builder = builder.header(name, value);
        }
    }

    builder
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.into()))
}

#[derive(Debug, serde::Deserialize)]
pub struct SuggestionsQuery {
    pub vlab_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
}

/// POST /qa/question_suggestions - Three suggested user actions
#[utoipa::path(
    post,
    path = "/qa/question_suggestions",
    request_body = QuestionsSuggestionsRequest,
    responses(
        (status = 200, description = "Exactly three suggested actions", body = QuestionsSuggestions),
        (status = 422, description = "Neither thread nor click history provided"),
        (status = 429, description = "Rate limited")
    ),
    tag = "qa"
)]
pub async fn question_suggestions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SuggestionsQuery>,
    Json(body): Json<QuestionsSuggestionsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (user, _) = state.authenticate(&headers).await?;

    let limit = if query.vlab_id.is_some() && query.project_id.is_some() {
        validate_project(&user.groups, query.vlab_id, query.project_id)?;
        state.settings.rate_limiter.limit_suggestions_inside
    } else {
        state.settings.rate_limiter.limit_suggestions_outside
    };

    let (limit_headers, rate_limited) = state
        .rate_limiter
        .check(
            "/qa/question_suggestions",
            &user.sub.to_string(),
            limit,
            state.settings.rate_limiter.expiry_suggestions,
        )
        .await?;
    if rate_limited {
        return Err(ApiError::RateLimited(limit_headers));
    }

    // Conversation-driven when the thread has messages, journey-driven
    // otherwise
    let mut conversation_input: Vec<Value> = Vec::new();
    if let Some(thread_id) = body.thread_id {
        state.get_thread(&user, thread_id).await?;
        let conversation = state.db.load_conversation(thread_id).await?;
        conversation_input = history_from_messages(&conversation)
            .into_iter()
            .map(|mut item| {
                // Tool outputs are elided to save tokens
                if item.get("type").and_then(Value::as_str) == Some("function_call_output") {
                    item["output"] = Value::String("...".to_string());
                }
                item
            })
            .collect();
    }
    let in_chat = !conversation_input.is_empty();

    if !in_chat && body.click_history.as_deref().unwrap_or_default().is_empty() {
        return Err(ApiError::unprocessable(
            "One of 'thread_id' or 'click_history' must be provided.",
        ));
    }

    let tool_info: Vec<String> = state
        .registry
        .tools()
        .iter()
        .map(|t| format!("{}: {}", t.name(), t.description_frontend()))
        .collect();

    let (instructions, input) = if in_chat {
        (
            format!(
                "Generate exactly three user actions advancing the conversation below, each targeting a significantly different aspect of its main topic. Phrase every action as a user instruction in imperative mood (\"Show...\", \"Find...\", \"Analyze...\"), never as a question and never from the assistant's perspective. Only suggest actions the available tools can perform, reuse entity ids already present in the conversation where appropriate, and do not repeat actions already carried out. Do not suggest exporting or downloading data.\n\nAvailable tools:\n{}",
                tool_info.join(", ")
            ),
            conversation_input,
        )
    } else {
        let journey = body.click_history.unwrap_or_default().join("\n");
        (
            format!(
                "Generate exactly three user actions based on the user's navigation journey below, each targeting a significantly different aspect. Phrase every action as a user instruction in imperative mood, never as a question. At least one action MUST be literature-related (such as searching for papers or finding publications), using general keywords rather than database ids. Mention entity ids explicitly when the journey exposes them; refer to brain regions by name. Only suggest actions the available tools can perform, and do not suggest exporting or downloading data. Current time: {}.\n\nAvailable tools:\n{}",
                Utc::now().to_rfc3339(),
                tool_info.join(", ")
            ),
            vec![json!({
                "type": "message",
                "role": "user",
                "content": [{"type": "input_text", "text": format!("USER JOURNEY:\n{journey}")}],
            })],
        )
    };

    let model = state.settings.llm.suggestion_model.clone();
    let request = StructuredRequest {
        model: model.clone(),
        instructions,
        input,
        schema_name: "questions_suggestions".to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "suggestions": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 3,
                    "maxItems": 3
                }
            },
            "required": ["suggestions"],
            "additionalProperties": false
        }),
        reasoning_effort: Settings::structured_effort(&model),
    };

    let response = state.llm.structured_output(request).await?;
    let suggestions: QuestionsSuggestions = serde_json::from_value(response.output)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("suggestion output: {e}")))?;

    Ok((rate_limit_headers(&limit_headers), Json(suggestions)))
}

/// GET /qa/models - Whitelisted LLM model descriptors
#[utoipa::path(
    get,
    path = "/qa/models",
    responses(
        (status = 200, description = "Available models", body = [ModelDescriptor])
    ),
    tag = "qa"
)]
pub async fn get_available_models(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ModelDescriptor>>, ApiError> {
    state.authenticate(&headers).await?;

    let models = state
        .models
        .get_or_try_init(|| fetch_openrouter_models(&state))
        .await?;

    Ok(Json(models.clone()))
}

/// Fetch and whitelist the router's model list; cached after the first call
async fn fetch_openrouter_models(state: &AppState) -> Result<Vec<ModelDescriptor>, ApiError> {
    let response = state
        .http
        .get("https://openrouter.ai/api/v1/models")
        .send()
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("model list fetch: {e}")))?;

    if !response.status().is_success() {
        return Err(ApiError::Internal(anyhow::anyhow!(
            "Something went wrong. Could not retrieve list of models."
        )));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("model list body: {e}")))?;

    let whitelist = Regex::new(&state.settings.llm.whitelisted_model_ids_regex)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("model whitelist regex: {e}")))?;

    let models = body["data"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|m| {
            Some(ModelDescriptor {
                id: m.get("id")?.as_str()?.to_string(),
                name: m
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        })
        .filter(|m| whitelist.is_match(&m.id))
        .collect();

    Ok(models)
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct RateLimitStatus {
    pub chat_streamed: RateLimitInfo,
    pub question_suggestions: RateLimitInfo,
    pub generate_title: RateLimitInfo,
}

/// GET /rate_limit - Current usage snapshot, without consuming quota
#[utoipa::path(
    get,
    path = "/rate_limit",
    responses(
        (status = 200, description = "Counters for the rate limited routes", body = RateLimitStatus)
    ),
    tag = "qa"
)]
pub async fn get_rate_limit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SuggestionsQuery>,
) -> Result<Json<RateLimitStatus>, ApiError> {
    let (user, _) = state.authenticate(&headers).await?;

    let in_project = query.vlab_id.is_some() && query.project_id.is_some();
    let limits = &state.settings.rate_limiter;
    let suggestions_limit = if in_project {
        limits.limit_suggestions_inside
    } else {
        limits.limit_suggestions_outside
    };

    let sub = user.sub.to_string();
    let status = RateLimitStatus {
        chat_streamed: state
            .rate_limiter
            .snapshot("/qa/chat_streamed/{thread_id}", &sub, limits.limit_chat)
            .await?,
        question_suggestions: state
            .rate_limiter
            .snapshot("/qa/question_suggestions", &sub, suggestions_limit)
            .await?,
        generate_title: state
            .rate_limiter
            .snapshot(
                "/threads/{thread_id}/generate_title",
                &sub,
                limits.limit_title,
            )
            .await?,
    };

    Ok(Json(status))
}
