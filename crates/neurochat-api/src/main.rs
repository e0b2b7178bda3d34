// Neurochat API server

mod accounting;
mod auth;
mod config;
mod error;
mod qa;
mod rate_limit;
mod schemas;
mod state;
mod threads;
mod tools;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use neurochat_core::mcp::{synthesize_mcp_tools, McpClient};
use neurochat_core::tools::{
    EditStateTool, GetStateTool, LiteratureSearchTool, MorphologyGetAllTool, MorphologyGetOneTool,
    Tool, ToolRegistry,
};
use neurochat_openai::OpenAIResponsesClient;
use neurochat_storage::{Database, MemoryStorage};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::accounting::AccountingClient;
use crate::config::Settings;
use crate::rate_limit::RateLimiter;
use crate::state::AppState;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        threads::create_thread,
        threads::get_threads,
        threads::search,
        threads::generate_title,
        threads::get_thread_by_id,
        threads::update_thread_title,
        threads::delete_thread,
        threads::get_thread_messages,
        qa::stream_chat_agent,
        qa::question_suggestions,
        qa::get_available_models,
        qa::get_rate_limit,
        tools::get_required_validation,
        tools::execute_tool_call,
    ),
    components(
        schemas(
            schemas::ThreadCreate,
            schemas::ThreadUpdate,
            schemas::ThreadsRead,
            schemas::MessagesRead,
            schemas::PartRead,
            schemas::MessagesReadVercel,
            schemas::SearchMessagesList,
            schemas::SearchMessagesResult,
            schemas::ClientRequest,
            schemas::ThreadGenerateBody,
            schemas::QuestionsSuggestionsRequest,
            schemas::QuestionsSuggestions,
            schemas::ModelDescriptor,
            schemas::ExecuteToolCallRequest,
            schemas::ExecuteToolCallResponse,
            schemas::HILResponse,
        )
    ),
    tags(
        (name = "threads", description = "Thread and message endpoints"),
        (name = "qa", description = "Agent chat and suggestion endpoints"),
        (name = "tools", description = "HIL tool validation endpoints")
    ),
    info(
        title = "Neurochat API",
        version = "0.3.0",
        description = "Conversational agent service for a neuroscience research platform"
    )
)]
struct ApiDoc;

/// Internal tools shipped with the service
fn internal_tools(settings: &Settings) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(GetStateTool),
        Arc::new(EditStateTool),
        Arc::new(LiteratureSearchTool::new(Some(
            settings.llm.filter_model.clone(),
        ))),
        Arc::new(MorphologyGetAllTool),
        Arc::new(MorphologyGetOneTool),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "neurochat_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let _ = dotenvy::dotenv();
    let settings = Arc::new(Settings::from_env());
    tracing::info!("neurochat-api starting...");

    // Database
    let database_url = settings
        .database_url
        .clone()
        .context("NEUROCHAT_DATABASE_URL environment variable required")?;
    let db = Database::from_url(&database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Connected to database");

    // Rate-limit store (optional; unlimited sentinels without it)
    let rate_limiter = match &settings.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).context("Invalid redis URL")?;
            let manager = redis::aio::ConnectionManager::new(client)
                .await
                .context("Failed to connect to redis")?;
            tracing::info!("Connected to rate-limit store");
            RateLimiter::new(Some(manager), settings.rate_limiter.disabled)
        }
        None => {
            tracing::warn!("No rate-limit store configured, requests are unlimited");
            RateLimiter::unlimited()
        }
    };

    // LLM driver
    let token = settings
        .llm
        .openai_token
        .clone()
        .context("NEUROCHAT_LLM__OPENAI_TOKEN environment variable required")?;
    let llm: Arc<dyn neurochat_core::llm::ResponsesClient> = match &settings.llm.openai_base_url {
        Some(base_url) => Arc::new(OpenAIResponsesClient::with_base_url(token, base_url.clone())),
        None => Arc::new(OpenAIResponsesClient::new(token)),
    };

    // Tool catalog: internal tools + MCP-synthesized tools, whitelisted
    let mcp_client = settings
        .mcp
        .server_url
        .clone()
        .map(|url| Arc::new(McpClient::new(url)));
    let mcp_tools = match synthesize_mcp_tools(mcp_client).await {
        Ok(tools) => tools,
        Err(e) => {
            tracing::warn!(error = %e, "MCP tool synthesis failed, continuing without");
            Vec::new()
        }
    };
    let whitelist = settings
        .tools
        .whitelisted_tool_regex
        .as_deref()
        .map(regex::Regex::new)
        .transpose()
        .context("Invalid tool whitelist regex")?;
    let registry = ToolRegistry::assemble(internal_tools(&settings), mcp_tools, whitelist.as_ref());
    tracing::info!(tools = ?registry.names(), "Tool registry assembled");

    let app_state = AppState {
        db,
        storage: Arc::new(MemoryStorage::new()),
        llm,
        registry,
        rate_limiter,
        accounting: AccountingClient::new(
            reqwest::Client::new(),
            settings.accounting.url.clone(),
            settings.accounting.disabled,
        ),
        settings: settings.clone(),
        http: reqwest::Client::new(),
        models: Arc::new(tokio::sync::OnceCell::new()),
    };

    // Build router
    let app = Router::new()
        .merge(threads::routes(app_state.clone()))
        .merge(qa::routes(app_state.clone()))
        .merge(tools::routes(app_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("0.0.0.0:{}", settings.misc.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
