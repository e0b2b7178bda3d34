// App state shared across routers

use std::sync::Arc;

use axum::http::HeaderMap;
use neurochat_core::context::{ServiceEndpoints, ToolContext};
use neurochat_core::llm::ResponsesClient;
use neurochat_core::tools::ToolRegistry;
use neurochat_storage::models::ThreadRow;
use neurochat_storage::{Database, ObjectStorage};
use reqwest::header::{HeaderMap as ReqwestHeaders, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::accounting::AccountingClient;
use crate::auth::{bearer_token, get_user_info, validate_project, UserInfo};
use crate::config::Settings;
use crate::error::ApiError;
use crate::rate_limit::RateLimiter;
use crate::schemas::ModelDescriptor;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub storage: Arc<dyn ObjectStorage>,
    pub llm: Arc<dyn ResponsesClient>,
    pub registry: ToolRegistry,
    pub rate_limiter: RateLimiter,
    pub accounting: AccountingClient,
    pub settings: Arc<Settings>,
    /// Plain client for identity-provider calls
    pub http: reqwest::Client,
    /// Whitelisted model list, fetched once
    pub models: Arc<OnceCell<Vec<ModelDescriptor>>>,
}

impl AppState {
    /// Resolve the caller from the bearer token
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<(UserInfo, String), ApiError> {
        let token = bearer_token(headers)?;
        let user = get_user_info(&self.http, &self.settings.keycloak, &token).await?;
        Ok((user, token))
    }

    /// Load a thread owned by the caller and check its project scope.
    ///
    /// Missing and not-owned threads are indistinguishable.
    pub async fn get_thread(
        &self,
        user: &UserInfo,
        thread_id: Uuid,
    ) -> Result<ThreadRow, ApiError> {
        let thread = self
            .db
            .get_thread_for_user(user.sub, thread_id)
            .await?
            .ok_or_else(ApiError::thread_not_found)?;

        validate_project(&user.groups, thread.vlab_id, thread.project_id)?;
        Ok(thread)
    }

    /// Build the per-request context handed to tools
    pub fn build_tool_context(
        &self,
        thread: &ThreadRow,
        user: &UserInfo,
        token: &str,
        frontend_url: Option<String>,
        shared_state: Option<Value>,
        request_id: Option<String>,
    ) -> ToolContext {
        let mut default_headers = ReqwestHeaders::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            default_headers.insert(AUTHORIZATION, value);
        }
        let authed_client = reqwest::Client::builder()
            .default_headers(default_headers)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        ToolContext::new(thread.id, user.sub)
            .with_project(thread.vlab_id, thread.project_id)
            .with_http_client(authed_client)
            .with_llm(self.llm.clone())
            .with_endpoints(ServiceEndpoints {
                entitycore_url: self.settings.tools.entitycore_url.clone(),
                literature_url: self.settings.tools.literature_url.clone(),
                frontend_base_url: self.settings.tools.frontend_base_url.clone(),
            })
            .with_frontend_url(frontend_url)
            .with_shared_state(shared_state)
            .with_request_id(request_id)
    }
}
