// Per-request tool context
//
// Everything a tool may need from the surrounding request, passed explicitly:
// ids for scoping, the authenticated HTTP client, service endpoints, the
// client-supplied shared state, and the usage map sub-LLM tools report into.
//
// The usage and shared-state fields use std mutexes; tools only touch them
// between awaits and the dispatcher joins all tool tasks before the loop
// reads them, so writes happen-before reads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use uuid::Uuid;

use crate::llm::ResponsesClient;
use crate::tokens::ToolTokenUsage;

/// Base URLs of the platform services tools forward to
#[derive(Debug, Clone, Default)]
pub struct ServiceEndpoints {
    pub entitycore_url: String,
    pub literature_url: String,
    /// Base URL for deep links into the platform frontend
    pub frontend_base_url: String,
}

/// The per-request bag of clients, ids, and accumulators passed to tools
pub struct ToolContext {
    pub thread_id: Uuid,
    pub user_id: Uuid,
    pub vlab_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    /// Client pre-configured with the caller's bearer token
    pub http_client: reqwest::Client,
    /// LLM client for tools that run their own sub-LLM calls
    pub llm: Option<Arc<dyn ResponsesClient>>,
    pub endpoints: ServiceEndpoints,
    /// URL of the frontend page the user sent the request from
    pub current_frontend_url: Option<String>,
    pub request_id: Option<String>,
    /// Shared-state document round-tripping through the client; mutated by
    /// the state tools
    shared_state: Mutex<Option<Value>>,
    /// Sub-LLM usage reported by tools, keyed by server call id
    usage: Mutex<HashMap<String, ToolTokenUsage>>,
}

impl ToolContext {
    pub fn new(thread_id: Uuid, user_id: Uuid) -> Self {
        Self {
            thread_id,
            user_id,
            vlab_id: None,
            project_id: None,
            http_client: reqwest::Client::new(),
            llm: None,
            endpoints: ServiceEndpoints::default(),
            current_frontend_url: None,
            request_id: None,
            shared_state: Mutex::new(None),
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_project(mut self, vlab_id: Option<Uuid>, project_id: Option<Uuid>) -> Self {
        self.vlab_id = vlab_id;
        self.project_id = project_id;
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = client;
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn ResponsesClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_endpoints(mut self, endpoints: ServiceEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_frontend_url(mut self, url: Option<String>) -> Self {
        self.current_frontend_url = url;
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_shared_state(self, state: Option<Value>) -> Self {
        if let Ok(mut guard) = self.shared_state.lock() {
            *guard = state;
        }
        self
    }

    /// Current shared-state document, if the client sent one
    pub fn shared_state(&self) -> Option<Value> {
        self.shared_state.lock().ok().and_then(|guard| guard.clone())
    }

    /// Replace the shared-state document after a successful patch
    pub fn set_shared_state(&self, state: Value) {
        if let Ok(mut guard) = self.shared_state.lock() {
            *guard = Some(state);
        }
    }

    /// Record sub-LLM usage under the server call id
    pub fn record_usage(&self, call_id: &str, usage: ToolTokenUsage) {
        if let Ok(mut guard) = self.usage.lock() {
            guard.insert(call_id.to_string(), usage);
        }
    }

    /// Snapshot of all reported sub-LLM usage
    pub fn usage_snapshot(&self) -> HashMap<String, ToolTokenUsage> {
        self.usage.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("thread_id", &self.thread_id)
            .field("user_id", &self.user_id)
            .field("vlab_id", &self.vlab_id)
            .field("project_id", &self.project_id)
            .finish()
    }
}
