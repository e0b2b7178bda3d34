// Configuration
//
// All settings come from NEUROCHAT_* environment variables (a .env file is
// loaded first). Every knob has a sensible default so a bare deployment only
// needs the database URL and an LLM token.

use neurochat_core::llm::ReasoningEffort;

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// LLM provider settings
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub openai_token: Option<String>,
    /// Responses-compatible endpoint; None means the OpenAI default
    pub openai_base_url: Option<String>,
    /// Model the chat agent runs on
    pub default_model: String,
    /// Cheap model for title generation and question suggestions
    pub suggestion_model: String,
    /// Cheap model for the tool filter
    pub filter_model: String,
    pub temperature: Option<f32>,
    /// Models exposed by GET /qa/models
    pub whitelisted_model_ids_regex: String,
}

/// Identity provider settings
#[derive(Debug, Clone)]
pub struct KeycloakSettings {
    pub issuer: String,
}

impl KeycloakSettings {
    pub fn user_info_endpoint(&self) -> String {
        format!("{}/protocol/openid-connect/userinfo", self.issuer)
    }
}

/// Per-route rate limiter settings
#[derive(Debug, Clone)]
pub struct RateLimiterSettings {
    pub disabled: bool,
    pub limit_chat: i64,
    pub expiry_chat: u64,
    pub limit_title: i64,
    pub expiry_title: u64,
    pub limit_suggestions_inside: i64,
    pub limit_suggestions_outside: i64,
    pub expiry_suggestions: u64,
}

/// Agent loop settings
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_turns: usize,
    pub max_parallel_tool_calls: usize,
}

/// Tool catalog and endpoint settings
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub entitycore_url: String,
    pub literature_url: String,
    pub frontend_base_url: String,
    /// Tools whose name matches are admitted to the catalog
    pub whitelisted_tool_regex: Option<String>,
    /// Catalog sizes at or below this skip the filter call
    pub min_tool_selection: usize,
}

/// MCP server settings
#[derive(Debug, Clone)]
pub struct McpSettings {
    pub server_url: Option<String>,
}

/// Accounting service settings
#[derive(Debug, Clone)]
pub struct AccountingSettings {
    pub url: Option<String>,
    pub disabled: bool,
}

/// Other settings
#[derive(Debug, Clone)]
pub struct MiscSettings {
    /// Query size limit, in characters
    pub query_max_size: usize,
    pub cors_origins: String,
    pub port: u16,
}

/// All settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub llm: LlmSettings,
    pub keycloak: KeycloakSettings,
    pub rate_limiter: RateLimiterSettings,
    pub agent: AgentSettings,
    pub tools: ToolSettings,
    pub mcp: McpSettings,
    pub accounting: AccountingSettings,
    pub misc: MiscSettings,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            database_url: env_opt("NEUROCHAT_DATABASE_URL"),
            redis_url: env_opt("NEUROCHAT_REDIS_URL"),
            llm: LlmSettings {
                openai_token: env_opt("NEUROCHAT_LLM__OPENAI_TOKEN")
                    .or_else(|| env_opt("OPENAI_API_KEY")),
                openai_base_url: env_opt("NEUROCHAT_LLM__OPENAI_BASE_URL"),
                default_model: env_string("NEUROCHAT_LLM__DEFAULT_MODEL", "gpt-5-mini"),
                suggestion_model: env_string("NEUROCHAT_LLM__SUGGESTION_MODEL", "gpt-5-nano"),
                filter_model: env_string("NEUROCHAT_LLM__FILTER_MODEL", "gpt-5-nano"),
                temperature: env_opt("NEUROCHAT_LLM__TEMPERATURE").and_then(|v| v.parse().ok()),
                whitelisted_model_ids_regex: env_string(
                    "NEUROCHAT_LLM__WHITELISTED_MODEL_IDS_REGEX",
                    r"^(openai/gpt-5.*|anthropic/claude.*)$",
                ),
            },
            keycloak: KeycloakSettings {
                issuer: env_string(
                    "NEUROCHAT_KEYCLOAK__ISSUER",
                    "https://openbluebrain.com/auth/realms/SBO",
                ),
            },
            rate_limiter: RateLimiterSettings {
                disabled: env_parse("NEUROCHAT_RATE_LIMITER__DISABLED", false),
                limit_chat: env_parse("NEUROCHAT_RATE_LIMITER__LIMIT_CHAT", 20),
                expiry_chat: env_parse("NEUROCHAT_RATE_LIMITER__EXPIRY_CHAT", 86_400),
                limit_title: env_parse("NEUROCHAT_RATE_LIMITER__LIMIT_TITLE", 10),
                expiry_title: env_parse("NEUROCHAT_RATE_LIMITER__EXPIRY_TITLE", 86_400),
                limit_suggestions_inside: env_parse(
                    "NEUROCHAT_RATE_LIMITER__LIMIT_SUGGESTIONS_INSIDE",
                    200,
                ),
                limit_suggestions_outside: env_parse(
                    "NEUROCHAT_RATE_LIMITER__LIMIT_SUGGESTIONS_OUTSIDE",
                    100,
                ),
                expiry_suggestions: env_parse("NEUROCHAT_RATE_LIMITER__EXPIRY_SUGGESTIONS", 86_400),
            },
            agent: AgentSettings {
                max_turns: env_parse("NEUROCHAT_AGENT__MAX_TURNS", 10),
                max_parallel_tool_calls: env_parse("NEUROCHAT_AGENT__MAX_PARALLEL_TOOL_CALLS", 5),
            },
            tools: ToolSettings {
                entitycore_url: env_string(
                    "NEUROCHAT_TOOLS__ENTITYCORE_URL",
                    "https://openbluebrain.com/api/entitycore",
                ),
                literature_url: env_string(
                    "NEUROCHAT_TOOLS__LITERATURE_URL",
                    "https://openbluebrain.com/api/literature",
                ),
                frontend_base_url: env_string(
                    "NEUROCHAT_TOOLS__FRONTEND_BASE_URL",
                    "https://openbluebrain.com",
                ),
                whitelisted_tool_regex: Some(env_string(
                    "NEUROCHAT_TOOLS__WHITELISTED_TOOL_REGEX",
                    ".*",
                )),
                min_tool_selection: env_parse("NEUROCHAT_TOOLS__MIN_TOOL_SELECTION", 10),
            },
            mcp: McpSettings {
                server_url: env_opt("NEUROCHAT_MCP__SERVER_URL"),
            },
            accounting: AccountingSettings {
                url: env_opt("NEUROCHAT_ACCOUNTING__URL"),
                disabled: env_parse("NEUROCHAT_ACCOUNTING__DISABLED", true),
            },
            misc: MiscSettings {
                query_max_size: env_parse("NEUROCHAT_MISC__QUERY_MAX_SIZE", 10_000),
                cors_origins: env_string("NEUROCHAT_MISC__CORS_ORIGINS", ""),
                port: env_parse("NEUROCHAT_MISC__PORT", 8078),
            },
        }
    }

    /// Reasoning effort for the cheap structured paths of a model
    pub fn structured_effort(model: &str) -> Option<ReasoningEffort> {
        model.contains("gpt-5").then_some(ReasoningEffort::Minimal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_info_endpoint() {
        let keycloak = KeycloakSettings {
            issuer: "https://great_issuer.com/auth/realms/SBO".to_string(),
        };
        assert_eq!(
            keycloak.user_info_endpoint(),
            "https://great_issuer.com/auth/realms/SBO/protocol/openid-connect/userinfo"
        );
    }

    #[test]
    fn test_structured_effort_only_for_reasoning_models() {
        assert_eq!(
            Settings::structured_effort("gpt-5-nano"),
            Some(ReasoningEffort::Minimal)
        );
        assert_eq!(Settings::structured_effort("gpt-4o-mini"), None);
    }
}
