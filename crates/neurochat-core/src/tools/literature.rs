// Literature search
//
// Forwards the query to the literature service and, when an LLM client is
// available, reranks the hits with a small structured call. The rerank usage
// is reported into the context usage map under this call's id, so the loop
// mints call-within-tool ledger rows for it.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::context::ToolContext;
use crate::llm::{ReasoningEffort, ResponsesClient, StructuredRequest};
use crate::tokens::ToolTokenUsage;
use crate::tools::{Tool, ToolError, ToolOutput};

fn default_retriever_k() -> u32 {
    8
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LiteratureSearchInput {
    /// Query to match against the article index.
    pub query: String,
    /// Number of articles to retrieve.
    #[serde(default = "default_retriever_k")]
    pub retriever_k: u32,
}

#[derive(Deserialize)]
struct RerankOutput {
    ranked_indices: Vec<usize>,
}

/// Search scientific literature relevant to the conversation
pub struct LiteratureSearchTool {
    /// Model used for the rerank call; None disables reranking
    rerank_model: Option<String>,
}

impl LiteratureSearchTool {
    pub fn new(rerank_model: Option<String>) -> Self {
        Self { rerank_model }
    }

    /// Rerank article hits and report the usage under this call id
    async fn rerank(
        &self,
        llm: &Arc<dyn ResponsesClient>,
        model: &str,
        ctx: &ToolContext,
        call_id: &str,
        query: &str,
        articles: Vec<Value>,
    ) -> Vec<Value> {
        let titles: Vec<String> = articles
            .iter()
            .enumerate()
            .map(|(i, a)| {
                format!(
                    "{i}: {}",
                    a.get("title").and_then(Value::as_str).unwrap_or("untitled")
                )
            })
            .collect();

        let request = StructuredRequest {
            model: model.to_string(),
            instructions: "Order the following articles from most to least relevant to the query. Return the zero-based indices in ranked order.".to_string(),
            input: vec![json!({
                "type": "message",
                "role": "user",
                "content": [{"type": "input_text", "text": format!("Query: {query}\n\nArticles:\n{}", titles.join("\n"))}],
            })],
            schema_name: "article_rerank".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "ranked_indices": {
                        "type": "array",
                        "items": {"type": "integer", "minimum": 0}
                    }
                },
                "required": ["ranked_indices"],
                "additionalProperties": false
            }),
            reasoning_effort: Some(ReasoningEffort::Minimal),
        };

        let response = match llm.structured_output(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Article rerank failed, keeping retrieval order");
                return articles;
            }
        };

        if let Some(usage) = &response.usage {
            ctx.record_usage(
                call_id,
                ToolTokenUsage {
                    model: model.to_string(),
                    input_cached: usage.cached_input_tokens,
                    input_noncached: usage.input_tokens - usage.cached_input_tokens,
                    completion: usage.output_tokens,
                },
            );
        }

        match serde_json::from_value::<RerankOutput>(response.output) {
            Ok(rerank) => {
                let mut ordered = Vec::with_capacity(articles.len());
                let mut taken = vec![false; articles.len()];
                for index in rerank.ranked_indices {
                    if index < articles.len() && !taken[index] {
                        taken[index] = true;
                        ordered.push(articles[index].clone());
                    }
                }
                for (index, article) in articles.iter().enumerate() {
                    if !taken[index] {
                        ordered.push(article.clone());
                    }
                }
                ordered
            }
            Err(_) => articles,
        }
    }
}

#[async_trait]
impl Tool for LiteratureSearchTool {
    fn name(&self) -> &str {
        "literature-search"
    }

    fn name_frontend(&self) -> &str {
        "Literature Search"
    }

    fn description(&self) -> &str {
        "Search the scientific literature for articles matching a query. Use this tool whenever the user needs published evidence, references, or paper summaries."
    }

    fn utterances(&self) -> Vec<String> {
        vec![
            "Find papers about layer 5 pyramidal neurons".to_string(),
            "Search the literature for dendritic spine plasticity".to_string(),
        ]
    }

    fn input_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(LiteratureSearchInput)).unwrap_or_default()
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        call_id: &str,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let input: LiteratureSearchInput = serde_json::from_value(arguments)
            .map_err(|e| ToolError::Execution(format!("Invalid input: {e}")))?;

        let response = ctx
            .http_client
            .get(&ctx.endpoints.literature_url)
            .query(&[
                ("query", input.query.as_str()),
                ("retriever_k", &input.retriever_k.to_string()),
            ])
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("The literature service is unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Execution(format!(
                "The literature service returned {status}: {body}"
            )));
        }

        let mut articles: Vec<Value> = response
            .json()
            .await
            .map_err(|e| ToolError::Execution(format!("Could not parse literature response: {e}")))?;

        if let (Some(llm), Some(model)) = (&ctx.llm, &self.rerank_model) {
            articles = self
                .rerank(llm, model, ctx, call_id, &input.query, articles)
                .await;
        }

        serde_json::to_string(&articles)
            .map(ToolOutput::Text)
            .map_err(|e| ToolError::Execution(e.to_string()))
    }
}
