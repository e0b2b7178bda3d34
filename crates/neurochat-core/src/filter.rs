// Tool filter
//
// Keeps the per-turn tool catalog small enough for the LLM to reason over.
// A cheap structured-output call looks at the recent conversation (tool
// outputs truncated to ellipses) and the whitelisted catalog, and returns
// the relevant subset plus a 0-10 complexity score used to pick the
// reasoning effort of the main call. Below the configured catalog size the
// call is skipped entirely.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AgentError, Result};
use crate::llm::{ReasoningEffort, ResponsesClient, StructuredRequest};
use crate::tokens::ResponseUsage;
use crate::tools::Tool;

const FILTER_INSTRUCTIONS: &str = "You select the minimal set of tools relevant to the conversation below, and rate the complexity of the user's latest request on a scale from 0 to 10. Select every tool that could plausibly be needed to answer, and none other. Tool outputs in the conversation have been elided.";

/// Result of running (or skipping) the filter
pub struct FilterOutcome {
    /// Admitted tools, in catalog order
    pub tools: Vec<Arc<dyn Tool>>,
    /// Names of the admitted tools, persisted as the message's tool selection
    pub selected_names: Vec<String>,
    pub complexity: Option<u8>,
    /// Reasoning effort tier derived from the complexity score
    pub reasoning: Option<ReasoningEffort>,
    /// Usage of the filter call itself, minted as tool-selection ledger rows
    pub usage: Option<ResponseUsage>,
}

impl std::fmt::Debug for FilterOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterOutcome")
            .field("selected_names", &self.selected_names)
            .field("complexity", &self.complexity)
            .field("reasoning", &self.reasoning)
            .finish()
    }
}

#[derive(Deserialize)]
struct FilterOutput {
    selected_tools: Vec<String>,
    complexity: u8,
}

/// Map the complexity score onto a reasoning effort tier
pub fn effort_for_complexity(complexity: u8) -> ReasoningEffort {
    match complexity {
        0..=6 => ReasoningEffort::Low,
        7..=8 => ReasoningEffort::Medium,
        _ => ReasoningEffort::High,
    }
}

/// Conversation-seeded tool selection
pub struct ToolFilter {
    client: Arc<dyn ResponsesClient>,
    /// Model used for the selection call itself
    model: String,
    /// Catalog sizes at or below this skip the call
    min_tool_selection: usize,
}

impl ToolFilter {
    pub fn new(
        client: Arc<dyn ResponsesClient>,
        model: impl Into<String>,
        min_tool_selection: usize,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            min_tool_selection,
        }
    }

    /// Narrow the catalog for the conversation at hand.
    ///
    /// `history` is the LLM input list synthesized from persisted parts.
    pub async fn filter(
        &self,
        history: &[Value],
        tools: Vec<Arc<dyn Tool>>,
    ) -> Result<FilterOutcome> {
        if tools.len() <= self.min_tool_selection {
            let selected_names = tools.iter().map(|t| t.name().to_string()).collect();
            return Ok(FilterOutcome {
                tools,
                selected_names,
                complexity: None,
                reasoning: None,
                usage: None,
            });
        }

        let input = truncate_tool_outputs(history);
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        let catalog: String = tools
            .iter()
            .map(|t| format!("{}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n");

        let schema = json!({
            "type": "object",
            "properties": {
                "selected_tools": {
                    "type": "array",
                    "items": {"type": "string", "enum": names},
                    "minItems": 1,
                    "description": "Names of all of the tools relevant to the conversation."
                },
                "complexity": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": 10,
                    "description": "Complexity of the query on a scale from 0 to 10."
                }
            },
            "required": ["selected_tools", "complexity"],
            "additionalProperties": false
        });

        let request = StructuredRequest {
            model: self.model.clone(),
            instructions: format!("{FILTER_INSTRUCTIONS}\n\nAvailable tools:\n{catalog}"),
            input,
            schema_name: "tool_filtering".to_string(),
            schema,
            reasoning_effort: Some(ReasoningEffort::Minimal),
        };

        let response = self.client.structured_output(request).await?;
        let output: FilterOutput = serde_json::from_value(response.output)
            .map_err(|e| AgentError::structured(format!("tool filter output: {e}")))?;

        let selected: Vec<Arc<dyn Tool>> = tools
            .iter()
            .filter(|t| output.selected_tools.iter().any(|n| n == t.name()))
            .cloned()
            .collect();
        let selected_names = selected.iter().map(|t| t.name().to_string()).collect();

        tracing::debug!(
            selected = ?output.selected_tools,
            complexity = output.complexity,
            "Tool filter ran"
        );

        Ok(FilterOutcome {
            tools: selected,
            selected_names,
            complexity: Some(output.complexity),
            reasoning: Some(effort_for_complexity(output.complexity)),
            usage: response.usage,
        })
    }
}

/// Clone the history with function call outputs elided to save tokens
fn truncate_tool_outputs(history: &[Value]) -> Vec<Value> {
    history
        .iter()
        .map(|item| {
            if item.get("type").and_then(Value::as_str) == Some("function_call_output") {
                let mut item = item.clone();
                item["output"] = Value::String("...".to_string());
                item
            } else {
                item.clone()
            }
        })
        .collect()
}
