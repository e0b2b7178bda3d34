// Agent configuration
//
// An agent is a named configuration the loop runs with: instructions, the
// admitted tool set, model and sampling parameters. Handoff tools return a
// different Agent to swap mid-loop.

use std::sync::Arc;

use crate::llm::ReasoningEffort;
use crate::tools::Tool;

/// A named agent configuration
#[derive(Clone)]
pub struct Agent {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub tools: Vec<Arc<dyn Tool>>,
    /// Forced tool choice; "none" disables tool calls entirely
    pub tool_choice: Option<String>,
    pub reasoning: Option<ReasoningEffort>,
    pub parallel_tool_calls: bool,
}

impl Agent {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            model: model.into(),
            temperature: None,
            tools: Vec::new(),
            tool_choice: None,
            reasoning: None,
            parallel_tool_calls: true,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_reasoning(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning = Some(effort);
        self
    }

    /// Look up a tool of this agent by name
    pub fn tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("reasoning", &self.reasoning)
            .finish()
    }
}
