// Agent handoff tool
//
// Returning an Agent from a tool run transfers control: the dispatcher
// surfaces it to the loop, which swaps the active agent for the remaining
// turns of the request.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::Agent;
use crate::context::ToolContext;
use crate::tools::{Tool, ToolError, ToolOutput};

/// Hands the conversation over to a fixed target agent
pub struct HandoffTool {
    name: String,
    name_frontend: String,
    description: String,
    target: Agent,
}

impl HandoffTool {
    pub fn new(target: Agent, description: impl Into<String>) -> Self {
        Self {
            name: format!("handoff-to-{}", target.name),
            name_frontend: format!("To {}", target.name),
            description: description.into(),
            target,
        }
    }
}

#[async_trait]
impl Tool for HandoffTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn name_frontend(&self) -> &str {
        &self.name_frontend
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}, "additionalProperties": false})
    }

    async fn run(
        &self,
        _ctx: &ToolContext,
        _call_id: &str,
        _arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::Handoff(self.target.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_returns_target_agent() {
        let target = Agent::new("simulation-agent", "You run simulations.", "gpt-5-mini");
        let tool = HandoffTool::new(target, "Handoff to the simulation agent.");

        assert_eq!(tool.name(), "handoff-to-simulation-agent");

        let ctx = ToolContext::new(Uuid::now_v7(), Uuid::now_v7());
        let output = tool.run(&ctx, "c1", json!({})).await.unwrap();
        let ToolOutput::Handoff(agent) = output else {
            panic!("expected handoff");
        };
        assert_eq!(agent.name, "simulation-agent");
    }
}
