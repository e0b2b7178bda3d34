// Read access to the shared-state document

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::tools::{Tool, ToolError, ToolOutput};

/// Returns the current shared state so the model can reason about it before
/// editing
pub struct GetStateTool;

#[async_trait]
impl Tool for GetStateTool {
    fn name(&self) -> &str {
        "getstate"
    }

    fn name_frontend(&self) -> &str {
        "Get State"
    }

    fn description(&self) -> &str {
        "Read the current shared state of the page the user is on. Always call this before editstate if you do not already know the current state from a recent tool response."
    }

    fn description_frontend(&self) -> &str {
        "Inspect the current UI state."
    }

    fn utterances(&self) -> Vec<String> {
        vec![
            "Show the current configuration".to_string(),
            "What is in the state?".to_string(),
        ]
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}, "additionalProperties": false})
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        _call_id: &str,
        _arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        match ctx.shared_state() {
            Some(state) => Ok(ToolOutput::Text(state.to_string())),
            None => Err(ToolError::Execution(
                "No shared state was provided in the request body.".to_string(),
            )),
        }
    }
}
