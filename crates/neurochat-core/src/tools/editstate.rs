// Shared-state editing through JSON-Patch operations

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::context::ToolContext;
use crate::state::{apply_patches, infer_return_urls, validate_partial_state, PatchOperation};
use crate::tools::{Tool, ToolError, ToolOutput};

const DESCRIPTION: &str = "Modify the shared state using JSONPatch operations.

**IMPORTANT:** Always work relative to the current state. If you don't know the current state, call `getstate` first. Never assume the state structure.

# Return Values
- `state`: The updated state after applying patches
- `url_links`: Links to pages where the updated state can be viewed (if the user is not already on those pages). If `url_links` is present, you MUST surface these links to the user in your final summary.

# Validation Strategy
This tool does NOT fully validate the state. The state can be partially filled and invalid after your changes; full validation is a separate concern. Work incrementally, split large changes into multiple calls, and use `null` as value to explicitly clear fields.";

/// Output of a successful edit
#[derive(Serialize)]
struct EditStateOutput {
    state: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    url_links: Option<HashMap<String, String>>,
}

/// Applies JSON-Patch operations to the request's shared state
pub struct EditStateTool;

#[async_trait]
impl Tool for EditStateTool {
    fn name(&self) -> &str {
        "editstate"
    }

    fn name_frontend(&self) -> &str {
        "Edit State"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn description_frontend(&self) -> &str {
        "Edit the current UI through the agent."
    }

    fn utterances(&self) -> Vec<String> {
        vec![
            "Update the configuration".to_string(),
            "Modify the state".to_string(),
            "Change the simulation parameters".to_string(),
        ]
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patches": {
                    "type": "array",
                    "minItems": 1,
                    "description": "JSONPatch operations applied sequentially to the state.",
                    "items": {
                        "type": "object",
                        "properties": {
                            "op": {
                                "type": "string",
                                "enum": ["add", "remove", "replace", "move", "copy", "test"],
                                "description": "Operation type."
                            },
                            "path": {
                                "type": "string",
                                "description": "JSONPointer path to the target location (e.g. '/smc_simulation_config/info/title')."
                            },
                            "value": {
                                "description": "Value for add/replace/test operations. Not used for remove."
                            },
                            "from": {
                                "type": "string",
                                "description": "Source path for move/copy operations."
                            }
                        },
                        "required": ["op", "path"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["patches"],
            "additionalProperties": false
        })
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        _call_id: &str,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let Some(state) = ctx.shared_state() else {
            return Err(ToolError::Execution(
                "No shared state was provided in the request body.\nThe editstate tool requires a state to modify.".to_string(),
            ));
        };

        let patches: Vec<PatchOperation> =
            serde_json::from_value(arguments["patches"].clone())
                .map_err(|e| ToolError::Execution(format!("Invalid patch list: {e}")))?;

        let updated = apply_patches(&state, &patches)
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        validate_partial_state(&updated).map_err(|e| ToolError::Execution(e.to_string()))?;

        ctx.set_shared_state(updated.clone());

        let url_links = infer_return_urls(
            &patches,
            &updated,
            ctx.current_frontend_url.as_deref(),
            ctx.request_id.as_deref(),
        );

        let output = EditStateOutput {
            state: updated,
            url_links,
        };
        serde_json::to_string(&output)
            .map(ToolOutput::Text)
            .map_err(|e| ToolError::Execution(e.to_string()))
    }
}
