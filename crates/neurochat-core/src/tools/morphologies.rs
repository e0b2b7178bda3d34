// Cell morphology entity forwarders
//
// Thin wrappers over the entity API. The interesting parts are the scoping
// rules: project headers are injected from the request context, and the
// brain-region hierarchy filter is stripped from the LLM-visible schema
// because it is controlled by the platform, not the model.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::context::ToolContext;
use crate::tools::{omit_properties, Tool, ToolError, ToolOutput};

/// Fields the caller is never allowed to set
const HIDDEN_FIELDS: &[&str] = &["within_brain_region_hierarchy_id"];

fn default_page_size() -> u32 {
    10
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MorphologyGetAllInput {
    /// Number of morphologies to return per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Case-insensitive partial match on the morphology name.
    #[serde(default)]
    pub name__ilike: Option<String>,
    /// Brain region hierarchy filter, injected by the platform.
    #[serde(default)]
    pub within_brain_region_hierarchy_id: Option<Uuid>,
}

/// Paginated listing of cell morphologies
pub struct MorphologyGetAllTool;

#[async_trait]
impl Tool for MorphologyGetAllTool {
    fn name(&self) -> &str {
        "morphology-getall"
    }

    fn name_frontend(&self) -> &str {
        "Get All Morphologies"
    }

    fn description(&self) -> &str {
        "Search a neuroscience database to retrieve cell morphologies and their metadata. The returned morphology ids can be fed to the morphology analysis tools."
    }

    fn utterances(&self) -> Vec<String> {
        vec![
            "Find morphologies in the thalamus".to_string(),
            "List the available cell morphologies".to_string(),
        ]
    }

    fn input_schema(&self) -> Value {
        let schema = serde_json::to_value(schemars::schema_for!(MorphologyGetAllInput))
            .unwrap_or_default();
        omit_properties(schema, HIDDEN_FIELDS)
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        _call_id: &str,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let input: MorphologyGetAllInput = serde_json::from_value(arguments)
            .map_err(|e| ToolError::Execution(format!("Invalid input: {e}")))?;

        let (Some(vlab_id), Some(project_id)) = (ctx.vlab_id, ctx.project_id) else {
            return Err(ToolError::Forbidden(
                "morphology queries require a project scope".to_string(),
            ));
        };

        let url = format!("{}/cell-morphology", ctx.endpoints.entitycore_url);
        let mut request = ctx
            .http_client
            .get(&url)
            .header("virtual-lab-id", vlab_id.to_string())
            .header("project-id", project_id.to_string())
            .query(&[("page_size", input.page_size.to_string())]);
        if let Some(name) = &input.name__ilike {
            request = request.query(&[("name__ilike", name)]);
        }

        forward(request).await
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MorphologyGetOneInput {
    /// ID of the morphology of interest.
    pub morphology_id: Uuid,
}

/// Single cell morphology by id
pub struct MorphologyGetOneTool;

#[async_trait]
impl Tool for MorphologyGetOneTool {
    fn name(&self) -> &str {
        "morphology-getone"
    }

    fn name_frontend(&self) -> &str {
        "Get One Morphology"
    }

    fn description(&self) -> &str {
        "Retrieve one cell morphology and all of its metadata by id."
    }

    fn input_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(MorphologyGetOneInput)).unwrap_or_default()
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        _call_id: &str,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let input: MorphologyGetOneInput = serde_json::from_value(arguments)
            .map_err(|e| ToolError::Execution(format!("Invalid input: {e}")))?;

        let (Some(vlab_id), Some(project_id)) = (ctx.vlab_id, ctx.project_id) else {
            return Err(ToolError::Forbidden(
                "morphology queries require a project scope".to_string(),
            ));
        };

        let url = format!(
            "{}/cell-morphology/{}",
            ctx.endpoints.entitycore_url, input.morphology_id
        );
        let request = ctx
            .http_client
            .get(&url)
            .header("virtual-lab-id", vlab_id.to_string())
            .header("project-id", project_id.to_string());

        forward(request).await
    }
}

/// Send the request and pass the entity API's body through verbatim
async fn forward(request: reqwest::RequestBuilder) -> Result<ToolOutput, ToolError> {
    let response = request
        .send()
        .await
        .map_err(|e| ToolError::Execution(format!("The entity service is unreachable: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ToolError::Execution(format!("Could not read entity response: {e}")))?;

    if !status.is_success() {
        return Err(ToolError::Execution(format!(
            "The entity service returned {status}: {body}"
        )));
    }
    Ok(ToolOutput::Text(body))
}
