// Tool call validation endpoints
//
// HIL tool calls suspend the agent loop; these routes let the user inspect
// pending calls and accept or reject them. Acceptance runs the tool outside
// the loop and appends its output part, so the next chat request resumes
// with a fully answered call list.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, patch},
    Json, Router,
};
use neurochat_core::dispatcher::{ToolCallRequest, ToolDispatcher};
use neurochat_core::message::{function_call_output_item, MessageRole, PartType};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;
use crate::schemas::{ExecuteToolCallRequest, ExecuteToolCallResponse, HILResponse};
use crate::state::AppState;

/// Create tool validation routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/tools/validation/:thread_id", get(get_required_validation))
        .route(
            "/tools/:thread_id/execute/:tool_call_id",
            patch(execute_tool_call),
        )
        .with_state(state)
}

/// GET /tools/validation/{thread_id} - Tool calls awaiting user validation
#[utoipa::path(
    get,
    path = "/tools/validation/{thread_id}",
    responses(
        (status = 200, description = "Pending validations, empty when none", body = [HILResponse])
    ),
    tag = "tools"
)]
pub async fn get_required_validation(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Vec<HILResponse>>, ApiError> {
    let (user, _) = state.authenticate(&headers).await?;
    state.get_thread(&user, thread_id).await?;

    let conversation = state.db.load_conversation(thread_id).await?;
    let Some(last) = conversation.last() else {
        return Ok(Json(Vec::new()));
    };
    if last.role != MessageRole::Assistant {
        return Ok(Json(Vec::new()));
    }

    let validated_by_call: std::collections::HashMap<&str, Option<bool>> = last
        .parts
        .iter()
        .filter(|p| p.part_type == PartType::FunctionCall)
        .filter_map(|p| {
            Some((
                p.payload.get("call_id")?.as_str()?,
                p.validated,
            ))
        })
        .collect();

    let pending = last
        .unanswered_function_calls()
        .into_iter()
        .filter(|call| {
            let is_hil = state
                .registry
                .get(&call.name)
                .map(|tool| tool.hil())
                .unwrap_or(false);
            let not_decided = validated_by_call
                .get(call.call_id.as_str())
                .copied()
                .flatten()
                .is_none();
            is_hil && not_decided
        })
        .map(|call| HILResponse {
            message: "Please validate the following inputs before proceeding.".to_string(),
            name: call.name.clone(),
            inputs: serde_json::from_str(&call.arguments).unwrap_or(Value::Null),
            tool_call_id: call.call_id,
        })
        .collect();

    Ok(Json(pending))
}

/// PATCH /tools/{thread_id}/execute/{tool_call_id} - Accept or reject a
/// pending HIL tool call
#[utoipa::path(
    patch,
    path = "/tools/{thread_id}/execute/{tool_call_id}",
    request_body = ExecuteToolCallRequest,
    responses(
        (status = 200, description = "Validation recorded and output appended", body = ExecuteToolCallResponse),
        (status = 403, description = "Already validated"),
        (status = 404, description = "Tool call not found")
    ),
    tag = "tools"
)]
pub async fn execute_tool_call(
    State(state): State<AppState>,
    Path((thread_id, tool_call_id)): Path<(Uuid, String)>,
    headers: HeaderMap,
    Json(body): Json<ExecuteToolCallRequest>,
) -> Result<Json<ExecuteToolCallResponse>, ApiError> {
    let (user, token) = state.authenticate(&headers).await?;
    let thread = state.get_thread(&user, thread_id).await?;

    let accepted = match body.validation.as_str() {
        "accept" => true,
        "reject" => false,
        other => {
            return Err(ApiError::unprocessable(format!(
                "validation must be 'accept' or 'reject', got '{other}'"
            )))
        }
    };

    let part = state
        .db
        .get_function_call_part(thread_id, &tool_call_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Specified tool call not found.".to_string()))?;

    if part.validated.is_some() {
        return Err(ApiError::forbidden(
            "The tool call has already been validated.",
        ));
    }

    let tool_name = part
        .payload
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let arguments = match (&body.args, accepted) {
        (Some(args), true) => args.clone(),
        _ => part
            .payload
            .get("arguments")
            .and_then(Value::as_str)
            .unwrap_or("{}")
            .to_string(),
    };

    // Replacement arguments must satisfy the tool schema before anything runs
    if accepted && body.args.is_some() {
        if let Some(tool) = state.registry.get(&tool_name) {
            let parsed: Value = serde_json::from_str(&arguments)
                .map_err(|e| ApiError::unprocessable(format!("Invalid arguments: {e}")))?;
            if let Err(errors) =
                neurochat_core::tools::coerce_arguments(&tool.input_schema(), &parsed)
            {
                return Err(ApiError::UnprocessableEntity(errors));
            }
        }
    }

    state
        .db
        .set_part_validated(part.id, accepted, body.args.as_deref().filter(|_| accepted))
        .await?;

    let (output, status) = if !accepted {
        (
            "The tool call has been invalidated by the user.".to_string(),
            "complete",
        )
    } else {
        let ctx = state.build_tool_context(&thread, &user, &token, None, None, None);
        let call = ToolCallRequest {
            call_id: tool_call_id.clone(),
            name: tool_name,
            arguments,
        };
        let outcome = ToolDispatcher::dispatch(
            std::slice::from_ref(&call),
            state.registry.tools(),
            &ctx,
            1,
        )
        .await;
        match outcome.responses.into_iter().next() {
            Some(response) => (response.output, response.status.as_str()),
            None => ("The tool produced no output.".to_string(), "incomplete"),
        }
    };

    state
        .db
        .append_part(
            part.message_id,
            PartType::FunctionCallOutput.as_str(),
            &function_call_output_item(&tool_call_id, &output, status),
        )
        .await?;

    Ok(Json(ExecuteToolCallResponse {
        status: "done".to_string(),
    }))
}
