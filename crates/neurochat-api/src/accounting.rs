// Accounting hook
//
// Inside a project, a rate-limited chat request is not rejected; the stream
// is charged through a oneshot accounting session instead. This client is
// the only billing-side effect the service has.

use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AccountingClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl AccountingClient {
    pub fn new(http: reqwest::Client, base_url: Option<String>, disabled: bool) -> Self {
        Self {
            http,
            base_url: if disabled { None } else { base_url },
        }
    }

    /// Open a oneshot session charging `count` queries to the project.
    ///
    /// A refusal blocks the request (the caller has no quota and no budget);
    /// an unconfigured client is a no-op.
    pub async fn oneshot(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        count: u32,
    ) -> Result<(), ApiError> {
        let Some(base_url) = &self.base_url else {
            return Ok(());
        };

        let response = self
            .http
            .post(format!("{base_url}/oneshot"))
            .json(&json!({
                "subtype": "ml-llm",
                "user_id": user_id,
                "proj_id": project_id,
                "count": count,
            }))
            .send()
            .await
            .map_err(|e| ApiError::PaymentRequired(format!("Accounting service unreachable: {e}")))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::PaymentRequired(format!(
                "Accounting session refused: {body}"
            )));
        }

        tracing::info!(%user_id, %project_id, count, "Opened oneshot accounting session");
        Ok(())
    }
}
