// Auth gate
//
// Every endpoint requires a bearer token. The token is exchanged against the
// identity provider's userinfo endpoint; project access is granted iff the
// token's groups contain /proj/<vlab>/<proj>/<role> for the target project
// (any role suffices).

use axum::http::HeaderMap;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::KeycloakSettings;
use crate::error::ApiError;

/// Identity resolved from the bearer token
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub sub: Uuid,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Pull the bearer token out of the request headers
pub fn bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Not authenticated."))?;

    header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| ApiError::unauthorized("Not authenticated."))
}

/// Exchange the token for the caller's identity
pub async fn get_user_info(
    http: &reqwest::Client,
    keycloak: &KeycloakSettings,
    token: &str,
) -> Result<UserInfo, ApiError> {
    let response = http
        .get(keycloak.user_info_endpoint())
        .bearer_auth(token)
        .send()
        .await
        .map_err(|_| ApiError::unauthorized("Invalid token."))?;

    if !response.status().is_success() {
        return Err(ApiError::unauthorized("Invalid token."));
    }

    response
        .json::<UserInfo>()
        .await
        .map_err(|_| ApiError::unauthorized("Invalid token."))
}

/// Check that the caller's groups grant access to the requested scope.
///
/// No scope at all (personal thread) is always allowed; a project requires
/// its vlab; a vlab alone requires vlab membership.
pub fn validate_project(
    groups: &[String],
    virtual_lab_id: Option<Uuid>,
    project_id: Option<Uuid>,
) -> Result<(), ApiError> {
    match (virtual_lab_id, project_id) {
        (None, None) => Ok(()),
        (Some(vlab), Some(project)) => {
            let prefix = format!("/proj/{vlab}/{project}/");
            if groups.iter().any(|g| g.starts_with(&prefix)) {
                Ok(())
            } else {
                Err(ApiError::forbidden(
                    "User does not belong to the project.",
                ))
            }
        }
        (Some(vlab), None) => {
            let prefix = format!("/vlab/{vlab}/");
            if groups.iter().any(|g| g.starts_with(&prefix)) {
                Ok(())
            } else {
                Err(ApiError::forbidden(
                    "User does not belong to the virtual lab.",
                ))
            }
        }
        (None, Some(_)) => Err(ApiError::forbidden(
            "A project must be attached to a virtual lab.",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(vlab: Uuid, project: Uuid) -> Vec<String> {
        vec![
            format!("/proj/{vlab}/{project}/admin"),
            format!("/vlab/{vlab}/admin"),
            "/proj/other/other/member".to_string(),
        ]
    }

    #[test]
    fn test_validate_project_combinations() {
        let vlab = Uuid::now_v7();
        let project = Uuid::now_v7();
        let wrong = Uuid::now_v7();
        let groups = groups(vlab, project);

        // Nothing requested
        assert!(validate_project(&groups, None, None).is_ok());
        // Exact project membership
        assert!(validate_project(&groups, Some(vlab), Some(project)).is_ok());
        // Vlab membership only
        assert!(validate_project(&groups, Some(vlab), None).is_ok());
        // Project without vlab is malformed
        assert!(validate_project(&groups, None, Some(project)).is_err());
        // Wrong vlab or project
        assert!(validate_project(&groups, Some(wrong), Some(project)).is_err());
        assert!(validate_project(&groups, Some(vlab), Some(wrong)).is_err());
    }

    #[test]
    fn test_validate_project_empty_groups() {
        let vlab = Uuid::now_v7();
        assert!(validate_project(&[], None, None).is_ok());
        assert!(validate_project(&[], Some(vlab), None).is_err());
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert("authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc123");

        headers.insert("authorization", "Basic abc123".parse().unwrap());
        assert!(bearer_token(&headers).is_err());
    }

    #[test]
    fn test_user_info_deserialization_without_groups() {
        let info: UserInfo = serde_json::from_str(
            r#"{"sub": "0192d9f1-5a26-7b11-a4b1-111111111111", "email": "a@b.c"}"#,
        )
        .unwrap();
        assert!(info.groups.is_empty());
    }
}
