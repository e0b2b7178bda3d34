// API error mapping
//
// One error enum for everything a handler can produce before or instead of a
// stream. Bodies follow the platform convention of a top-level `detail`
// field; rate-limit errors carry their X-RateLimit-* headers.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::rate_limit::RateLimitHeaders;

/// Errors surfaced as HTTP responses
#[derive(Debug)]
pub enum ApiError {
    /// 401 - token missing or rejected by the identity provider
    Unauthorized(String),
    /// 403 - authenticated but not a member of the target project
    Forbidden(String),
    /// 404 - missing or not owned (indistinguishable on purpose)
    NotFound(String),
    /// 413 - query string over the configured cap
    PayloadTooLarge(String),
    /// 422 - malformed payload
    UnprocessableEntity(Value),
    /// 429 - rate limited, headers included
    RateLimited(RateLimitHeaders),
    /// 402 - the accounting service refused to open a session
    PaymentRequired(String),
    /// 500 - anything else
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        ApiError::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError::Forbidden(msg.into())
    }

    pub fn thread_not_found() -> Self {
        ApiError::NotFound("Thread not found.".to_string())
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        ApiError::UnprocessableEntity(Value::String(msg.into()))
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, Json(json!({"detail": msg}))).into_response()
            }
            ApiError::Forbidden(msg) => {
                (StatusCode::FORBIDDEN, Json(json!({"detail": msg}))).into_response()
            }
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                Json(json!({"detail": {"detail": msg}})),
            )
                .into_response(),
            ApiError::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({"detail": msg})),
            )
                .into_response(),
            ApiError::UnprocessableEntity(detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"detail": detail})),
            )
                .into_response(),
            ApiError::RateLimited(headers) => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({"detail": {"error": "Rate limit exceeded"}})),
                )
                    .into_response();
                for (name, value) in headers.as_pairs() {
                    if let Ok(value) = HeaderValue::from_str(&value) {
                        response.headers_mut().insert(name, value);
                    }
                }
                if let Ok(value) = HeaderValue::from_str(&RateLimitHeaders::exposed_names()) {
                    response
                        .headers_mut()
                        .insert("Access-Control-Expose-Headers", value);
                }
                response
            }
            ApiError::PaymentRequired(msg) => (
                StatusCode::PAYMENT_REQUIRED,
                Json(json!({"detail": msg})),
            )
                .into_response(),
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"detail": "Internal server error."})),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_found_body_is_nested() {
        let response = ApiError::thread_not_found().into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"detail": {"detail": "Thread not found."}}));
    }

    #[tokio::test]
    async fn test_rate_limited_carries_headers() {
        let headers = RateLimitHeaders::new(10, 0, Some(42));
        let response = ApiError::RateLimited(headers).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-limit"], "10");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(response.headers()["x-ratelimit-reset"], "42");
        assert!(response
            .headers()
            .contains_key("Access-Control-Expose-Headers"));
    }
}
