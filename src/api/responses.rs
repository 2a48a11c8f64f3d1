// Response types for API endpoints

use axum::{
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    BoxError, Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::error;

use crate::auth::api_key::ApiKey;
use crate::core::errors::AuthError;
use crate::core::models::ApiKeyMetadata;
use crate::state::rate_limiter::Quota;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub signing_keys_loaded: bool,
}

/// Freshly issued or rotated key. `key` is the only time the plaintext is
/// ever returned.
#[derive(Debug, Serialize)]
pub struct IssuedKeyResponse {
    pub key: String,
    #[serde(flatten)]
    pub metadata: ApiKeyMetadata,
}

impl IssuedKeyResponse {
    pub fn new(metadata: ApiKeyMetadata, plaintext: &ApiKey) -> Self {
        Self {
            key: plaintext.expose_secret().to_string(),
            metadata,
        }
    }
}

/// API error type that converts domain errors to HTTP responses
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retry_after: Option<Duration>,
    pub quota: Option<Quota>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after: None,
            quota: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            // user_message() hides the detail, keep it in the logs
            error!(error = %err, code = err.code(), "Request failed");
        }

        let mut api_error = Self::new(status, err.code(), err.user_message());
        if let AuthError::RateLimited {
            retry_after,
            limit,
            remaining,
        } = err
        {
            api_error.retry_after = Some(retry_after);
            api_error.quota = Some(Quota {
                limit: Some(limit),
                remaining: Some(remaining),
            });
        }
        api_error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            code: self.code.to_string(),
            retry_after_ms: self.retry_after.map(|d| d.as_millis() as u64),
        });
        let mut response = (self.status, body).into_response();

        if let Some(retry_after) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
        }
        if let Some(quota) = self.quota {
            insert_quota_headers(response.headers_mut(), &quota);
        }
        response
    }
}

/// Errors raised by the tower layers wrapping the router; a request
/// deadline becomes 408
pub async fn handle_layer_error(err: BoxError) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::new(StatusCode::REQUEST_TIMEOUT, "request_timeout", "Request timed out")
    } else {
        error!(error = %err, "Unhandled middleware error");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "Internal error")
    }
}

/// Whole seconds for `Retry-After`, rounded up so clients never retry early
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Limit/remaining counters; unlimited budgets carry no headers
pub fn insert_quota_headers(headers: &mut HeaderMap, quota: &Quota) {
    if let Some(limit) = quota.limit {
        headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
    }
    if let Some(remaining) = quota.remaining {
        headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
    }
}
