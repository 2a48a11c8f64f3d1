// Domain error types - Secure error handling with no information disclosure

use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy of the authentication, authorization and rate-limit pipeline.
///
/// Every variant is terminal for the current request. `code()` and
/// `status_code()` are stable and safe to expose; `user_message()` never
/// contains secret material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Neither an API key nor a bearer token was presented (HTTP 401)
    #[error("Missing credentials")]
    MissingCredentials,

    /// Malformed, unverifiable or mis-addressed bearer token (HTTP 401)
    #[error("Invalid token")]
    InvalidToken,

    /// Bearer token expired beyond clock-skew tolerance (HTTP 401)
    #[error("Token expired")]
    TokenExpired,

    /// Presented API key does not have the issued shape (HTTP 401)
    #[error("Invalid API key format")]
    InvalidApiKeyFormat,

    /// Well-formed API key with no matching record (HTTP 401)
    #[error("API key not found")]
    ApiKeyNotFound,

    /// API key past its expiry (HTTP 401)
    #[error("API key expired")]
    ApiKeyExpired,

    /// API key soft-revoked by its owner (HTTP 401)
    #[error("API key revoked")]
    ApiKeyRevoked,

    /// Caller tried to manage a key owned by someone else (HTTP 403)
    #[error("API key belongs to another owner")]
    OwnerMismatch,

    /// Management operation referenced a key id that does not exist (HTTP 404)
    #[error("Unknown API key id")]
    UnknownKeyId,

    /// Principal lacks a required scope (HTTP 403)
    #[error("Missing required scope: {missing}")]
    InsufficientScope { missing: String },

    /// Malformed scope string at issuance (HTTP 400)
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Key lifetime out of the representable range (HTTP 400)
    #[error("Invalid key lifetime")]
    InvalidTtl,

    /// Request budget exhausted for the current window (HTTP 429)
    #[error("Rate limit exceeded")]
    RateLimited {
        retry_after: Duration,
        limit: u32,
        remaining: u32,
    },

    /// Identity issuer or persistence collaborator unreachable (HTTP 503)
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Unexpected internal fault (HTTP 500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::InvalidToken => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidApiKeyFormat => "invalid_api_key_format",
            AuthError::ApiKeyNotFound => "api_key_not_found",
            AuthError::ApiKeyExpired => "api_key_expired",
            AuthError::ApiKeyRevoked => "api_key_revoked",
            AuthError::OwnerMismatch => "owner_mismatch",
            AuthError::UnknownKeyId => "unknown_key_id",
            AuthError::InsufficientScope { .. } => "insufficient_scope",
            AuthError::InvalidScope(_) => "invalid_scope",
            AuthError::InvalidTtl => "invalid_ttl",
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::UpstreamUnavailable(_) => "upstream_unavailable",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::MissingCredentials
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::InvalidApiKeyFormat
            | AuthError::ApiKeyNotFound
            | AuthError::ApiKeyExpired
            | AuthError::ApiKeyRevoked => 401,
            AuthError::OwnerMismatch | AuthError::InsufficientScope { .. } => 403,
            AuthError::UnknownKeyId => 404,
            AuthError::InvalidScope(_) | AuthError::InvalidTtl => 400,
            AuthError::RateLimited { .. } => 429,
            AuthError::UpstreamUnavailable(_) => 503,
            AuthError::Internal(_) => 500,
        }
    }

    /// Get user-friendly error message (no sensitive information)
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InsufficientScope { missing } => {
                format!("Missing required scope: {}", missing)
            }
            AuthError::InvalidScope(scope) => format!("Invalid scope: {}", scope),
            AuthError::UpstreamUnavailable(_) => "Service unavailable".to_string(),
            AuthError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Failures reported by external collaborators (identity issuer, persistence)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// Unique constraint violation on insert
    #[error("Conflict: record already exists")]
    Conflict,

    /// The call did not complete within its deadline
    #[error("Upstream call timed out")]
    Timeout,

    /// Transport or server-side failure
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    /// Response could not be decoded
    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    /// Circuit breaker is open
    #[error("Circuit breaker open")]
    CircuitOpen,
}

impl From<UpstreamError> for AuthError {
    fn from(err: UpstreamError) -> Self {
        AuthError::UpstreamUnavailable(err.to_string())
    }
}

/// Configuration loading error
#[derive(Error, Debug)]
#[error("Configuration error: {0}")]
pub struct ConfigError(pub String);
