// Security event logging

use crate::core::metrics::AuthMetrics;
use axum::http::HeaderMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Credential strategy a request authenticated with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    ApiKey,
    Bearer,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::ApiKey => "api_key",
            AuthMethod::Bearer => "bearer",
        }
    }
}

/// Caller metadata attached to audit events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    /// `X-Forwarded-For` first (proxied requests), then `X-Real-IP`
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let ip_address = headers
            .get("X-Forwarded-For")
            .or_else(|| headers.get("X-Real-IP"))
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .filter(|s| !s.is_empty());
        let user_agent = headers
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        Self {
            ip_address,
            user_agent,
        }
    }
}

/// Authentication / authorization outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    AuthSuccess {
        method: AuthMethod,
        principal_id: String,
    },
    AuthFailure {
        method: Option<AuthMethod>,
        code: &'static str,
    },
    /// Authenticated but stopped by scope check or rate limit
    AccessDenied {
        principal_id: String,
        code: &'static str,
    },
}

/// Audit logger for security events
///
/// Events go to structured logs and the auth counters. Never pass token
/// values, plaintext keys or hashes in here: the only key material accepted
/// is the non-secret lookup prefix.
pub struct AuditLogger {
    metrics: Option<Arc<AuthMetrics>>,
}

impl AuditLogger {
    pub fn new(metrics: Option<Arc<AuthMetrics>>) -> Self {
        Self { metrics }
    }

    pub fn log_auth_event(&self, event: &AuthEvent, key_prefix: Option<&str>, meta: &RequestMeta) {
        match event {
            AuthEvent::AuthSuccess {
                method,
                principal_id,
            } => {
                info!(
                    method = method.as_str(),
                    principal_id = %principal_id,
                    key_prefix = ?key_prefix,
                    ip_address = ?meta.ip_address,
                    user_agent = ?meta.user_agent,
                    "Authentication successful"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_success(method.as_str());
                }
            }
            AuthEvent::AuthFailure { method, code } => {
                warn!(
                    method = ?method.map(|m| m.as_str()),
                    code = %code,
                    key_prefix = ?key_prefix,
                    ip_address = ?meta.ip_address,
                    user_agent = ?meta.user_agent,
                    "Authentication failed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure(code);
                }
            }
            AuthEvent::AccessDenied { principal_id, code } => {
                warn!(
                    principal_id = %principal_id,
                    code = %code,
                    ip_address = ?meta.ip_address,
                    "Access denied"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure(code);
                }
            }
        }
    }
}
