// Authenticate → authorize → gate pipeline shared by every protected route

use crate::auth::api_key::ApiKey;
use crate::auth::audit_logger::{AuditLogger, AuthEvent, AuthMethod, RequestMeta};
use crate::auth::key_store::KeyStore;
use crate::auth::token_verifier::TokenVerifier;
use crate::core::errors::AuthError;
use crate::core::metrics::AuthMetrics;
use crate::core::models::Principal;
use crate::core::scope::ScopeMatcher;
use crate::state::rate_limiter::{Quota, RateDecision, RateLimiter};
use axum::http::{header, HeaderMap};
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;

/// Dedicated API key header
pub const API_KEY_HEADER: &str = "x-api-key";

/// Credential presented by a request
pub enum Credentials {
    ApiKey(ApiKey),
    Bearer(Secret<String>),
}

impl Credentials {
    /// Pick the credential strategy. A present API key header wins outright;
    /// the bearer token is never consulted as a fallback.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AuthError> {
        if let Some(value) = headers.get(API_KEY_HEADER) {
            let key = value.to_str().map_err(|_| AuthError::InvalidApiKeyFormat)?;
            return Ok(Credentials::ApiKey(ApiKey::new(key.trim())));
        }

        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Err(AuthError::MissingCredentials);
        };
        let value = value.to_str().map_err(|_| AuthError::InvalidToken)?;
        let (scheme, token) = value.trim().split_once(' ').ok_or(AuthError::InvalidToken)?;
        if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(Credentials::Bearer(Secret::new(token.trim().to_string())))
    }

    pub fn method(&self) -> AuthMethod {
        match self {
            Credentials::ApiKey(_) => AuthMethod::ApiKey,
            Credentials::Bearer(_) => AuthMethod::Bearer,
        }
    }

    /// Non-secret key prefix for audit records
    pub fn key_prefix(&self) -> Option<&str> {
        match self {
            Credentials::ApiKey(key) => key.lookup_prefix(),
            Credentials::Bearer(_) => None,
        }
    }
}

/// Composes token verification, key validation, scope checks and rate
/// limiting. Constructed once and shared by `Arc` across requests.
pub struct AuthCoordinator {
    verifier: Arc<TokenVerifier>,
    key_store: Arc<KeyStore>,
    limiter: Arc<RateLimiter>,
    audit: AuditLogger,
    metrics: Option<Arc<AuthMetrics>>,
}

impl AuthCoordinator {
    pub fn new(
        verifier: Arc<TokenVerifier>,
        key_store: Arc<KeyStore>,
        limiter: Arc<RateLimiter>,
        metrics: Option<Arc<AuthMetrics>>,
    ) -> Self {
        Self {
            verifier,
            key_store,
            limiter,
            audit: AuditLogger::new(metrics.clone()),
            metrics,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn signing_keys_loaded(&self) -> bool {
        self.verifier.keys_loaded()
    }

    /// Resolve the caller into a principal
    pub async fn authenticate(&self, headers: &HeaderMap, meta: &RequestMeta) -> Result<Principal, AuthError> {
        let credentials = match Credentials::from_headers(headers) {
            Ok(credentials) => credentials,
            Err(e) => {
                self.audit
                    .log_auth_event(&AuthEvent::AuthFailure { method: None, code: e.code() }, None, meta);
                return Err(e);
            }
        };

        let method = credentials.method();
        let result = match &credentials {
            Credentials::ApiKey(key) => self.key_store.validate(key).await,
            Credentials::Bearer(token) => self.verifier.verify(token.expose_secret()).await,
        };

        let event = match &result {
            Ok(principal) => AuthEvent::AuthSuccess {
                method,
                principal_id: principal.id.clone(),
            },
            Err(e) => AuthEvent::AuthFailure {
                method: Some(method),
                code: e.code(),
            },
        };
        self.audit.log_auth_event(&event, credentials.key_prefix(), meta);
        result
    }

    /// Every required scope must be covered; stops at the first miss
    pub fn authorize<S: AsRef<str>>(&self, principal: &Principal, required: &[S]) -> Result<(), AuthError> {
        match ScopeMatcher::first_missing(&principal.scopes, required.iter().map(|s| s.as_ref())) {
            None => Ok(()),
            Some(missing) => Err(AuthError::InsufficientScope {
                missing: missing.to_string(),
            }),
        }
    }

    /// Count the request against the principal's budget
    pub fn gate(&self, principal: &Principal) -> Result<Quota, AuthError> {
        match self.limiter.check(&principal.id, principal.tier) {
            RateDecision::Allowed(quota) => Ok(quota),
            RateDecision::Denied { retry_after, limit } => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_rate_limited(principal.tier.as_str());
                }
                Err(AuthError::RateLimited {
                    retry_after,
                    limit,
                    remaining: 0,
                })
            }
        }
    }

    /// Full pipeline, strictly authenticate → authorize → gate. The first
    /// failing stage ends the request; later stages never run.
    pub async fn guard<S: AsRef<str>>(
        &self,
        headers: &HeaderMap,
        meta: &RequestMeta,
        required: &[S],
    ) -> Result<(Principal, Quota), AuthError> {
        let principal = self.authenticate(headers, meta).await?;

        let checked = self
            .authorize(&principal, required)
            .and_then(|()| self.gate(&principal));
        match checked {
            Ok(quota) => Ok((principal, quota)),
            Err(e) => {
                self.audit.log_auth_event(
                    &AuthEvent::AccessDenied {
                        principal_id: principal.id.clone(),
                        code: e.code(),
                    },
                    None,
                    meta,
                );
                Err(e)
            }
        }
    }
}
