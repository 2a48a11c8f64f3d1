// Axum web server layer and collaborator seams

use axum::{
    error_handling::HandleErrorLayer,
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::JwkSet;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;

pub mod handlers;
pub mod middleware;
pub mod responses;

use crate::auth::auth_middleware::{auth_middleware, AuthGuard};
use crate::auth::coordinator::AuthCoordinator;
use crate::auth::key_store::KeyStore;
use crate::core::errors::UpstreamError;
use crate::core::metrics::AuthMetrics;
use crate::core::models::{ApiKeyRecord, Tier};

pub use crate::config::Config;

/// Application state shared by every handler
///
/// Constructed once in `main`; every component is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<AuthCoordinator>,
    pub key_store: Arc<KeyStore>,
    pub metrics: Arc<AuthMetrics>,
    pub config: Arc<Config>,
}

/// System of record for API key records
#[async_trait::async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Insert a new record; a duplicate id or hash yields `UpstreamError::Conflict`
    async fn insert(&self, record: &ApiKeyRecord) -> Result<(), UpstreamError>;
    async fn get(&self, key_id: &str) -> Result<Option<ApiKeyRecord>, UpstreamError>;
    /// Candidate records sharing the non-secret lookup prefix
    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKeyRecord>, UpstreamError>;
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, UpstreamError>;
    /// Set `revoked_at` unless it is already set. `true` only when this call
    /// made the transition; an already revoked or missing key yields `false`.
    async fn mark_revoked(&self, key_id: &str, at: DateTime<Utc>) -> Result<bool, UpstreamError>;
    /// `usage_count += 1`, `last_used_at = at`
    async fn record_usage(&self, key_id: &str, at: DateTime<Utc>) -> Result<(), UpstreamError>;
}

/// Principal metadata held by the persistence collaborator
#[async_trait::async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Subscription tier of `owner_id`, `None` for unknown owners
    async fn tier_for(&self, owner_id: &str) -> Result<Option<Tier>, UpstreamError>;
}

/// Published signing keys of the token issuer
#[async_trait::async_trait]
pub trait KeySetSource: Send + Sync {
    async fn fetch_key_set(&self) -> Result<JwkSet, UpstreamError>;
}

/// Create the Axum router with all routes and middleware
///
/// Middleware stack (outermost to innermost):
/// - Request timeout (tower::timeout), mapped to 408
/// - Body size limit (tower-http::limit)
/// - Tracing (tower-http::trace)
/// - Auth guard per protected route: authenticate, authorize, rate-limit gate
///
/// `/health` and `/metrics` are public.
pub fn create_router(state: AppState) -> Router {
    let guard = |scopes: &[&str]| {
        axum::middleware::from_fn_with_state(
            AuthGuard::new(Arc::clone(&state.coordinator), scopes),
            auth_middleware,
        )
    };

    let router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route(
            "/v1/me",
            get(handlers::me_handler).route_layer(guard(&["profile:read"])),
        )
        .route(
            "/v1/keys",
            post(handlers::issue_key_handler).route_layer(guard(&["keys:write"])),
        )
        .route(
            "/v1/keys",
            get(handlers::list_keys_handler).route_layer(guard(&["keys:read"])),
        )
        .route(
            "/v1/keys/:id",
            delete(handlers::revoke_key_handler).route_layer(guard(&["keys:write"])),
        )
        .route(
            "/v1/keys/:id/rotate",
            post(handlers::rotate_key_handler).route_layer(guard(&["keys:write"])),
        );

    let body_limit = state.config.body_size_limit_bytes;
    let timeout_secs = state.config.request_timeout_secs;

    let router = router
        .layer(middleware::tracing_layer())
        .layer(middleware::body_size_limit_layer(body_limit));

    // HandleErrorLayer must wrap the timeout to turn Elapsed into a response
    let timeout_stack = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(responses::handle_layer_error))
        .layer(middleware::timeout_layer(Duration::from_secs(timeout_secs)))
        .into_inner();

    router.layer(timeout_stack).with_state(state)
}
