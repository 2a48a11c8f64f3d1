// Axum authentication middleware

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::api::responses::{insert_quota_headers, ApiError};
use crate::auth::audit_logger::RequestMeta;
use crate::auth::coordinator::AuthCoordinator;

/// Per-route middleware state: the shared coordinator plus the scopes the
/// route requires
#[derive(Clone)]
pub struct AuthGuard {
    coordinator: Arc<AuthCoordinator>,
    required: Arc<[String]>,
}

impl AuthGuard {
    pub fn new(coordinator: Arc<AuthCoordinator>, required: &[&str]) -> Self {
        Self {
            coordinator,
            required: required.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }
}

/// Authentication middleware function
///
/// Runs authenticate → authorize → gate. On success the `Principal` is
/// placed in request extensions and the response carries the rate-limit
/// counters; on failure the handler never runs.
pub async fn auth_middleware(State(guard): State<AuthGuard>, mut request: Request, next: Next) -> Response {
    let meta = RequestMeta::from_headers(request.headers());

    let outcome = guard
        .coordinator
        .guard(request.headers(), &meta, guard.required())
        .await;

    match outcome {
        Ok((principal, quota)) => {
            request.extensions_mut().insert(principal);
            let mut response = next.run(request).await;
            insert_quota_headers(response.headers_mut(), &quota);
            response
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}
