// Request handlers for API endpoints

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    Extension,
};
use serde::Deserialize;
use tracing::{error, info};

use crate::api::responses::{ApiError, HealthResponse, IssuedKeyResponse};
use crate::api::AppState;
use crate::config::MAX_API_KEY_TTL_DAYS;
use crate::core::errors::AuthError;
use crate::core::models::{ApiKeyMetadata, Principal};
use crate::core::scope::{canonicalize_scopes, ScopeMatcher};

const MAX_TTL_DAYS: i64 = MAX_API_KEY_TTL_DAYS as i64;

#[derive(Debug, Deserialize)]
pub struct IssueKeyRequest {
    pub name: String,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub ttl_days: Option<i64>,
}

/// POST /v1/keys
///
/// Issuance is bounded by the caller's own grants: every effective scope
/// (requested, or the defaults) must be covered by the caller.
pub async fn issue_key_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<IssueKeyRequest>,
) -> Result<(StatusCode, Json<IssuedKeyResponse>), ApiError> {
    let ttl = match request.ttl_days {
        Some(days) if !(1..=MAX_TTL_DAYS).contains(&days) => {
            return Err(ApiError::bad_request(format!(
                "ttl_days must be between 1 and {}",
                MAX_TTL_DAYS
            )));
        }
        Some(days) => Some(chrono::Duration::days(days)),
        None => None,
    };

    let effective = match &request.scopes {
        Some(requested) => canonicalize_scopes(requested)?,
        None => canonicalize_scopes(state.key_store.default_scopes())?,
    };
    if let Some(missing) = ScopeMatcher::first_missing(&principal.scopes, effective.iter().map(String::as_str)) {
        return Err(AuthError::InsufficientScope {
            missing: missing.to_string(),
        }
        .into());
    }

    let (record, plaintext) = state
        .key_store
        .issue(&principal.id, &request.name, request.scopes.map(|_| effective), ttl)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(IssuedKeyResponse::new(ApiKeyMetadata::from(&record), &plaintext)),
    ))
}

/// GET /v1/keys
pub async fn list_keys_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<ApiKeyMetadata>>, ApiError> {
    let keys = state.key_store.list(&principal.id).await?;
    Ok(Json(keys))
}

/// DELETE /v1/keys/:id
pub async fn revoke_key_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(key_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.key_store.revoke(&key_id, &principal.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/keys/:id/rotate
pub async fn rotate_key_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(key_id): Path<String>,
) -> Result<(StatusCode, Json<IssuedKeyResponse>), ApiError> {
    let (record, plaintext) = state.key_store.rotate(&key_id, &principal.id).await?;
    info!(principal_id = %principal.id, new_key_id = %record.id, "Key rotated via API");
    Ok((
        StatusCode::CREATED,
        Json(IssuedKeyResponse::new(ApiKeyMetadata::from(&record), &plaintext)),
    ))
}

/// GET /v1/me
pub async fn me_handler(Extension(principal): Extension<Principal>) -> Json<Principal> {
    Json(principal)
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        signing_keys_loaded: state.coordinator.signing_keys_loaded(),
    })
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
