// End-to-end tests of the auth pipeline through the router

use crate::common::*;
use axum::http::StatusCode;
use sentinel_auth::state::key_set_cache::KeySetCacheSettings;
use sentinel_auth::state::rate_limiter::TierLimits;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tower::ServiceExt;

#[tokio::test]
async fn test_cold_start_burst_fetches_keys_once() {
    let harness = TestHarness::new();
    let auth = harness.bearer("user-1", "profile:read");

    let requests = (0..32).map(|_| {
        let router = harness.router();
        let auth = auth.clone();
        tokio::spawn(async move {
            router
                .oneshot(get("/v1/me", Some(("authorization", &auth))))
                .await
                .unwrap()
                .status()
        })
    });
    for status in futures::future::join_all(requests).await {
        assert_eq!(status.unwrap(), StatusCode::OK);
    }

    assert_eq!(harness.source.fetch_count(), 1);
    let health = body_json(harness.router().oneshot(get("/health", None)).await.unwrap()).await;
    assert_eq!(health["signing_keys_loaded"], true);
}

#[tokio::test]
async fn test_issuer_key_rotation_end_to_end() {
    let harness = TestHarness::build(
        TierLimits::default(),
        KeySetCacheSettings {
            min_refresh_interval: Duration::ZERO,
            ..KeySetCacheSettings::default()
        },
    );
    let auth = harness.bearer("user-1", "profile:read");
    let response = harness
        .router()
        .oneshot(get("/v1/me", Some(("authorization", &auth))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // issuer rolls over to a new signing key, still publishing the old one
    let next = TokenMinter::new("kid-2");
    harness.source.publish(key_set(&[&harness.minter, &next]));

    let rotated = format!("Bearer {}", next.token_for("user-1", "profile:read", "free"));
    let response = harness
        .router()
        .oneshot(get("/v1/me", Some(("authorization", &rotated))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.source.fetch_count(), 2);

    // old tokens still verify from the refreshed set
    let response = harness
        .router()
        .oneshot(get("/v1/me", Some(("authorization", &auth))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.source.fetch_count(), 2);
}

#[tokio::test]
async fn test_issuer_outage_returns_503_for_bearer_only() {
    let harness = TestHarness::new();
    harness.source.fail.store(true, Ordering::SeqCst);
    let (_, key) = harness.issue_key("user-1", &["profile:read"]).await;
    let auth = harness.bearer("user-1", "profile:read");

    let response = harness
        .router()
        .oneshot(get("/v1/me", Some(("authorization", &auth))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let error = body_json(response).await;
    assert_eq!(error["code"], "upstream_unavailable");
    assert_eq!(error["error"], "Service unavailable");

    let response = harness
        .router()
        .oneshot(get("/v1/me", Some(("x-api-key", &key))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_failure_stages_short_circuit() {
    let harness = TestHarness::with_limits(TierLimits::with_window(
        Duration::from_secs(60),
        Some(1),
        Some(1),
        Some(1),
        None,
    ));
    let (_, key) = harness.issue_key("user-1", &["chat:*"]).await;

    // authenticated but unauthorized: 403 and no budget consumed
    for _ in 0..3 {
        let response = harness
            .router()
            .oneshot(get("/v1/me", Some(("x-api-key", &key))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get("x-ratelimit-remaining").is_none());
    }
    assert_eq!(harness.state.coordinator.limiter().tracked(), 0);

    // unauthenticated: 401 regardless of budget
    let response = harness
        .router()
        .oneshot(get("/v1/me", Some(("x-api-key", "sk_nope"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "invalid_api_key_format");
}

#[tokio::test]
async fn test_malformed_authorization_header() {
    let harness = TestHarness::new();
    for value in ["Basic dXNlcjpwYXNz", "Bearer", "Bearer not-a-jwt", "Token abc"] {
        let response = harness
            .router()
            .oneshot(get("/v1/me", Some(("authorization", value))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", value);
        assert_eq!(body_json(response).await["code"], "invalid_token");
    }
    assert_eq!(harness.source.fetch_count(), 0);
}
