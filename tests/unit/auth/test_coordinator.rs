// Unit tests for the authenticate → authorize → gate pipeline

use crate::common::TestHarness;
use axum::http::HeaderMap;
use sentinel_auth::auth::audit_logger::RequestMeta;
use sentinel_auth::core::errors::AuthError;
use sentinel_auth::core::models::{PrincipalKind, Tier};
use sentinel_auth::state::rate_limiter::{Quota, TierLimits};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn headers(pairs: &[(&'static str, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.insert(*name, value.parse().unwrap());
    }
    map
}

fn small_limits() -> TierLimits {
    TierLimits::with_window(Duration::from_secs(60), Some(2), Some(5), Some(10), None)
}

#[tokio::test]
async fn test_api_key_and_bearer_resolve_same_owner() {
    let harness = TestHarness::new();
    let coordinator = &harness.state.coordinator;
    let meta = RequestMeta::default();
    let (_, key) = harness.issue_key("user-1", &["chat:*"]).await;

    let via_key = coordinator
        .authenticate(&headers(&[("x-api-key", key)]), &meta)
        .await
        .unwrap();
    let via_token = coordinator
        .authenticate(&headers(&[("authorization", harness.bearer("user-1", "chat:*"))]), &meta)
        .await
        .unwrap();

    assert_eq!(via_key.id, via_token.id);
    assert_eq!(via_key.kind, PrincipalKind::Service);
    assert_eq!(via_token.kind, PrincipalKind::User);
}

#[tokio::test]
async fn test_api_key_wins_even_with_invalid_bearer() {
    let harness = TestHarness::new();
    let (_, key) = harness.issue_key("user-1", &["chat:*"]).await;

    let principal = harness
        .state
        .coordinator
        .authenticate(
            &headers(&[
                ("x-api-key", key),
                ("authorization", "Bearer not.a.token".to_string()),
            ]),
            &RequestMeta::default(),
        )
        .await
        .unwrap();
    assert_eq!(principal.kind, PrincipalKind::Service);
}

#[tokio::test]
async fn test_bad_api_key_does_not_fall_back_to_bearer() {
    let harness = TestHarness::new();
    let result = harness
        .state
        .coordinator
        .authenticate(
            &headers(&[
                ("x-api-key", "sk_garbage".to_string()),
                ("authorization", harness.bearer("user-1", "chat:*")),
            ]),
            &RequestMeta::default(),
        )
        .await;
    assert_eq!(result, Err(AuthError::InvalidApiKeyFormat));
    assert_eq!(harness.source.fetch_count(), 0);
}

#[tokio::test]
async fn test_scope_denial_does_not_consume_budget() {
    let harness = TestHarness::with_limits(small_limits());
    let coordinator = &harness.state.coordinator;
    let meta = RequestMeta::default();
    let (_, key) = harness.issue_key("user-1", &["chat:send"]).await;
    let creds = headers(&[("x-api-key", key)]);

    for _ in 0..5 {
        let result = coordinator.guard(&creds, &meta, &["keys:write"]).await;
        assert!(matches!(result, Err(AuthError::InsufficientScope { .. })));
    }
    assert_eq!(coordinator.limiter().tracked(), 0);

    let (_, quota) = coordinator.guard(&creds, &meta, &["chat:send"]).await.unwrap();
    assert_eq!(
        quota,
        Quota {
            limit: Some(2),
            remaining: Some(1)
        }
    );
}

#[tokio::test]
async fn test_authentication_failure_stops_before_gate() {
    let harness = TestHarness::with_limits(small_limits());
    let coordinator = &harness.state.coordinator;

    let result = coordinator
        .guard(&HeaderMap::new(), &RequestMeta::default(), &["chat:send"])
        .await;
    assert_eq!(result.err(), Some(AuthError::MissingCredentials));
    assert_eq!(coordinator.limiter().tracked(), 0);
}

#[tokio::test]
async fn test_budget_shared_across_credentials() {
    let harness = TestHarness::with_limits(small_limits());
    let coordinator = &harness.state.coordinator;
    let meta = RequestMeta::default();
    let (_, key) = harness.issue_key("user-1", &["chat:*"]).await;

    coordinator
        .guard(&headers(&[("x-api-key", key)]), &meta, &["chat:send"])
        .await
        .unwrap();
    coordinator
        .guard(&headers(&[("authorization", harness.bearer("user-1", "chat:*"))]), &meta, &["chat:send"])
        .await
        .unwrap();

    let result = coordinator
        .guard(&headers(&[("authorization", harness.bearer("user-1", "chat:*"))]), &meta, &["chat:send"])
        .await;
    match result {
        Err(AuthError::RateLimited { limit, remaining, retry_after }) => {
            assert_eq!(limit, 2);
            assert_eq!(remaining, 0);
            assert!(retry_after <= Duration::from_secs(60));
        }
        other => panic!("expected rate limit, got {:?}", other.map(|(p, _)| p.id)),
    }
}

#[tokio::test]
async fn test_tier_from_directory_sets_budget() {
    let harness = TestHarness::with_limits(small_limits());
    harness.store.set_tier("big-co", Tier::Enterprise).await;
    let (_, key) = harness.issue_key("big-co", &["chat:*"]).await;
    let creds = headers(&[("x-api-key", key)]);

    for _ in 0..20 {
        let (_, quota) = harness
            .state
            .coordinator
            .guard(&creds, &RequestMeta::default(), &["chat:send"])
            .await
            .unwrap();
        assert_eq!(quota, Quota::unlimited());
    }
}

#[tokio::test]
async fn test_valid_api_key_outranks_valid_bearer() {
    let harness = TestHarness::new();
    harness.store.set_tier("user-1", Tier::Pro).await;
    let (_, key) = harness.issue_key("user-1", &["profile:read"]).await;
    let token = format!("Bearer {}", harness.minter.token_for("user-1", "*", "enterprise"));
    let coordinator = &harness.state.coordinator;
    let meta = RequestMeta::default();

    let bearer_only = coordinator
        .authenticate(&headers(&[("authorization", token.clone())]), &meta)
        .await
        .unwrap();
    assert_eq!(bearer_only.tier, Tier::Enterprise);

    let principal = coordinator
        .authenticate(&headers(&[("x-api-key", key), ("authorization", token)]), &meta)
        .await
        .unwrap();
    assert_eq!(principal.kind, PrincipalKind::Service);
    assert_eq!(principal.tier, Tier::Pro);
    assert_eq!(principal.scopes.iter().map(String::as_str).collect::<Vec<_>>(), vec!["profile:read"]);
    assert!(coordinator.authorize(&principal, &["keys:write"]).is_err());
}

#[tokio::test]
async fn test_bearer_fails_closed_while_api_keys_keep_working() {
    let harness = TestHarness::new();
    harness.source.fail.store(true, Ordering::SeqCst);
    let (_, key) = harness.issue_key("user-1", &["chat:*"]).await;
    let coordinator = &harness.state.coordinator;
    let meta = RequestMeta::default();

    let bearer = coordinator
        .authenticate(&headers(&[("authorization", harness.bearer("user-1", "chat:*"))]), &meta)
        .await;
    assert!(matches!(bearer, Err(AuthError::UpstreamUnavailable(_))));

    assert!(coordinator.authenticate(&headers(&[("x-api-key", key)]), &meta).await.is_ok());
}

#[tokio::test]
async fn test_outcomes_feed_metrics() {
    let harness = TestHarness::with_limits(small_limits());
    let coordinator = &harness.state.coordinator;
    let meta = RequestMeta::default();
    let (_, key) = harness.issue_key("user-1", &["chat:*"]).await;
    let creds = headers(&[("x-api-key", key)]);

    for _ in 0..3 {
        let _ = coordinator.guard(&creds, &meta, &["chat:send"]).await;
    }
    let _ = coordinator.guard(&HeaderMap::new(), &meta, &["chat:send"]).await;

    let text = harness.state.metrics.render().unwrap();
    assert!(text.contains("auth_success_total{method=\"api_key\"} 3"));
    assert!(text.contains("rate_limited_total{tier=\"free\"} 1"));
    assert!(text.contains("auth_failure_total{code=\"missing_credentials\"} 1"));
}
