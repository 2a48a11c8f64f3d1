// Unit tests for bearer token verification with real EdDSA signatures

use crate::common::{claims_for, StaticKeySetSource, TokenMinter};
use chrono::Utc;
use sentinel_auth::auth::token_verifier::{TokenVerifier, TokenVerifierSettings};
use sentinel_auth::core::errors::AuthError;
use sentinel_auth::core::models::{PrincipalKind, Tier};
use sentinel_auth::state::key_set_cache::{KeySetCacheSettings, SigningKeyCache};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn verifier(minter: &TokenMinter, settings: TokenVerifierSettings) -> (TokenVerifier, Arc<StaticKeySetSource>) {
    let source = Arc::new(StaticKeySetSource::new(minter.key_set()));
    let keys = SigningKeyCache::new(source.clone(), KeySetCacheSettings::default());
    (TokenVerifier::new(keys, settings), source)
}

#[tokio::test]
async fn test_valid_token_resolves_user_principal() {
    let minter = TokenMinter::new("k1");
    let (verifier, _) = verifier(&minter, TokenVerifierSettings::default());

    let principal = verifier
        .verify(&minter.token_for("user-42", "chat:* profile:read", "plus"))
        .await
        .unwrap();

    assert_eq!(principal.id, "user-42");
    assert_eq!(principal.kind, PrincipalKind::User);
    assert_eq!(principal.tier, Tier::Plus);
    assert_eq!(principal.scopes.len(), 2);
    assert!(verifier.keys_loaded());
}

#[tokio::test]
async fn test_expiry_respects_clock_skew() {
    let minter = TokenMinter::new("k1");
    let (verifier, _) = verifier(&minter, TokenVerifierSettings::default());
    let now = Utc::now().timestamp();

    let recently_expired = minter.mint(&claims_for("u", "", "free", now - 30));
    assert!(verifier.verify(&recently_expired).await.is_ok());

    let long_expired = minter.mint(&claims_for("u", "", "free", now - 600));
    assert_eq!(verifier.verify(&long_expired).await, Err(AuthError::TokenExpired));
}

#[tokio::test]
async fn test_not_yet_valid_token_rejected() {
    let minter = TokenMinter::new("k1");
    let (verifier, _) = verifier(&minter, TokenVerifierSettings::default());
    let now = Utc::now().timestamp();

    let token = minter.mint(&json!({ "sub": "u", "exp": now + 7200, "nbf": now + 3600 }));
    assert_eq!(verifier.verify(&token).await, Err(AuthError::InvalidToken));
}

#[tokio::test]
async fn test_tampered_payload_rejected() {
    let minter = TokenMinter::new("k1");
    let (verifier, _) = verifier(&minter, TokenVerifierSettings::default());

    let token = minter.token_for("user-1", "chat:send", "free");
    let forged = minter.token_for("admin", "*", "enterprise");
    let mut parts: Vec<&str> = token.split('.').collect();
    parts[1] = forged.split('.').nth(1).unwrap();
    let spliced = parts.join(".");

    assert_eq!(verifier.verify(&spliced).await, Err(AuthError::InvalidToken));
}

#[tokio::test]
async fn test_token_from_untrusted_signer_rejected() {
    let trusted = TokenMinter::new("k1");
    let impostor = TokenMinter::new("k1");
    let (verifier, _) = verifier(&trusted, TokenVerifierSettings::default());

    let token = impostor.token_for("user-1", "*", "free");
    assert_eq!(verifier.verify(&token).await, Err(AuthError::InvalidToken));
}

#[tokio::test]
async fn test_symmetric_and_none_algorithms_rejected_before_key_lookup() {
    let minter = TokenMinter::new("k1");
    let (verifier, source) = verifier(&minter, TokenVerifierSettings::default());
    let claims = claims_for("u", "*", "free", Utc::now().timestamp() + 3600);

    let hs256 = minter.mint_with_header(&json!({ "alg": "HS256", "kid": "k1" }), &claims);
    assert_eq!(verifier.verify(&hs256).await, Err(AuthError::InvalidToken));

    let no_kid = minter.mint_with_header(&json!({ "alg": "EdDSA" }), &claims);
    assert_eq!(verifier.verify(&no_kid).await, Err(AuthError::InvalidToken));

    assert_eq!(source.fetch_count(), 0, "rejected tokens never trigger a fetch");
}

#[tokio::test]
async fn test_unknown_kid_triggers_at_most_one_refresh() {
    let minter = TokenMinter::new("k1");
    let rogue = TokenMinter::new("rogue");
    let (verifier, source) = verifier(&minter, TokenVerifierSettings::default());

    verifier.verify(&minter.token_for("u", "", "free")).await.unwrap();
    for _ in 0..5 {
        let token = rogue.token_for("u", "*", "free");
        assert_eq!(verifier.verify(&token).await, Err(AuthError::InvalidToken));
    }
    // the initial load counts as the last attempt, so the cool-down holds
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn test_issuer_outage_before_first_load_is_unavailable() {
    let minter = TokenMinter::new("k1");
    let (verifier, source) = verifier(&minter, TokenVerifierSettings::default());
    source.fail.store(true, Ordering::SeqCst);

    let result = verifier.verify(&minter.token_for("u", "", "free")).await;
    assert!(matches!(result, Err(AuthError::UpstreamUnavailable(_))));
}

#[tokio::test]
async fn test_issuer_and_audience_checked_when_configured() {
    let minter = TokenMinter::new("k1");
    let (verifier, _) = verifier(
        &minter,
        TokenVerifierSettings {
            issuer: Some("https://auth.example.com".to_string()),
            audience: Some("authenticated".to_string()),
            clock_skew: Duration::from_secs(60),
        },
    );
    let exp = Utc::now().timestamp() + 3600;

    let good = minter.mint(&json!({
        "sub": "u", "exp": exp,
        "iss": "https://auth.example.com", "aud": "authenticated"
    }));
    assert!(verifier.verify(&good).await.is_ok());

    let wrong_issuer = minter.mint(&json!({
        "sub": "u", "exp": exp,
        "iss": "https://evil.example.com", "aud": "authenticated"
    }));
    assert_eq!(verifier.verify(&wrong_issuer).await, Err(AuthError::InvalidToken));

    let missing_audience = minter.mint(&json!({
        "sub": "u", "exp": exp, "iss": "https://auth.example.com"
    }));
    assert_eq!(verifier.verify(&missing_audience).await, Err(AuthError::InvalidToken));
}
