// Unit tests for the signing key set cache against real Ed25519 keys

use crate::common::{key_set, StaticKeySetSource, TokenMinter};
use jsonwebtoken::jwk::JwkSet;
use sentinel_auth::state::key_set_cache::{KeySetCacheSettings, SigningKeyCache, SigningKeySet};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn settings(min_refresh: Duration) -> KeySetCacheSettings {
    KeySetCacheSettings {
        ttl: Duration::from_secs(10),
        fetch_timeout: Duration::from_secs(1),
        min_refresh_interval: min_refresh,
    }
}

#[test]
fn test_only_signing_keys_are_trusted() {
    let signer = TokenMinter::new("sig");
    let mut encryption = signer.jwk();
    encryption["kid"] = json!("enc");
    encryption["use"] = json!("enc");
    let symmetric = json!({ "kty": "oct", "k": "c2VjcmV0LXNoYXJlZA", "kid": "sym" });

    let jwks: JwkSet = serde_json::from_value(json!({
        "keys": [signer.jwk(), encryption, symmetric]
    }))
    .unwrap();
    let set = SigningKeySet::from_jwks(&jwks, Duration::from_secs(60));

    assert_eq!(set.len(), 1);
    assert!(set.contains("sig"));
    assert!(!set.contains("enc"));
    assert!(!set.contains("sym"));
}

#[tokio::test]
async fn test_issuer_key_rotation_is_picked_up() {
    let old = TokenMinter::new("old");
    let new = TokenMinter::new("new");
    let source = Arc::new(StaticKeySetSource::new(old.key_set()));
    let cache = SigningKeyCache::new(source.clone(), settings(Duration::ZERO));

    assert!(cache.resolve("old").await.unwrap().is_some());
    assert!(cache.resolve("new").await.unwrap().is_none());

    source.publish(key_set(&[&old, &new]));
    assert!(cache.resolve("new").await.unwrap().is_some());
    assert!(cache.resolve("old").await.unwrap().is_some());
    assert_eq!(source.fetch_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_outage_after_load_keeps_last_known_good_set() {
    let minter = TokenMinter::new("k1");
    let source = Arc::new(StaticKeySetSource::new(minter.key_set()));
    let cache = SigningKeyCache::new(source.clone(), settings(Duration::from_secs(1)));
    assert!(cache.resolve("k1").await.unwrap().is_some());

    source.fail.store(true, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(11)).await;

    assert!(cache.resolve("k1").await.unwrap().is_some(), "stale key still served");
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(source.fetch_count(), 2);
    assert!(cache.snapshot().is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(
        cache.resolve("unknown").await.unwrap().is_none(),
        "unknown kid with a cached set is rejected, not an outage"
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_first_load_only_fails_waiting_requests() {
    let minter = TokenMinter::new("k1");
    let source = Arc::new(StaticKeySetSource::new(minter.key_set()));
    source.fail.store(true, Ordering::SeqCst);
    let cache = SigningKeyCache::new(source.clone(), settings(Duration::from_secs(5)));

    assert!(cache.resolve("k1").await.is_err());
    assert!(cache.resolve("k1").await.is_err());
    assert_eq!(source.fetch_count(), 2, "each request without a loaded set fetches");

    // issuer back within the refresh interval: the next request succeeds
    source.fail.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(cache.resolve("k1").await.unwrap().is_some());
    assert_eq!(source.fetch_count(), 3);

    // once loaded, unknown kids are throttled again
    assert!(cache.resolve("rogue").await.unwrap().is_none());
    assert!(cache.resolve("rogue").await.unwrap().is_none());
    assert_eq!(source.fetch_count(), 3);
}
