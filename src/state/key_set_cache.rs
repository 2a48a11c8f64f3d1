// Signing key set cache with single-flight refresh

use crate::api::KeySetSource;
use crate::core::errors::UpstreamError;
use crate::core::metrics::AuthMetrics;
use crate::core::resilience::with_timeout;
use futures::future::{BoxFuture, FutureExt, Shared};
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet, PublicKeyUse};
use jsonwebtoken::DecodingKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Trusted verification keys published by the token issuer, keyed by `kid`
pub struct SigningKeySet {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
    ttl: Duration,
}

impl SigningKeySet {
    /// Build from a JWKS document. Keys without a `kid`, encryption keys,
    /// symmetric keys and keys of unsupported types are skipped.
    pub fn from_jwks(jwks: &JwkSet, ttl: Duration) -> Self {
        let mut keys = HashMap::with_capacity(jwks.keys.len());
        for jwk in &jwks.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                debug!("Skipping published key without kid");
                continue;
            };
            if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
                continue;
            }
            if matches!(jwk.algorithm, AlgorithmParameters::OctetKey(_)) {
                warn!(kid = %kid, "Ignoring symmetric key in published key set");
                continue;
            }
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(e) => {
                    warn!(kid = %kid, error = %e, "Skipping unusable published key");
                }
            }
        }

        Self {
            keys,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    pub fn get(&self, kid: &str) -> Option<&DecodingKey> {
        self.keys.get(kid)
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now >= self.fetched_at + self.ttl
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeySetCacheSettings {
    /// Age after which the cached set is refreshed
    pub ttl: Duration,
    /// Deadline for one fetch from the issuer
    pub fetch_timeout: Duration,
    /// Minimum spacing between fetch attempts once a set is loaded
    pub min_refresh_interval: Duration,
}

impl Default for KeySetCacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            fetch_timeout: Duration::from_secs(5),
            min_refresh_interval: Duration::from_secs(30),
        }
    }
}

/// Why a refresh is wanted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshTrigger {
    /// Nothing loaded yet: every request may fetch or join the fetch in flight
    Cold,
    /// Stale set or unknown kid: attempts spaced by `min_refresh_interval`
    Warm,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Arc<SigningKeySet>, UpstreamError>>>;

#[derive(Default)]
struct RefreshSlot {
    running: Option<(u64, RefreshFuture)>,
    generation: u64,
    last_attempt: Option<Instant>,
}

struct CacheInner {
    source: Arc<dyn KeySetSource>,
    settings: KeySetCacheSettings,
    current: RwLock<Option<Arc<SigningKeySet>>>,
    refresh: Mutex<RefreshSlot>,
    metrics: Option<Arc<AuthMetrics>>,
}

/// Shared, read-mostly key set with at most one fetch in flight.
///
/// Readers take a snapshot under a short read lock and never wait for a
/// refresh unless they need a key the snapshot lacks. The fetch runs as its
/// own task, so a caller that goes away does not cancel it.
#[derive(Clone)]
pub struct SigningKeyCache {
    inner: Arc<CacheInner>,
}

impl SigningKeyCache {
    pub fn new(source: Arc<dyn KeySetSource>, settings: KeySetCacheSettings) -> Self {
        Self::build(source, settings, None)
    }

    pub fn with_metrics(
        source: Arc<dyn KeySetSource>,
        settings: KeySetCacheSettings,
        metrics: Arc<AuthMetrics>,
    ) -> Self {
        Self::build(source, settings, Some(metrics))
    }

    fn build(
        source: Arc<dyn KeySetSource>,
        settings: KeySetCacheSettings,
        metrics: Option<Arc<AuthMetrics>>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source,
                settings,
                current: RwLock::new(None),
                refresh: Mutex::new(RefreshSlot::default()),
                metrics,
            }),
        }
    }

    /// Last successfully fetched set, if any
    pub fn snapshot(&self) -> Option<Arc<SigningKeySet>> {
        self.inner
            .current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Resolve the verification key for `kid`.
    ///
    /// - known kid, fresh set: served from cache
    /// - known kid, stale set: served from the stale set, refresh kicked off
    /// - unknown kid: joins (or starts) one refresh, then looks again
    /// - no set yet: joins (or starts) a fetch; if it fails only the requests
    ///   waiting on it get `Err`, the next request fetches again
    ///
    /// `Ok(None)` means the kid is not trusted even after refreshing.
    pub async fn resolve(&self, kid: &str) -> Result<Option<DecodingKey>, UpstreamError> {
        match self.snapshot() {
            Some(set) => {
                if let Some(key) = set.get(kid) {
                    if set.is_stale(Instant::now()) {
                        // Readers keep the last-known-good set meanwhile
                        let _ = self.start_or_join_refresh(RefreshTrigger::Warm);
                    }
                    return Ok(Some(key.clone()));
                }

                let Some(refresh) = self.start_or_join_refresh(RefreshTrigger::Warm) else {
                    debug!(kid = %kid, "Unknown kid within refresh cool-down");
                    return Ok(None);
                };
                match refresh.await {
                    Ok(fresh) => Ok(fresh.get(kid).cloned()),
                    Err(e) => {
                        warn!(error = %e, "Key set refresh failed, keeping cached set");
                        Ok(None)
                    }
                }
            }
            None => {
                let refresh = self.start_or_join_refresh(RefreshTrigger::Cold).ok_or_else(|| {
                    UpstreamError::Unavailable("signing keys not loaded".to_string())
                })?;
                let fresh = refresh.await?;
                Ok(fresh.get(kid).cloned())
            }
        }
    }

    /// Join the in-flight refresh, or start one. A warm refresh is skipped
    /// when the last attempt was within `min_refresh_interval`.
    fn start_or_join_refresh(&self, trigger: RefreshTrigger) -> Option<RefreshFuture> {
        let mut slot = lock(&self.inner.refresh);
        if let Some((_, running)) = slot.running.as_ref() {
            return Some(running.clone());
        }

        let now = Instant::now();
        if trigger == RefreshTrigger::Warm {
            if let Some(last) = slot.last_attempt {
                if now.duration_since(last) < self.inner.settings.min_refresh_interval {
                    return None;
                }
            }
        }
        slot.last_attempt = Some(now);
        slot.generation += 1;
        let generation = slot.generation;

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.fetch_and_install(generation).await });
        let refresh: RefreshFuture = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(UpstreamError::Unavailable(format!("key set refresh aborted: {}", e))),
            }
        }
        .boxed()
        .shared();

        slot.running = Some((generation, refresh.clone()));
        Some(refresh)
    }
}

impl CacheInner {
    async fn fetch_and_install(
        self: Arc<Self>,
        generation: u64,
    ) -> Result<Arc<SigningKeySet>, UpstreamError> {
        let result = with_timeout(self.settings.fetch_timeout, self.source.fetch_key_set())
            .await
            .map(|jwks| Arc::new(SigningKeySet::from_jwks(&jwks, self.settings.ttl)));

        match &result {
            Ok(set) => {
                *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(set));
                info!(keys = set.len(), "Signing key set refreshed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_key_set_refresh("success");
                }
            }
            Err(e) => {
                warn!(error = %e, "Signing key set fetch failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_key_set_refresh("failure");
                }
            }
        }

        let mut slot = lock(&self.refresh);
        if matches!(slot.running, Some((g, _)) if g == generation) {
            slot.running = None;
        }
        result
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
