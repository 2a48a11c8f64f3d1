// Cached tier lookups in front of the principal directory

use crate::api::PrincipalDirectory;
use crate::core::models::Tier;
use crate::core::resilience::with_timeout;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Owner id → subscription tier, cached with a TTL.
///
/// Lookups never fail: an unknown owner or an unreachable directory resolves
/// to `Tier::Free`, the most restrictive budget. Fallbacks are not cached so
/// the real tier is picked up once the directory answers again.
pub struct TierCache {
    directory: Arc<dyn PrincipalDirectory>,
    cache: Cache<String, Tier>,
    lookup_timeout: Duration,
}

impl TierCache {
    pub fn new(directory: Arc<dyn PrincipalDirectory>, ttl: Duration, lookup_timeout: Duration) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(10_000)
            .build();

        Self {
            directory,
            cache,
            lookup_timeout,
        }
    }

    pub async fn tier_for(&self, owner_id: &str) -> Tier {
        if let Some(tier) = self.cache.get(owner_id).await {
            return tier;
        }

        match with_timeout(self.lookup_timeout, self.directory.tier_for(owner_id)).await {
            Ok(Some(tier)) => {
                self.cache.insert(owner_id.to_string(), tier).await;
                tier
            }
            Ok(None) => {
                warn!(owner_id = %owner_id, "No profile for key owner, applying free tier");
                Tier::Free
            }
            Err(e) => {
                warn!(owner_id = %owner_id, error = %e, "Tier lookup failed, applying free tier");
                Tier::Free
            }
        }
    }
}
