// Tiered fixed-window rate limiter, process-local

use crate::core::models::Tier;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Request budget for one window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub window: Duration,
    pub max_requests: u32,
}

impl RateLimit {
    pub fn per_window(max_requests: u32, window: Duration) -> Self {
        Self {
            window,
            max_requests: max_requests.max(1),
        }
    }
}

/// Tier → budget table; `None` is the unlimited sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub free: Option<RateLimit>,
    pub plus: Option<RateLimit>,
    pub pro: Option<RateLimit>,
    pub enterprise: Option<RateLimit>,
}

impl TierLimits {
    /// Same window for every tier, per-tier maximums
    pub fn with_window(
        window: Duration,
        free: Option<u32>,
        plus: Option<u32>,
        pro: Option<u32>,
        enterprise: Option<u32>,
    ) -> Self {
        let limit = |max: Option<u32>| max.map(|m| RateLimit::per_window(m, window));
        Self {
            free: limit(free),
            plus: limit(plus),
            pro: limit(pro),
            enterprise: limit(enterprise),
        }
    }

    pub fn for_tier(&self, tier: Tier) -> Option<RateLimit> {
        match tier {
            Tier::Free => self.free,
            Tier::Plus => self.plus,
            Tier::Pro => self.pro,
            Tier::Enterprise => self.enterprise,
        }
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        Self::with_window(Duration::from_secs(60), Some(100), Some(300), Some(1000), None)
    }
}

/// Limit/remaining counters reported to clients; `None` means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
}

impl Quota {
    pub fn unlimited() -> Self {
        Self {
            limit: None,
            remaining: None,
        }
    }

    fn limited(limit: u32, remaining: u32) -> Self {
        Self {
            limit: Some(limit),
            remaining: Some(remaining),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed(Quota),
    Denied { retry_after: Duration, limit: u32 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct RateBudget {
    window_start: Instant,
    count: u32,
    limit: u32,
    window: Duration,
}

impl RateBudget {
    fn open(now: Instant, limit: RateLimit) -> Self {
        Self {
            window_start: now,
            count: 1,
            limit: limit.max_requests,
            window: limit.window,
        }
    }

    fn window_end(&self) -> Instant {
        self.window_start + self.window
    }

    /// Window ended more than one window-length ago
    fn is_idle(&self, now: Instant) -> bool {
        now >= self.window_end() + self.window
    }
}

/// Per-identity fixed-window limiter.
///
/// Budgets live in a sharded map: increments for one identity are serialized
/// by its entry lock, identities on different shards never contend. Counters
/// are local to this process; several instances enforce independent budgets.
pub struct RateLimiter {
    limits: TierLimits,
    budgets: DashMap<String, RateBudget>,
}

impl RateLimiter {
    pub fn new(limits: TierLimits) -> Self {
        Self {
            limits,
            budgets: DashMap::new(),
        }
    }

    pub fn limits(&self) -> &TierLimits {
        &self.limits
    }

    /// Count one request for `identity` and decide whether it may proceed
    pub fn check(&self, identity: &str, tier: Tier) -> RateDecision {
        let limit = match self.limits.for_tier(tier) {
            Some(limit) => limit,
            None => return RateDecision::Allowed(Quota::unlimited()),
        };
        let max = limit.max_requests;
        let now = Instant::now();

        match self.budgets.entry(identity.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(RateBudget::open(now, limit));
                RateDecision::Allowed(Quota::limited(max, max - 1))
            }
            Entry::Occupied(mut slot) => {
                let budget = slot.get_mut();
                // Tier changes take effect on the live window
                budget.limit = max;
                budget.window = limit.window;

                if now >= budget.window_end() {
                    *budget = RateBudget::open(now, limit);
                    return RateDecision::Allowed(Quota::limited(max, max - 1));
                }

                if budget.count >= budget.limit {
                    return RateDecision::Denied {
                        retry_after: budget.window_end() - now,
                        limit: max,
                    };
                }

                budget.count += 1;
                RateDecision::Allowed(Quota::limited(max, max - budget.count))
            }
        }
    }

    /// Evict budgets idle for more than one window; returns the number evicted.
    ///
    /// `retain` holds each shard's write lock, so an entry being updated by a
    /// live request is never removed mid-update, and a just-updated entry is
    /// never idle.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        self.budgets.retain(|_, budget| {
            let keep = !budget.is_idle(now);
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    /// Number of identities currently tracked
    pub fn tracked(&self) -> usize {
        self.budgets.len()
    }

    /// Start the periodic sweep. The task stops when the handle is shut down
    /// or dropped, or once the limiter itself is gone.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> SweeperHandle {
        let limiter: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let evicted = limiter.sweep();
                if evicted > 0 {
                    debug!(evicted, remaining = limiter.tracked(), "Rate limit budgets swept");
                }
            }
        });
        SweeperHandle {
            handle: Some(handle),
        }
    }
}

/// Owns the background sweep task
pub struct SweeperHandle {
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
