// Shared in-process state: rate budgets, signing keys, tier lookups

pub mod key_set_cache;
pub mod rate_limiter;
pub mod tier_cache;
