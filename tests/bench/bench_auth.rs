// Performance benchmarks for the per-request hot path

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sentinel_auth::auth::api_key::{ApiKey, ApiKeyHash};
use sentinel_auth::core::models::Tier;
use sentinel_auth::core::scope::ScopeMatcher;
use sentinel_auth::state::rate_limiter::{RateLimiter, TierLimits};
use std::collections::BTreeSet;
use std::time::Duration;

fn bench_scope_matching(c: &mut Criterion) {
    let granted: BTreeSet<String> = ["conversations:read", "profile:read", "keys:*", "chat:send:*"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    c.bench_function("scope_exact_match", |b| {
        b.iter(|| ScopeMatcher::is_allowed(black_box(&granted), black_box("profile:read")))
    });

    c.bench_function("scope_deep_wildcard_miss", |b| {
        b.iter(|| ScopeMatcher::is_allowed(black_box(&granted), black_box("admin:users:delete:hard")))
    });
}

fn bench_rate_limiter(c: &mut Criterion) {
    let limiter = RateLimiter::new(TierLimits::with_window(
        Duration::from_secs(60),
        Some(u32::MAX),
        None,
        None,
        None,
    ));

    c.bench_function("rate_limit_check_hot_identity", |b| {
        b.iter(|| limiter.check(black_box("user-1"), Tier::Free))
    });

    let identities: Vec<String> = (0..1024).map(|i| format!("user-{}", i)).collect();
    let mut next = 0;
    c.bench_function("rate_limit_check_spread_identities", |b| {
        b.iter(|| {
            next = (next + 1) % identities.len();
            limiter.check(black_box(&identities[next]), Tier::Free)
        })
    });
}

fn bench_api_key_hash(c: &mut Criterion) {
    let key = ApiKey::generate();
    let stored = key.hash();

    c.bench_function("api_key_hash_and_compare", |b| {
        b.iter(|| {
            let hash = ApiKeyHash::from_api_key(black_box(key.expose_secret()));
            hash.matches(stored.as_str())
        })
    });
}

criterion_group!(benches, bench_scope_matching, bench_rate_limiter, bench_api_key_hash);
criterion_main!(benches);
