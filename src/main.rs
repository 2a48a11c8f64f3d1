// Main entry point for Sentinel Auth

use sentinel_auth::api::{create_router, ApiKeyRepository, AppState, KeySetSource, PrincipalDirectory};
use sentinel_auth::auth::coordinator::AuthCoordinator;
use sentinel_auth::auth::key_store::KeyStore;
use sentinel_auth::auth::token_verifier::TokenVerifier;
use sentinel_auth::config::Config;
use sentinel_auth::core::metrics::AuthMetrics;
use sentinel_auth::infra::jwks::HttpKeySetSource;
use sentinel_auth::infra::memory_store::InMemoryStore;
use sentinel_auth::infra::supabase::SupabaseClient;
use sentinel_auth::infra::supabase_store::SupabaseStore;
use sentinel_auth::state::key_set_cache::SigningKeyCache;
use sentinel_auth::state::rate_limiter::RateLimiter;
use sentinel_auth::state::tier_cache::TierCache;

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Configuration
    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);

    // 2. Logging
    init_tracing(&config);
    info!(
        bind_address = %config.bind_address,
        port = config.port,
        "Starting sentinel-auth"
    );

    // 3. Metrics registry
    let metrics = Arc::new(AuthMetrics::new().context("Failed to create metrics registry")?);

    // 4. Persistence collaborator
    let (repository, directory): (Arc<dyn ApiKeyRepository>, Arc<dyn PrincipalDirectory>) =
        match (&config.supabase_url, &config.supabase_service_role_key) {
            (Some(url), Some(key)) => {
                info!(url = %url, "Using Supabase persistence");
                let client = Arc::new(SupabaseClient::new(url, key.clone(), config.upstream_timeout()));
                let store = Arc::new(SupabaseStore::new(client));
                (store.clone(), store)
            }
            _ => {
                warn!("SUPABASE_URL not set, API keys are kept in memory and lost on restart");
                let store = Arc::new(InMemoryStore::new());
                (store.clone(), store)
            }
        };

    // 5. Token verification
    let jwks_url = url::Url::parse(&config.jwks_url).context("Invalid JWKS_URL")?;
    info!(url = %jwks_url, "Signing keys will be fetched on demand");
    let source: Arc<dyn KeySetSource> = Arc::new(HttpKeySetSource::new(jwks_url, config.upstream_timeout()));
    let signing_keys = SigningKeyCache::with_metrics(source, config.key_set_cache_settings(), metrics.clone());
    let verifier = Arc::new(TokenVerifier::new(signing_keys, config.token_verifier_settings()));

    // 6. API keys
    let tiers = Arc::new(TierCache::new(
        directory,
        Duration::from_secs(config.tier_cache_ttl_secs),
        config.upstream_timeout(),
    ));
    let key_store = Arc::new(KeyStore::new(repository, tiers, config.key_store_settings()));

    // 7. Rate limiting
    let limiter = Arc::new(RateLimiter::new(config.tier_limits()));
    let sweeper = limiter.spawn_sweeper(Duration::from_secs(config.rate_limit_sweep_secs));
    info!(limits = ?limiter.limits(), "Rate limiter initialized");

    // 8. Coordinator and router
    let coordinator = Arc::new(AuthCoordinator::new(
        verifier,
        key_store.clone(),
        limiter,
        Some(metrics.clone()),
    ));
    let app_state = AppState {
        coordinator,
        key_store,
        metrics,
        config: config.clone(),
    };
    let app = create_router(app_state);

    // 9. Serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = %e, "Server error");
            e
        })?;

    sweeper.shutdown();
    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber based on configuration
///
/// `RUST_LOG` wins over `LOG_LEVEL`.
fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
