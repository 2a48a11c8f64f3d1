// Prometheus metrics for the auth pipeline

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters owned by an explicit registry, constructed once at startup
pub struct AuthMetrics {
    registry: Registry,
    auth_success: IntCounterVec,
    auth_failure: IntCounterVec,
    rate_limited: IntCounterVec,
    key_set_refresh: IntCounterVec,
}

impl AuthMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let auth_success = IntCounterVec::new(
            Opts::new("auth_success_total", "Successful authentications by method"),
            &["method"],
        )?;
        let auth_failure = IntCounterVec::new(
            Opts::new("auth_failure_total", "Rejected requests by error code"),
            &["code"],
        )?;
        let rate_limited = IntCounterVec::new(
            Opts::new("rate_limited_total", "Requests denied by the rate limiter"),
            &["tier"],
        )?;
        let key_set_refresh = IntCounterVec::new(
            Opts::new("key_set_refresh_total", "Signing key set fetches by outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(auth_success.clone()))?;
        registry.register(Box::new(auth_failure.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;
        registry.register(Box::new(key_set_refresh.clone()))?;

        Ok(Self {
            registry,
            auth_success,
            auth_failure,
            rate_limited,
            key_set_refresh,
        })
    }

    pub fn record_success(&self, method: &str) {
        self.auth_success.with_label_values(&[method]).inc();
    }

    pub fn record_failure(&self, code: &str) {
        self.auth_failure.with_label_values(&[code]).inc();
    }

    pub fn record_rate_limited(&self, tier: &str) {
        self.rate_limited.with_label_values(&[tier]).inc();
    }

    pub fn record_key_set_refresh(&self, outcome: &str) {
        self.key_set_refresh.with_label_values(&[outcome]).inc();
    }

    /// Render all metrics in Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
