// Configuration management

use crate::auth::key_store::KeyStoreSettings;
use crate::auth::token_verifier::TokenVerifierSettings;
use crate::core::errors::ConfigError;
use crate::core::scope::canonicalize_scopes;
use crate::state::key_set_cache::KeySetCacheSettings;
use crate::state::rate_limiter::TierLimits;
use secrecy::Secret;
use std::env;
use std::time::Duration;

/// Sentinel accepted by the per-tier limits for "no budget"
const UNLIMITED: &str = "unlimited";

/// Longest lifetime an API key may be issued with
pub const MAX_API_KEY_TTL_DAYS: u32 = 3650;

/// Application configuration loaded from environment variables
///
/// Without `SUPABASE_URL` the service runs against the in-memory store and
/// `JWKS_URL` must point at the token issuer directly.
#[derive(Debug, Clone)]
pub struct Config {
    // Server configuration
    pub bind_address: String,
    pub port: u16,

    // Persistence collaborator (optional)
    pub supabase_url: Option<String>,
    pub supabase_service_role_key: Option<Secret<String>>,

    // Token issuer
    pub jwks_url: String,
    pub token_issuer: Option<String>,
    pub token_audience: Option<String>,
    pub jwks_cache_ttl_secs: u64,
    pub jwks_min_refresh_secs: u64,
    pub clock_skew_secs: u64,
    pub upstream_timeout_secs: u64,

    // API keys
    pub api_key_default_ttl_days: u32,
    pub api_key_default_scopes: Vec<String>,

    // Rate limiting; None = unlimited
    pub rate_limit_window_ms: u64,
    pub rate_limit_free: Option<u32>,
    pub rate_limit_plus: Option<u32>,
    pub rate_limit_pro: Option<u32>,
    pub rate_limit_enterprise: Option<u32>,
    pub rate_limit_sweep_secs: u64,
    pub tier_cache_ttl_secs: u64,

    // Middleware configuration
    pub request_timeout_secs: u64,
    pub body_size_limit_bytes: usize,

    // Logging configuration
    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Supports `.env` file loading in development (via dotenv crate).
    pub fn from_env() -> Result<Self, ConfigError> {
        #[cfg(not(test))]
        {
            dotenv::dotenv().ok(); // file may not exist
        }

        let supabase_url = Self::get_optional_env("SUPABASE_URL")?
            .map(|url| url.trim_end_matches('/').to_string());
        let jwks_url = match (Self::get_optional_env("JWKS_URL")?, &supabase_url) {
            (Some(url), _) => url,
            (None, Some(project)) => format!("{}/auth/v1/.well-known/jwks.json", project),
            (None, None) => {
                return Err(ConfigError(
                    "JWKS_URL must be set when SUPABASE_URL is not".to_string(),
                ))
            }
        };

        let config = Self {
            bind_address: Self::get_env_or_default("BIND_ADDRESS", "0.0.0.0")?,
            port: Self::parse_port()?,
            supabase_url,
            supabase_service_role_key: Self::get_optional_env("SUPABASE_SERVICE_ROLE_KEY")?.map(Secret::new),
            jwks_url,
            token_issuer: Self::get_optional_env("TOKEN_ISSUER")?,
            token_audience: Self::get_optional_env("TOKEN_AUDIENCE")?,
            jwks_cache_ttl_secs: Self::parse_u64_or_default("JWKS_CACHE_TTL_SECS", 600)?,
            jwks_min_refresh_secs: Self::parse_u64_or_default("JWKS_MIN_REFRESH_SECS", 30)?,
            clock_skew_secs: Self::parse_u64_or_default("CLOCK_SKEW_SECS", 60)?,
            upstream_timeout_secs: Self::parse_u64_or_default("UPSTREAM_TIMEOUT_SECS", 5)?,
            api_key_default_ttl_days: Self::parse_u32_or_default("API_KEY_DEFAULT_TTL_DAYS", 365)?,
            api_key_default_scopes: Self::parse_list_or_default(
                "API_KEY_DEFAULT_SCOPES",
                "chat:*,conversations:*",
            )?,
            rate_limit_window_ms: Self::parse_u64_or_default("RATE_LIMIT_WINDOW_MS", 60_000)?,
            rate_limit_free: Self::parse_limit_or_default("RATE_LIMIT_FREE", Some(100))?,
            rate_limit_plus: Self::parse_limit_or_default("RATE_LIMIT_PLUS", Some(300))?,
            rate_limit_pro: Self::parse_limit_or_default("RATE_LIMIT_PRO", Some(1000))?,
            rate_limit_enterprise: Self::parse_limit_or_default("RATE_LIMIT_ENTERPRISE", None)?,
            rate_limit_sweep_secs: Self::parse_u64_or_default("RATE_LIMIT_SWEEP_SECS", 60)?,
            tier_cache_ttl_secs: Self::parse_u64_or_default("TIER_CACHE_TTL_SECS", 300)?,
            request_timeout_secs: Self::parse_u64_or_default("REQUEST_TIMEOUT_SECS", 30)?,
            body_size_limit_bytes: Self::parse_usize_or_default("BODY_SIZE_LIMIT_BYTES", 1024 * 1024)?,
            log_level: Self::get_env_or_default("LOG_LEVEL", "info")?,
            log_format: Self::get_env_or_default("LOG_FORMAT", "json")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn tier_limits(&self) -> TierLimits {
        TierLimits::with_window(
            Duration::from_millis(self.rate_limit_window_ms),
            self.rate_limit_free,
            self.rate_limit_plus,
            self.rate_limit_pro,
            self.rate_limit_enterprise,
        )
    }

    pub fn key_set_cache_settings(&self) -> KeySetCacheSettings {
        KeySetCacheSettings {
            ttl: Duration::from_secs(self.jwks_cache_ttl_secs),
            fetch_timeout: self.upstream_timeout(),
            min_refresh_interval: Duration::from_secs(self.jwks_min_refresh_secs),
        }
    }

    pub fn token_verifier_settings(&self) -> TokenVerifierSettings {
        TokenVerifierSettings {
            issuer: self.token_issuer.clone(),
            audience: self.token_audience.clone(),
            clock_skew: Duration::from_secs(self.clock_skew_secs),
        }
    }

    pub fn key_store_settings(&self) -> KeyStoreSettings {
        KeyStoreSettings {
            default_scopes: self.api_key_default_scopes.clone(),
            default_ttl: chrono::Duration::days(i64::from(self.api_key_default_ttl_days)),
            operation_timeout: self.upstream_timeout(),
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// Get environment variable or return default value
    fn get_env_or_default(key: &str, default: &str) -> Result<String, ConfigError> {
        Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
    }

    /// Get optional environment variable; empty counts as unset
    fn get_optional_env(key: &str) -> Result<Option<String>, ConfigError> {
        match env::var(key) {
            Ok(value) if !value.trim().is_empty() => Ok(Some(value.trim().to_string())),
            _ => Ok(None),
        }
    }

    /// Parse port from PORT environment variable
    fn parse_port() -> Result<u16, ConfigError> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "8000".to_string());
        let port = port_str
            .parse::<u16>()
            .map_err(|e| ConfigError(format!("Invalid PORT value '{}': {}", port_str, e)))?;

        if port == 0 {
            return Err(ConfigError("PORT must be between 1 and 65535".to_string()));
        }

        Ok(port)
    }

    /// Parse u64 from environment variable or return default
    fn parse_u64_or_default(key: &str, default: u64) -> Result<u64, ConfigError> {
        match env::var(key) {
            Ok(value) => Self::parse_positive(key, &value),
            _ => Ok(default),
        }
    }

    /// Parse u32 from environment variable or return default
    fn parse_u32_or_default(key: &str, default: u32) -> Result<u32, ConfigError> {
        match env::var(key) {
            Ok(value) => Self::parse_positive(key, &value),
            _ => Ok(default),
        }
    }

    /// Parse usize from environment variable or return default
    fn parse_usize_or_default(key: &str, default: usize) -> Result<usize, ConfigError> {
        match env::var(key) {
            Ok(value) => Self::parse_positive(key, &value),
            _ => Ok(default),
        }
    }

    /// Per-tier request maximum, or the `unlimited` sentinel
    fn parse_limit_or_default(key: &str, default: Option<u32>) -> Result<Option<u32>, ConfigError> {
        match env::var(key) {
            Ok(value) if value.trim().eq_ignore_ascii_case(UNLIMITED) => Ok(None),
            Ok(value) => Self::parse_positive(key, &value).map(Some),
            _ => Ok(default),
        }
    }

    /// Comma-separated list
    fn parse_list_or_default(key: &str, default: &str) -> Result<Vec<String>, ConfigError> {
        let raw = Self::get_env_or_default(key, default)?;
        Ok(raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn parse_positive<T>(key: &str, value: &str) -> Result<T, ConfigError>
    where
        T: std::str::FromStr + PartialEq + Default,
        T::Err: std::fmt::Display,
    {
        let parsed = value
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError(format!("Invalid {} value '{}': {}", key, value, e)))?;

        if parsed == T::default() {
            return Err(ConfigError(format!("{} must be greater than 0", key)));
        }

        Ok(parsed)
    }

    /// Validate all configuration values
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.supabase_url {
            Self::validate_url(url, "Supabase")?;
            if self.supabase_service_role_key.is_none() {
                return Err(ConfigError(
                    "SUPABASE_SERVICE_ROLE_KEY must be set when SUPABASE_URL is set".to_string(),
                ));
            }
        }
        Self::validate_url(&self.jwks_url, "JWKS")?;

        let scopes = canonicalize_scopes(&self.api_key_default_scopes)
            .map_err(|e| ConfigError(format!("Invalid API_KEY_DEFAULT_SCOPES: {}", e)))?;
        if scopes.is_empty() {
            return Err(ConfigError("API_KEY_DEFAULT_SCOPES must not be empty".to_string()));
        }

        if self.api_key_default_ttl_days > MAX_API_KEY_TTL_DAYS {
            return Err(ConfigError(format!(
                "API_KEY_DEFAULT_TTL_DAYS must be at most {}",
                MAX_API_KEY_TTL_DAYS
            )));
        }

        Self::validate_log_level(&self.log_level)?;
        Self::validate_log_format(&self.log_format)?;

        Ok(())
    }

    /// Validate URL format
    fn validate_url(url: &str, description: &str) -> Result<(), ConfigError> {
        url::Url::parse(url)
            .map_err(|e| ConfigError(format!("Invalid {} URL '{}': {}", description, url, e)))?;
        Ok(())
    }

    /// Validate log level
    fn validate_log_level(level: &str) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(ConfigError(format!(
                "Invalid LOG_LEVEL '{}': must be one of {}",
                level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }

    /// Validate log format
    fn validate_log_format(format: &str) -> Result<(), ConfigError> {
        if format != "json" && format != "text" {
            return Err(ConfigError(format!(
                "Invalid LOG_FORMAT '{}': must be 'json' or 'text'",
                format
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Create a test configuration
    ///
    /// Bypasses environment loading; in-memory store, local JWKS URL.
    pub fn test_config() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8000,
            supabase_url: None,
            supabase_service_role_key: None,
            jwks_url: "http://127.0.0.1:9999/.well-known/jwks.json".to_string(),
            token_issuer: None,
            token_audience: None,
            jwks_cache_ttl_secs: 600,
            jwks_min_refresh_secs: 30,
            clock_skew_secs: 60,
            upstream_timeout_secs: 5,
            api_key_default_ttl_days: 365,
            api_key_default_scopes: vec!["chat:*".to_string(), "conversations:*".to_string()],
            rate_limit_window_ms: 60_000,
            rate_limit_free: Some(100),
            rate_limit_plus: Some(300),
            rate_limit_pro: Some(1000),
            rate_limit_enterprise: None,
            rate_limit_sweep_secs: 60,
            tier_cache_ttl_secs: 300,
            request_timeout_secs: 30,
            body_size_limit_bytes: 1024 * 1024,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}
