//! Gate configuration.

use std::time::Duration;
use thiserror::Error;

const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_BUFFER_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_ISSUER: &str = "gatehouse";
const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60 * 60;
const DEFAULT_RATE_LIMIT_COUNT: u64 = 15_000;
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);
/// Blacklist entries outlive the token by this many seconds to absorb clock skew.
const DEFAULT_BLACKLIST_GRACE_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("token lifetime must be positive")]
    Lifetime,
    #[error("rotation buffer ({buffer}s) must be shorter than the token lifetime ({lifetime}s)")]
    Buffer { buffer: i64, lifetime: i64 },
    #[error("rate limit window must be at least one second")]
    Window,
    #[error("rate limit count must be positive")]
    Limit,
    #[error("store timeout must be positive")]
    StoreTimeout,
}

#[derive(Clone, Debug)]
pub struct GateConfig {
    token_lifetime_seconds: i64,
    buffer_seconds: i64,
    issuer: String,
    multipoint: bool,
    rate_limit_window: Duration,
    rate_limit_count: u64,
    development: bool,
    store_timeout: Duration,
    client_ip_header: Option<String>,
    blacklist_grace_seconds: i64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl GateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token_lifetime_seconds: DEFAULT_TOKEN_LIFETIME_SECONDS,
            buffer_seconds: DEFAULT_BUFFER_SECONDS,
            issuer: DEFAULT_ISSUER.to_string(),
            multipoint: false,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECONDS),
            rate_limit_count: DEFAULT_RATE_LIMIT_COUNT,
            development: false,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            client_ip_header: None,
            blacklist_grace_seconds: DEFAULT_BLACKLIST_GRACE_SECONDS,
        }
    }

    #[must_use]
    pub fn with_token_lifetime_seconds(mut self, seconds: i64) -> Self {
        self.token_lifetime_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_buffer_seconds(mut self, seconds: i64) -> Self {
        self.buffer_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_multipoint(mut self, enabled: bool) -> Self {
        self.multipoint = enabled;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, window: Duration, count: u64) -> Self {
        self.rate_limit_window = window;
        self.rate_limit_count = count;
        self
    }

    #[must_use]
    pub fn with_development(mut self, enabled: bool) -> Self {
        self.development = enabled;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_client_ip_header(mut self, header: Option<String>) -> Self {
        self.client_ip_header = header.filter(|h| !h.trim().is_empty());
        self
    }

    #[must_use]
    pub fn token_lifetime_seconds(&self) -> i64 {
        self.token_lifetime_seconds
    }

    #[must_use]
    pub fn buffer_seconds(&self) -> i64 {
        self.buffer_seconds
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn multipoint(&self) -> bool {
        self.multipoint
    }

    #[must_use]
    pub fn rate_limit_window(&self) -> Duration {
        self.rate_limit_window
    }

    #[must_use]
    pub fn rate_limit_count(&self) -> u64 {
        self.rate_limit_count
    }

    #[must_use]
    pub fn development(&self) -> bool {
        self.development
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn client_ip_header(&self) -> Option<&str> {
        self.client_ip_header.as_deref()
    }

    #[must_use]
    pub fn blacklist_grace_seconds(&self) -> i64 {
        self.blacklist_grace_seconds
    }

    /// # Errors
    /// Returns the first inconsistent setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_lifetime_seconds <= 0 {
            return Err(ConfigError::Lifetime);
        }
        if self.buffer_seconds < 0 || self.buffer_seconds >= self.token_lifetime_seconds {
            return Err(ConfigError::Buffer {
                buffer: self.buffer_seconds,
                lifetime: self.token_lifetime_seconds,
            });
        }
        if self.rate_limit_window < Duration::from_secs(1) {
            return Err(ConfigError::Window);
        }
        if self.rate_limit_count == 0 {
            return Err(ConfigError::Limit);
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::StoreTimeout);
        }
        Ok(())
    }
}
