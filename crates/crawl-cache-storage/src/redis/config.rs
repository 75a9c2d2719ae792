//! Configuration for the Redis durable store

use std::time::Duration;

/// Configuration for Redis connection and key layout
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub url: String,

    /// Connection pool size
    pub pool_size: u32,

    /// Connection timeout
    pub connection_timeout: Duration,

    /// Optional key prefix for all keys (e.g., "crawl")
    pub key_prefix: Option<String>,

    /// How long an entry stays readable after its TTL passes
    ///
    /// Redis drops the key at `ttl + stale_retention`; until then the entry
    /// is served stale while a refresh runs.
    pub stale_retention: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            connection_timeout: Duration::from_secs(5),
            key_prefix: Some("crawl".to_string()),
            stale_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl RedisConfig {
    /// Create new config with URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set pool size
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set key prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Set connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set stale retention window
    pub fn stale_retention(mut self, retention: Duration) -> Self {
        self.stale_retention = retention;
        self
    }

    pub(crate) fn key(&self, rest: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}:{rest}"),
            None => rest.to_string(),
        }
    }
}
