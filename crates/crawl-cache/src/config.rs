//! Runtime configuration

use std::time::Duration;

use crawl_cache_core::{Category, CategoryPolicies, CategoryPolicy};

/// Circuit breaker settings for the durable store
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(10),
        }
    }
}

/// Activity recorder settings
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Records per sink write
    pub batch_size: usize,
    /// Records kept in memory for summaries
    pub retention: usize,
    /// Periodic flush while the system is running
    pub flush_interval: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            retention: 10_000,
            flush_interval: Duration::from_secs(5),
        }
    }
}

/// Configuration for the cache system
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL, memory capacity and SWR per category
    pub policies: CategoryPolicies,
    /// Upper bound on a single fill, shared by every waiter
    pub fill_timeout: Duration,
    /// TTL jitter fraction (0.0 - 1.0) to spread expiries
    pub ttl_jitter: f64,
    /// Lifetime of a cross-process fill lease
    pub lease_ttl: Duration,
    /// Poll period while another process holds the lease
    pub lease_poll_interval: Duration,
    /// Memory sweeper period; `None` relies on lazy expiry only
    pub sweep_interval: Option<Duration>,
    pub breaker: BreakerConfig,
    pub recorder: RecorderConfig,
    /// Training samples scoring below this are not stored
    pub min_quality_score: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policies: CategoryPolicies::default(),
            fill_timeout: Duration::from_secs(30),
            ttl_jitter: 0.0,
            lease_ttl: Duration::from_secs(60),
            lease_poll_interval: Duration::from_millis(250),
            sweep_interval: Some(Duration::from_secs(60)),
            breaker: BreakerConfig::default(),
            recorder: RecorderConfig::default(),
            min_quality_score: 0.0,
        }
    }
}

impl CacheConfig {
    /// Replace the policy for one category
    pub fn policy(mut self, category: Category, policy: CategoryPolicy) -> Self {
        self.policies = self.policies.set(category, policy);
        self
    }

    /// Set the fill timeout
    pub fn fill_timeout(mut self, timeout: Duration) -> Self {
        self.fill_timeout = timeout;
        self
    }

    /// Set TTL jitter, clamped to 0.0 - 1.0
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set lease lifetime and poll interval
    pub fn lease(mut self, ttl: Duration, poll_interval: Duration) -> Self {
        self.lease_ttl = ttl;
        self.lease_poll_interval = poll_interval;
        self
    }

    /// Set or disable the memory sweeper
    pub fn sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set circuit breaker parameters
    pub fn breaker(mut self, failure_threshold: u32, reset_timeout: Duration) -> Self {
        self.breaker = BreakerConfig {
            failure_threshold,
            reset_timeout,
        };
        self
    }

    /// Set recorder parameters
    pub fn recorder(mut self, recorder: RecorderConfig) -> Self {
        self.recorder = recorder;
        self
    }

    /// Set the minimum quality score for training samples
    pub fn min_quality_score(mut self, score: f64) -> Self {
        self.min_quality_score = score;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.fill_timeout, Duration::from_secs(30));
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.recorder.batch_size, 256);
        assert_eq!(
            config.policies[Category::Url].ttl,
            Some(Duration::from_secs(15 * 60))
        );
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::default()
            .policy(Category::Screenshot, CategoryPolicy::new().ttl_secs(1).capacity(8))
            .ttl_jitter(4.0)
            .sweep_interval(None)
            .min_quality_score(0.4);

        assert_eq!(config.policies[Category::Screenshot].memory_capacity, 8);
        assert_eq!(config.ttl_jitter, 1.0);
        assert!(config.sweep_interval.is_none());
        assert_eq!(config.min_quality_score, 0.4);
    }
}
