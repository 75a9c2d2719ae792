//! Metrics trait for cache observability

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CacheKey, Category};

/// Tier that answered a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// Per-process in-memory LRU
    Memory,
    /// Shared durable store
    Durable,
    /// Neither tier; the fill function produced the value
    Fill,
}

impl CacheTier {
    pub const ALL: [CacheTier; 3] = [CacheTier::Memory, CacheTier::Durable, CacheTier::Fill];

    /// Get tier as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::Durable => "durable",
            CacheTier::Fill => "fill",
        }
    }
}

/// Cache operation for latency tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOperation {
    Fetch,
    DurableGet,
    DurableWrite,
    Fill,
    Refresh,
    SampleInsert,
}

impl CacheOperation {
    /// Get operation as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOperation::Fetch => "fetch",
            CacheOperation::DurableGet => "durable_get",
            CacheOperation::DurableWrite => "durable_write",
            CacheOperation::Fill => "fill",
            CacheOperation::Refresh => "refresh",
            CacheOperation::SampleInsert => "sample_insert",
        }
    }
}

/// Reason an entry left the memory tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// TTL expired
    Expired,
    /// Category capacity reached
    Capacity,
    /// Explicitly invalidated
    Invalidated,
}

impl EvictionReason {
    /// Get reason as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Expired => "expired",
            EvictionReason::Capacity => "capacity",
            EvictionReason::Invalidated => "invalidated",
        }
    }
}

/// Trait for cache metrics/observability
///
/// Implement this to integrate with your metrics system (Prometheus, StatsD, etc.)
pub trait CacheMetrics: Send + Sync + 'static {
    /// Record a fresh hit
    fn record_hit(&self, key: &CacheKey, tier: CacheTier);

    /// Record a hard miss
    fn record_miss(&self, key: &CacheKey);

    /// Record a stale hit (served stale while revalidating)
    fn record_stale_hit(&self, key: &CacheKey);

    /// Record operation latency
    fn record_latency(&self, operation: CacheOperation, duration: Duration);

    /// Record a memory-tier eviction
    fn record_eviction(&self, category: Category, reason: EvictionReason);

    /// Record a completed fill
    fn record_fill(&self, category: Category, duration: Duration, success: bool);
}

/// No-op metrics implementation (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl CacheMetrics for NoopMetrics {
    #[inline]
    fn record_hit(&self, _key: &CacheKey, _tier: CacheTier) {}

    #[inline]
    fn record_miss(&self, _key: &CacheKey) {}

    #[inline]
    fn record_stale_hit(&self, _key: &CacheKey) {}

    #[inline]
    fn record_latency(&self, _operation: CacheOperation, _duration: Duration) {}

    #[inline]
    fn record_eviction(&self, _category: Category, _reason: EvictionReason) {}

    #[inline]
    fn record_fill(&self, _category: Category, _duration: Duration, _success: bool) {}
}

/// Metrics adapter using the `metrics` crate
///
/// # Example
/// ```ignore
/// use crawl_cache_core::MetricsCrateAdapter;
///
/// let metrics = MetricsCrateAdapter::new("crawl_cache");
/// // Emits: crawl_cache_hits_total{category, tier}, crawl_cache_misses_total{category}, ...
/// ```
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsCrateAdapter {
    prefix: String,
}

#[cfg(feature = "metrics")]
impl MetricsCrateAdapter {
    /// Create a new adapter with the given metric name prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn metric_name(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }
}

#[cfg(feature = "metrics")]
impl CacheMetrics for MetricsCrateAdapter {
    fn record_hit(&self, key: &CacheKey, tier: CacheTier) {
        metrics::counter!(
            self.metric_name("hits_total"),
            "category" => key.category.as_str(),
            "tier" => tier.as_str()
        )
        .increment(1);
    }

    fn record_miss(&self, key: &CacheKey) {
        metrics::counter!(self.metric_name("misses_total"), "category" => key.category.as_str())
            .increment(1);
    }

    fn record_stale_hit(&self, key: &CacheKey) {
        metrics::counter!(
            self.metric_name("stale_hits_total"),
            "category" => key.category.as_str()
        )
        .increment(1);
    }

    fn record_latency(&self, operation: CacheOperation, duration: Duration) {
        metrics::histogram!(
            self.metric_name("operation_duration_seconds"),
            "operation" => operation.as_str()
        )
        .record(duration.as_secs_f64());
    }

    fn record_eviction(&self, category: Category, reason: EvictionReason) {
        metrics::counter!(
            self.metric_name("evictions_total"),
            "category" => category.as_str(),
            "reason" => reason.as_str()
        )
        .increment(1);
    }

    fn record_fill(&self, category: Category, duration: Duration, success: bool) {
        let status = if success { "ok" } else { "error" };
        metrics::counter!(
            self.metric_name("fills_total"),
            "category" => category.as_str(),
            "status" => status
        )
        .increment(1);
        metrics::histogram!(
            self.metric_name("fill_duration_seconds"),
            "category" => category.as_str()
        )
        .record(duration.as_secs_f64());
    }
}
