use crate::{CacheKey, CacheMetrics, CacheOperation, CacheTier, Category, EvictionReason};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Metrics adapter that reports crawl cache activity as `tracing` events
///
/// Routine traffic (hits, latencies, evictions) goes out at `trace`/`debug`.
/// Fill trouble is louder: every failed fill is a `warn` carrying the
/// category's current failure streak, the first success after a streak is an
/// `info`, and fills slower than the configured threshold are a `warn`.
#[derive(Debug, Default)]
pub struct TracingMetrics {
    service_name: Option<String>,
    slow_fill: Option<Duration>,
    fill_failures: [AtomicU32; Category::COUNT],
}

impl TracingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag every event with a service name
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Warn about fills taking longer than `threshold`
    pub fn with_slow_fill_threshold(mut self, threshold: Duration) -> Self {
        self.slow_fill = Some(threshold);
        self
    }

    /// Consecutive failed fills for a category
    pub fn failure_streak(&self, category: Category) -> u32 {
        self.fill_failures[category.index()].load(Ordering::Relaxed)
    }

    fn is_slow(&self, duration: Duration) -> bool {
        self.slow_fill.is_some_and(|threshold| duration > threshold)
    }
}

impl CacheMetrics for TracingMetrics {
    fn record_hit(&self, key: &CacheKey, tier: CacheTier) {
        trace!(
            target: "crawl_cache",
            category = key.category.as_str(),
            tier = tier.as_str(),
            key = %key,
            service = ?self.service_name,
            "served from cache"
        );
    }

    fn record_miss(&self, key: &CacheKey) {
        debug!(
            target: "crawl_cache",
            category = key.category.as_str(),
            key = %key,
            service = ?self.service_name,
            "miss, filling"
        );
    }

    fn record_stale_hit(&self, key: &CacheKey) {
        debug!(
            target: "crawl_cache",
            category = key.category.as_str(),
            key = %key,
            service = ?self.service_name,
            "serving stale entry while refreshing"
        );
    }

    fn record_latency(&self, operation: CacheOperation, duration: Duration) {
        trace!(
            target: "crawl_cache",
            operation = operation.as_str(),
            duration_us = duration.as_micros() as u64,
            service = ?self.service_name,
            "timing"
        );
    }

    fn record_eviction(&self, category: Category, reason: EvictionReason) {
        match reason {
            EvictionReason::Invalidated => debug!(
                target: "crawl_cache",
                category = category.as_str(),
                service = ?self.service_name,
                "entry invalidated"
            ),
            _ => trace!(
                target: "crawl_cache",
                category = category.as_str(),
                reason = reason.as_str(),
                service = ?self.service_name,
                "memory entry dropped"
            ),
        }
    }

    fn record_fill(&self, category: Category, duration: Duration, success: bool) {
        let streak = &self.fill_failures[category.index()];
        let duration_ms = duration.as_millis() as u64;

        if !success {
            let failures = streak.fetch_add(1, Ordering::Relaxed).saturating_add(1);
            warn!(
                target: "crawl_cache",
                category = category.as_str(),
                duration_ms,
                failures,
                service = ?self.service_name,
                "fill failed"
            );
            return;
        }

        let previous = streak.swap(0, Ordering::Relaxed);
        if previous > 0 {
            info!(
                target: "crawl_cache",
                category = category.as_str(),
                failed_before = previous,
                service = ?self.service_name,
                "fills recovered"
            );
        }
        if self.is_slow(duration) {
            warn!(
                target: "crawl_cache",
                category = category.as_str(),
                duration_ms,
                service = ?self.service_name,
                "slow fill"
            );
        } else {
            debug!(
                target: "crawl_cache",
                category = category.as_str(),
                duration_ms,
                service = ?self.service_name,
                "filled"
            );
        }
    }
}
