//! Core traits for cache tiers

mod durable;
mod lease;
mod metrics;

pub use durable::DurableStore;
pub use lease::{Lease, LeaseProvider, LocalLeases};
pub use metrics::{CacheMetrics, CacheOperation, CacheTier, EvictionReason, NoopMetrics};

#[cfg(feature = "metrics")]
pub use metrics::MetricsCrateAdapter;

#[cfg(feature = "tracing")]
mod tracing_metrics;

#[cfg(feature = "tracing")]
pub use tracing_metrics::TracingMetrics;
