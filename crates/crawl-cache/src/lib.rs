//! crawl-cache: multi-tier cache and dedup engine for a web crawler
//!
//! # Features
//!
//! - **Tiered lookups**: bounded per-category memory LRU over a durable store
//! - **Single-flight fills**: one fetch/render/OCR per key, shared by all waiters
//! - **Stale-while-revalidate** for expired durable entries
//! - **Degraded mode**: keeps serving when the durable store is down
//! - **Training-sample dedup** by canonical feature hash
//! - **Activity log** of every fetch with windowed summaries
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use crawl_cache::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let fill = fill_fn(|request: FillRequest| async move {
//!         Ok(FillOutput::new(format!("<html>{}</html>", request.url().unwrap_or_default())))
//!     });
//!     let system = CacheSystem::builder(MemoryDurableStore::new(), fill).build();
//!     system.start();
//!
//!     let page = system
//!         .router()
//!         .fetch(Category::Url, Identifier::url("https://example.com/"))
//!         .await?;
//!     println!("{:?}: {} bytes", page.source, page.payload.len());
//!
//!     system.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod dedup;
mod fill;
mod recorder;
mod router;
mod singleflight;
mod system;

#[cfg(test)]
mod tests;

// Re-export core
pub use crawl_cache_core::*;

// Re-export storage
pub use crawl_cache_storage::{CircuitBreaker, GuardedStore, MemoryDurableStore, MemoryTier};
#[cfg(feature = "redis")]
pub use crawl_cache_storage::{RedisConfig, RedisDurableStore, RedisLeaseProvider};

pub use config::{BreakerConfig, CacheConfig, RecorderConfig};
pub use dedup::{CorpusCounters, SampleDeduplicator, sample_id};
pub use fill::{Fill, FillOutput, FillRequest, FnFill, Identifier, fill_fn};
pub use recorder::{
    ActivityRecorder, ActivitySink, ActivitySummary, CategoryActivity, MemorySink, TracingSink,
};
pub use router::{CacheTierRouter, FetchSource, Fetched};
pub use singleflight::{Role, SingleFlight};
pub use system::{CacheSystem, CacheSystemBuilder, CategoryReport, StatsReport};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CacheConfig, CacheError, CacheSystem, CacheTierRouter, Category, CategoryPolicy,
        FetchSource, Fetched, Fill, FillOutput, FillRequest, Identifier, MemoryDurableStore,
        NewSample, Result, SampleInsert, fill_fn,
    };

    #[cfg(feature = "redis")]
    pub use crate::{RedisConfig, RedisDurableStore, RedisLeaseProvider};
}
