//! crawl-cache-storage: Tier implementations for crawl-cache
//!
//! - [`MemoryTier`]: bounded per-category LRU shadow of the durable tier
//! - [`MemoryDurableStore`]: process-local system of record
//! - [`GuardedStore`]: circuit breaker around any durable store
//! - [`RedisDurableStore`] / [`RedisLeaseProvider`] (feature `redis`)

pub mod durable;
#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use durable::{CircuitBreaker, GuardedStore, MemoryDurableStore};
#[cfg(feature = "memory")]
pub use memory::MemoryTier;
#[cfg(feature = "redis")]
pub use redis::{RedisConfig, RedisDurableStore, RedisLeaseProvider};
