//! Durable tier trait

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{CacheEntry, CacheKey, Category, DurableCategoryStats, Insertion, Lookup, Result};

/// System of record for cached entries
///
/// The durable tier never evicts on capacity. Entries leave it through
/// [`expire_older_than`](DurableStore::expire_older_than) or an explicit
/// [`purge`](DurableStore::purge). Expired entries stay readable and are
/// reported as [`Lookup::Expired`] so callers can serve them stale.
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    /// Look up an entry
    async fn get(&self, key: &CacheKey) -> Result<Lookup>;

    /// Insert or replace an entry
    ///
    /// On an existing key the payload is replaced, `expires_at` is
    /// recomputed from the writer's clock, `access_count` is incremented and
    /// `created_at` is kept. New entries start with `access_count == 1`.
    async fn upsert(&self, key: &CacheKey, payload: Bytes, ttl: Option<Duration>)
        -> Result<CacheEntry>;

    /// Write only if the key is absent, atomically
    async fn insert_if_absent(
        &self,
        key: &CacheKey,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<Insertion>;

    /// Record an access without rewriting the payload
    ///
    /// Returns `false` if the key does not exist.
    async fn touch(&self, key: &CacheKey) -> Result<bool>;

    /// Delete entries of `category` whose expiry is at or before `instant`
    ///
    /// Entries without a TTL are never removed. Returns the number deleted.
    async fn expire_older_than(&self, category: Category, instant: SystemTime) -> Result<u64>;

    /// Remove an entry regardless of expiry
    async fn purge(&self, key: &CacheKey) -> Result<bool>;

    /// Stored-entry statistics for one category
    async fn category_stats(&self, category: Category) -> Result<DurableCategoryStats>;
}

#[async_trait]
impl<S: DurableStore + ?Sized> DurableStore for Arc<S> {
    async fn get(&self, key: &CacheKey) -> Result<Lookup> {
        (**self).get(key).await
    }

    async fn upsert(
        &self,
        key: &CacheKey,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<CacheEntry> {
        (**self).upsert(key, payload, ttl).await
    }

    async fn insert_if_absent(
        &self,
        key: &CacheKey,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<Insertion> {
        (**self).insert_if_absent(key, payload, ttl).await
    }

    async fn touch(&self, key: &CacheKey) -> Result<bool> {
        (**self).touch(key).await
    }

    async fn expire_older_than(&self, category: Category, instant: SystemTime) -> Result<u64> {
        (**self).expire_older_than(category, instant).await
    }

    async fn purge(&self, key: &CacheKey) -> Result<bool> {
        (**self).purge(key).await
    }

    async fn category_stats(&self, category: Category) -> Result<DurableCategoryStats> {
        (**self).category_stats(category).await
    }
}
