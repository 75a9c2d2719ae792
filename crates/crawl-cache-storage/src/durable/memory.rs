//! Process-local durable store using DashMap

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crawl_cache_core::{
    CacheEntry, CacheKey, Category, DurableCategoryStats, DurableStore, Insertion, Lookup, Result,
    expiry_from,
};

/// System of record kept in process memory
///
/// Suitable for single-process crawlers and tests. Never evicts on
/// capacity; entries leave only through expiry maintenance or purge.
/// Cloning creates a new handle to the SAME underlying store.
#[derive(Clone, Default)]
pub struct MemoryDurableStore {
    data: Arc<DashMap<CacheKey, CacheEntry>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries across categories
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get(&self, key: &CacheKey) -> Result<Lookup> {
        Ok(match self.data.get(key) {
            Some(entry) => Lookup::classify(entry.clone(), SystemTime::now()),
            None => Lookup::Missing,
        })
    }

    async fn upsert(
        &self,
        key: &CacheKey,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<CacheEntry> {
        let now = SystemTime::now();
        match self.data.entry(*key) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.size_bytes = payload.len();
                entry.payload = payload;
                entry.expires_at = expiry_from(now, ttl);
                entry.is_stale = false;
                entry.record_access(now);
                Ok(entry.clone())
            }
            Entry::Vacant(vacant) => {
                let mut entry = CacheEntry::with_times(*key, payload, now, expiry_from(now, ttl));
                entry.access_count = 1;
                vacant.insert(entry.clone());
                Ok(entry)
            }
        }
    }

    async fn insert_if_absent(
        &self,
        key: &CacheKey,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<Insertion> {
        let now = SystemTime::now();
        let fresh = || {
            let mut entry = CacheEntry::with_times(*key, payload.clone(), now, expiry_from(now, ttl));
            entry.access_count = 1;
            entry
        };

        match self.data.entry(*key) {
            // An expired row no longer counts as present.
            Entry::Occupied(mut occupied) if occupied.get().is_expired_at(now) => {
                let entry = fresh();
                occupied.insert(entry.clone());
                Ok(Insertion::Inserted(entry))
            }
            Entry::Occupied(occupied) => Ok(Insertion::Existing(occupied.get().clone())),
            Entry::Vacant(vacant) => {
                let entry = fresh();
                vacant.insert(entry.clone());
                Ok(Insertion::Inserted(entry))
            }
        }
    }

    async fn touch(&self, key: &CacheKey) -> Result<bool> {
        match self.data.get_mut(key) {
            Some(mut entry) => {
                entry.record_access(SystemTime::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expire_older_than(&self, category: Category, instant: SystemTime) -> Result<u64> {
        let mut removed = 0u64;
        self.data.retain(|key, entry| {
            let doomed = key.category == category
                && matches!(entry.expires_at, Some(expires_at) if expires_at <= instant);
            if doomed {
                removed += 1;
            }
            !doomed
        });
        if removed > 0 {
            tracing::debug!(category = %category, removed, "expired durable entries");
        }
        Ok(removed)
    }

    async fn purge(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.data.remove(key).is_some())
    }

    async fn category_stats(&self, category: Category) -> Result<DurableCategoryStats> {
        let mut stats = DurableCategoryStats::default();
        for item in self.data.iter() {
            if item.key().category == category {
                stats.observe(item.value());
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawl_cache_core::Fingerprint;

    fn key(category: Category, n: u8) -> CacheKey {
        CacheKey::new(category, Fingerprint::from_bytes([n; 32]))
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryDurableStore::new();
        let k = key(Category::Url, 1);
        let ttl = Some(Duration::from_secs(60));

        let first = store.upsert(&k, Bytes::from_static(b"v"), ttl).await.unwrap();
        let second = store.upsert(&k, Bytes::from_static(b"v"), ttl).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(first.access_count, 1);
        assert_eq!(second.access_count, 2);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.expires_at >= first.expires_at);
    }

    #[tokio::test]
    async fn test_get_distinguishes_expired_from_missing() {
        let store = MemoryDurableStore::new();
        let k = key(Category::Screenshot, 1);
        assert_eq!(store.get(&k).await.unwrap(), Lookup::Missing);

        store
            .upsert(&k, Bytes::from_static(b"png"), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get(&k).await.unwrap().is_fresh());

        tokio::time::sleep(Duration::from_millis(40)).await;
        let lookup = store.get(&k).await.unwrap();
        assert!(lookup.found());
        assert!(lookup.is_expired());
        assert_eq!(lookup.entry().unwrap().payload, Bytes::from_static(b"png"));
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let store = MemoryDurableStore::new();
        let k = key(Category::TrainingSample, 1);

        let first = store.insert_if_absent(&k, Bytes::from_static(b"a"), None).await.unwrap();
        let second = store.insert_if_absent(&k, Bytes::from_static(b"b"), None).await.unwrap();

        assert!(first.is_inserted());
        assert!(!second.is_inserted());
        assert_eq!(second.into_entry().payload, Bytes::from_static(b"a"));
    }

    #[tokio::test]
    async fn test_touch() {
        let store = MemoryDurableStore::new();
        let k = key(Category::Ocr, 1);
        assert!(!store.touch(&k).await.unwrap());

        store.upsert(&k, Bytes::from_static(b"text"), None).await.unwrap();
        assert!(store.touch(&k).await.unwrap());
        let entry = store.get(&k).await.unwrap().entry().unwrap();
        assert_eq!(entry.access_count, 2);
    }

    #[tokio::test]
    async fn test_expire_older_than_keeps_untimed_and_other_categories() {
        let store = MemoryDurableStore::new();
        let short = Some(Duration::from_secs(1));
        store.upsert(&key(Category::Url, 1), Bytes::new(), short).await.unwrap();
        store.upsert(&key(Category::Url, 2), Bytes::new(), None).await.unwrap();
        store.upsert(&key(Category::Asset, 3), Bytes::new(), short).await.unwrap();

        let later = SystemTime::now() + Duration::from_secs(5);
        assert_eq!(store.expire_older_than(Category::Url, later).await.unwrap(), 1);
        assert!(store.get(&key(Category::Url, 2)).await.unwrap().found());
        assert!(store.get(&key(Category::Asset, 3)).await.unwrap().found());
    }

    #[tokio::test]
    async fn test_purge_and_stats() {
        let store = MemoryDurableStore::new();
        store
            .upsert(&key(Category::Asset, 1), Bytes::from_static(b"1234"), None)
            .await
            .unwrap();
        store
            .upsert(&key(Category::Asset, 2), Bytes::from_static(b"12"), None)
            .await
            .unwrap();

        let stats = store.category_stats(Category::Asset).await.unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.avg_payload_bytes(), 3);

        assert!(store.purge(&key(Category::Asset, 1)).await.unwrap());
        assert!(!store.purge(&key(Category::Asset, 1)).await.unwrap());
        assert_eq!(store.category_stats(Category::Asset).await.unwrap().entries, 1);
    }
}
