//! Per-category bounded in-memory tier

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;

use crawl_cache_core::{
    CacheEntry, CacheKey, Category, CategoryPolicies, Lookup, MemoryTierStats,
};

use super::lru::LruMap;

struct Shard {
    lru: LruMap<CacheKey, CacheEntry>,
    bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl Shard {
    fn new(capacity: usize) -> Self {
        Self {
            lru: LruMap::new(capacity),
            bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    fn forget(&mut self, entry: &CacheEntry) {
        self.bytes = self.bytes.saturating_sub(entry.size_bytes);
    }
}

/// In-process LRU shadow of the durable tier
///
/// Each category has its own capacity and its own lock, so a burst of
/// screenshot traffic never blocks URL lookups. Entries are never
/// authoritative and may be lost at any time.
///
/// Cloning creates a new handle to the SAME underlying shards.
#[derive(Clone)]
pub struct MemoryTier {
    shards: Arc<[Mutex<Shard>; Category::COUNT]>,
}

impl MemoryTier {
    /// Create a tier sized from each category's `memory_capacity`
    pub fn new(policies: &CategoryPolicies) -> Self {
        Self {
            shards: Arc::new(std::array::from_fn(|i| {
                Mutex::new(Shard::new(policies.get(Category::ALL[i]).memory_capacity))
            })),
        }
    }

    /// Create a tier with the same capacity for every category
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shards: Arc::new(std::array::from_fn(|_| Mutex::new(Shard::new(capacity)))),
        }
    }

    fn shard(&self, category: Category) -> &Mutex<Shard> {
        &self.shards[category.index()]
    }

    /// Look up a live entry and record the access
    ///
    /// An entry past its expiry is removed and reported absent.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.lookup(key) {
            Lookup::Fresh(entry) => Some(entry),
            Lookup::Expired(_) | Lookup::Missing => None,
        }
    }

    /// Like [`get`](Self::get) but tells an expired entry from a missing one
    ///
    /// An `Expired` result has already been removed from the tier.
    pub fn lookup(&self, key: &CacheKey) -> Lookup {
        let now = SystemTime::now();
        let mut shard = self.shard(key.category).lock();

        let expired = match shard.lru.peek(key) {
            None => {
                shard.misses += 1;
                return Lookup::Missing;
            }
            Some(entry) => entry.is_expired_at(now),
        };

        if expired {
            shard.expirations += 1;
            shard.misses += 1;
            return match shard.lru.remove(key) {
                Some(entry) => {
                    shard.forget(&entry);
                    Lookup::Expired(entry)
                }
                None => Lookup::Missing,
            };
        }

        shard.hits += 1;
        match shard.lru.get_mut(key) {
            Some(entry) => {
                entry.record_access(now);
                Lookup::Fresh(entry.clone())
            }
            None => Lookup::Missing,
        }
    }

    /// Store an entry, replacing any entry with the same key
    ///
    /// Returns the key evicted to make room, if any.
    pub fn put(&self, entry: CacheEntry) -> Option<CacheKey> {
        let mut shard = self.shard(entry.key.category).lock();
        if shard.lru.capacity() == 0 {
            return None;
        }

        if let Some(size) = shard.lru.peek(&entry.key).map(|e| e.size_bytes) {
            shard.bytes = shard.bytes.saturating_sub(size);
        }

        let key = entry.key;
        shard.bytes += entry.size_bytes;
        let evicted = shard.lru.put(key, entry);

        evicted.map(|(evicted_key, evicted_entry)| {
            shard.forget(&evicted_entry);
            shard.evictions += 1;
            evicted_key
        })
    }

    /// Drop an entry; returns whether it was present
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut shard = self.shard(key.category).lock();
        match shard.lru.remove(key) {
            Some(entry) => {
                shard.forget(&entry);
                true
            }
            None => false,
        }
    }

    /// Drop every entry in every category
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            shard.lru.clear();
            shard.bytes = 0;
        }
    }

    /// Number of entries held for a category
    pub fn len(&self, category: Category) -> usize {
        self.shard(category).lock().lru.len()
    }

    /// Number of entries across all categories
    pub fn total_len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().lru.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Configured capacity for a category
    pub fn capacity(&self, category: Category) -> usize {
        self.shard(category).lock().lru.capacity()
    }

    /// Remove expired entries eagerly, returning how many were dropped
    ///
    /// Lazy expiry on `get` already guarantees correctness; this only
    /// reclaims memory held by entries nobody reads any more.
    pub fn sweep_expired(&self) -> usize {
        Category::ALL
            .iter()
            .map(|category| self.sweep_category(*category))
            .sum()
    }

    /// [`sweep_expired`](Self::sweep_expired) for a single category
    pub fn sweep_category(&self, category: Category) -> usize {
        let now = SystemTime::now();
        let mut shard = self.shard(category).lock();
        let expired = shard.lru.drain_where(|entry| entry.is_expired_at(now));
        for (_, entry) in &expired {
            shard.forget(entry);
        }
        shard.expirations += expired.len() as u64;
        expired.len()
    }

    /// Counters for one category
    pub fn stats(&self, category: Category) -> MemoryTierStats {
        let shard = self.shard(category).lock();
        MemoryTierStats {
            entries: shard.lru.len(),
            bytes: shard.bytes,
            hits: shard.hits,
            misses: shard.misses,
            evictions: shard.evictions,
            expirations: shard.expirations,
        }
    }

    /// Entries currently held for a category, oldest creation first
    pub fn entries(&self, category: Category) -> Vec<CacheEntry> {
        let shard = self.shard(category).lock();
        let mut entries: Vec<CacheEntry> = shard.lru.values().cloned().collect();
        entries.sort_by_key(|entry| entry.created_at);
        entries
    }
}

impl std::fmt::Debug for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sizes: Vec<(Category, usize)> =
            Category::ALL.iter().map(|c| (*c, self.len(*c))).collect();
        f.debug_struct("MemoryTier").field("entries", &sizes).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crawl_cache_core::{CategoryPolicy, Fingerprint};
    use std::time::Duration;

    fn key(category: Category, n: u8) -> CacheKey {
        CacheKey::new(category, Fingerprint::from_bytes([n; 32]))
    }

    fn entry(key: CacheKey, payload: &'static [u8]) -> CacheEntry {
        CacheEntry::new(key, Bytes::from_static(payload), Some(Duration::from_secs(60)))
    }

    #[test]
    fn test_get_records_access() {
        let tier = MemoryTier::with_capacity(4);
        let k = key(Category::Url, 1);
        tier.put(entry(k, b"page"));

        let first = tier.get(&k).unwrap();
        let second = tier.get(&k).unwrap();
        assert_eq!(first.access_count, 1);
        assert_eq!(second.access_count, 2);
        assert_eq!(second.payload, Bytes::from_static(b"page"));

        let stats = tier.stats(Category::Url);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.bytes, 4);
    }

    #[test]
    fn test_expired_entry_is_removed_on_read() {
        let tier = MemoryTier::with_capacity(4);
        let k = key(Category::Screenshot, 1);
        let past = SystemTime::now() - Duration::from_secs(10);
        tier.put(CacheEntry::with_times(
            k,
            Bytes::from_static(b"png"),
            past,
            Some(past + Duration::from_secs(1)),
        ));

        assert!(tier.get(&k).is_none());
        assert_eq!(tier.len(Category::Screenshot), 0);

        let stats = tier.stats(Category::Screenshot);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.bytes, 0);
    }

    #[test]
    fn test_lookup_reports_expiry_and_sweep_is_per_category() {
        let tier = MemoryTier::with_capacity(4);
        let past = SystemTime::now() - Duration::from_secs(10);
        let stale = |k| {
            CacheEntry::with_times(k, Bytes::from_static(b"old"), past, Some(past + Duration::from_secs(1)))
        };

        let ocr = key(Category::Ocr, 1);
        tier.put(stale(ocr));
        assert!(matches!(tier.lookup(&ocr), Lookup::Expired(entry) if entry.key == ocr));
        assert_eq!(tier.lookup(&ocr), Lookup::Missing);

        tier.put(stale(key(Category::Url, 2)));
        tier.put(stale(key(Category::Asset, 3)));
        assert_eq!(tier.sweep_category(Category::Url), 1);
        assert_eq!(tier.len(Category::Asset), 1);
        assert_eq!(tier.sweep_expired(), 1);
        assert_eq!(tier.stats(Category::Asset).expirations, 1);
    }

    #[test]
    fn test_lru_eviction_per_category() {
        let policies =
            CategoryPolicies::default().set(Category::Screenshot, CategoryPolicy::new().capacity(2));
        let tier = MemoryTier::new(&policies);

        let (a, b, c) = (
            key(Category::Screenshot, 1),
            key(Category::Screenshot, 2),
            key(Category::Screenshot, 3),
        );
        assert!(tier.put(entry(a, b"a")).is_none());
        assert!(tier.put(entry(b, b"b")).is_none());
        assert!(tier.get(&a).is_some());

        assert_eq!(tier.put(entry(c, b"c")), Some(b));
        assert!(tier.get(&a).is_some());
        assert!(tier.get(&c).is_some());
        assert!(tier.get(&b).is_none());
        assert_eq!(tier.stats(Category::Screenshot).evictions, 1);

        // Other categories keep their own capacity.
        for n in 0..10 {
            tier.put(entry(key(Category::Url, n), b"u"));
        }
        assert_eq!(tier.len(Category::Url), 10);
        assert_eq!(tier.len(Category::Screenshot), 2);
    }

    #[test]
    fn test_zero_capacity_disables_category() {
        let tier = MemoryTier::with_capacity(0);
        let k = key(Category::Asset, 1);
        assert!(tier.put(entry(k, b"js")).is_none());
        assert!(tier.get(&k).is_none());
    }

    #[test]
    fn test_replace_adjusts_bytes() {
        let tier = MemoryTier::with_capacity(4);
        let k = key(Category::Ocr, 1);
        tier.put(entry(k, b"short"));
        tier.put(entry(k, b"much longer text"));
        assert_eq!(tier.len(Category::Ocr), 1);
        assert_eq!(tier.stats(Category::Ocr).bytes, 16);
    }

    #[test]
    fn test_invalidate_and_sweep() {
        let tier = MemoryTier::with_capacity(8);
        let live = key(Category::Url, 1);
        let dead = key(Category::Url, 2);
        tier.put(entry(live, b"live"));
        let past = SystemTime::now() - Duration::from_secs(5);
        tier.put(CacheEntry::with_times(dead, Bytes::new(), past, Some(past)));

        assert_eq!(tier.sweep_expired(), 1);
        assert_eq!(tier.total_len(), 1);

        assert!(tier.invalidate(&live));
        assert!(!tier.invalidate(&live));
        assert!(tier.is_empty());
    }
}
