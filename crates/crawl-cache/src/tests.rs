//! Cross-module behaviour of the cache system

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime};

use crate::prelude::*;
use crate::{
    CacheMetrics, CacheOperation, CacheTier, DurableCategoryStats, DurableStore, EvictionReason,
    Insertion, Lease, LeaseProvider, Lookup, MemorySink, Outcome,
};
use crawl_cache_core::CacheKey;

/// Fill returning `<url>#<n>` for the n-th call, optionally slow
fn counting_fill(calls: Arc<AtomicUsize>, delay: Duration) -> impl Fill {
    fill_fn(move |request: FillRequest| {
        let calls = calls.clone();
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(FillOutput::new(format!("{}#{n}", request.url().unwrap_or("bytes"))))
        }
    })
}

/// Durable store that can be switched off
#[derive(Clone, Default)]
struct Flaky {
    inner: MemoryDurableStore,
    down: Arc<AtomicBool>,
}

impl Flaky {
    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::StoreUnavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DurableStore for Flaky {
    async fn get(&self, key: &CacheKey) -> Result<Lookup> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn upsert(&self, key: &CacheKey, payload: Bytes, ttl: Option<Duration>) -> Result<crate::CacheEntry> {
        self.check()?;
        self.inner.upsert(key, payload, ttl).await
    }

    async fn insert_if_absent(&self, key: &CacheKey, payload: Bytes, ttl: Option<Duration>) -> Result<Insertion> {
        self.check()?;
        self.inner.insert_if_absent(key, payload, ttl).await
    }

    async fn touch(&self, key: &CacheKey) -> Result<bool> {
        self.check()?;
        self.inner.touch(key).await
    }

    async fn expire_older_than(&self, category: Category, instant: SystemTime) -> Result<u64> {
        self.check()?;
        self.inner.expire_older_than(category, instant).await
    }

    async fn purge(&self, key: &CacheKey) -> Result<bool> {
        self.check()?;
        self.inner.purge(key).await
    }

    async fn category_stats(&self, category: Category) -> Result<DurableCategoryStats> {
        self.check()?;
        self.inner.category_stats(category).await
    }
}

/// Lease provider whose lease is always held by another process
struct HeldByPeer;

#[async_trait]
impl LeaseProvider for HeldByPeer {
    async fn acquire(&self, _key: &CacheKey, _ttl: Duration) -> Result<Option<Lease>> {
        Ok(None)
    }

    async fn release(&self, _lease: Lease) -> Result<bool> {
        Ok(false)
    }
}

/// Metrics collector that keeps what it was told
#[derive(Default)]
struct RecordingMetrics {
    latencies: parking_lot::Mutex<Vec<CacheOperation>>,
    evictions: parking_lot::Mutex<Vec<(Category, EvictionReason)>>,
}

impl CacheMetrics for RecordingMetrics {
    fn record_hit(&self, _key: &CacheKey, _tier: CacheTier) {}

    fn record_miss(&self, _key: &CacheKey) {}

    fn record_stale_hit(&self, _key: &CacheKey) {}

    fn record_latency(&self, operation: CacheOperation, _duration: Duration) {
        self.latencies.lock().push(operation);
    }

    fn record_eviction(&self, category: Category, reason: EvictionReason) {
        self.evictions.lock().push((category, reason));
    }

    fn record_fill(&self, _category: Category, _duration: Duration, _success: bool) {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fetches_fill_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let sink = MemorySink::new();
    let system = CacheSystem::builder(
        MemoryDurableStore::new(),
        counting_fill(calls.clone(), Duration::from_millis(100)),
    )
    .activity_sink(sink.clone())
    .build();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let router = system.router().clone();
        handles.push(tokio::spawn(async move {
            router
                .fetch(Category::Url, Identifier::url("https://example.com/popular"))
                .await
        }));
    }

    let mut payloads = Vec::new();
    for handle in handles {
        payloads.push(handle.await.unwrap().unwrap().payload);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(payloads.iter().all(|p| p == &payloads[0]));

    // One record per call, followers included.
    system.shutdown().await.unwrap();
    assert_eq!(sink.len(), 50);
    assert!(sink.records().iter().all(|r| r.outcome != Outcome::Error));
}

#[tokio::test]
async fn test_upsert_is_idempotent() {
    let store = MemoryDurableStore::new();
    let key = CacheKey::new(
        Category::Asset,
        crate::fingerprint::content_fingerprint(b"logo.svg"),
    );

    store.upsert(&key, Bytes::from_static(b"svg"), None).await.unwrap();
    let entry = store.upsert(&key, Bytes::from_static(b"svg"), None).await.unwrap();

    assert_eq!(entry.access_count, 2);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_training_samples_dedup() {
    let system = CacheSystem::builder(
        MemoryDurableStore::new(),
        counting_fill(Arc::new(AtomicUsize::new(0)), Duration::ZERO),
    )
    .build();
    let dedup = system.deduplicator();

    let features = json!({"title_len": 42, "links": [1, 2, 3]});
    let first = dedup
        .insert(NewSample::new(features.clone(), 0.9, "https://a.example"))
        .await
        .unwrap();
    let second = dedup
        .insert(NewSample::new(features, 0.9, "https://b.example"))
        .await
        .unwrap();

    assert!(matches!(first, SampleInsert::Inserted(_)));
    assert!(second.duplicate());
    assert_eq!(
        system.stats(None).await.category(Category::TrainingSample).stats.entries,
        1
    );
}

#[tokio::test]
async fn test_ttl_expiry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = MemoryDurableStore::new();
    let config = CacheConfig::default().policy(
        Category::Ocr,
        CategoryPolicy::new().ttl(Duration::from_millis(50)).capacity(16),
    );
    let router = CacheTierRouter::new(store.clone(), counting_fill(calls.clone(), Duration::ZERO), config);
    let identifier = Identifier::url("https://example.com/receipt.png");
    let key = router.key_for(Category::Ocr, &identifier).unwrap();

    router.fetch(Category::Ocr, identifier.clone()).await.unwrap();
    let hit = router.fetch(Category::Ocr, identifier.clone()).await.unwrap();
    assert_eq!(hit.source, FetchSource::Memory);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(router.memory().get(&key).is_none());
    assert!(store.get(&key).await.unwrap().is_expired());

    let refilled = router.fetch(Category::Ocr, identifier).await.unwrap();
    assert_eq!(refilled.source, FetchSource::FreshFill);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stale_while_revalidate() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = CacheConfig::default().policy(
        Category::Url,
        CategoryPolicy::new().ttl(Duration::from_millis(300)).capacity(16).swr(true),
    );
    let router = CacheTierRouter::new(
        MemoryDurableStore::new(),
        counting_fill(calls.clone(), Duration::from_millis(100)),
        config,
    );
    let identifier = Identifier::url("https://example.com/feed");

    let first = router.fetch(Category::Url, identifier.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    // Served stale without waiting for the refresh.
    let start = Instant::now();
    let stale = router.fetch(Category::Url, identifier.clone()).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(80));
    assert!(stale.is_stale());
    assert_eq!(stale.payload, first.payload);

    // A second stale read does not start another refresh.
    let again = router.fetch(Category::Url, identifier.clone()).await.unwrap();
    assert_eq!(again.source, FetchSource::StaleDurable);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let fresh = router.fetch(Category::Url, identifier).await.unwrap();
    assert_eq!(fresh.source, FetchSource::Memory);
    assert_eq!(fresh.payload, Bytes::from("https://example.com/feed#2"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_memory_lru_eviction() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = CacheConfig::default().policy(
        Category::Asset,
        CategoryPolicy::new().ttl_hours(1).capacity(2),
    );
    let router = CacheTierRouter::new(
        MemoryDurableStore::new(),
        counting_fill(calls.clone(), Duration::ZERO),
        config,
    );

    let assets: [&'static [u8]; 3] = [b"a.css", b"b.js", b"c.woff"];
    for asset in assets {
        router
            .fetch(Category::Asset, Identifier::content(asset))
            .await
            .unwrap();
    }
    assert_eq!(router.memory().len(Category::Asset), 2);

    // Evicted from memory but still durable.
    let first = router
        .fetch(Category::Asset, Identifier::content(&b"a.css"[..]))
        .await
        .unwrap();
    assert_eq!(first.source, FetchSource::Durable);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_url_variants_share_one_entry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = MemoryDurableStore::new();
    let router = CacheTierRouter::new(
        store.clone(),
        counting_fill(calls.clone(), Duration::ZERO),
        CacheConfig::default(),
    );

    let a = router
        .fetch(Category::Url, Identifier::url("https://Example.com/path/?b=2&a=1#frag"))
        .await
        .unwrap();
    let b = router
        .fetch(Category::Url, Identifier::url("https://example.com/path?a=1&b=2"))
        .await
        .unwrap();

    assert_eq!(a.key, b.key);
    assert_eq!(b.source, FetchSource::Memory);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_url_variants_fill_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = MemoryDurableStore::new();
    let router = CacheTierRouter::new(
        store.clone(),
        counting_fill(calls.clone(), Duration::from_millis(100)),
        CacheConfig::default(),
    );

    let spellings = [
        "https://Example.com:443/path/?b=2&a=1#frag",
        "https://example.com/path?a=1&b=2",
    ];
    let handles: Vec<_> = spellings
        .into_iter()
        .map(|url| {
            let router = router.clone();
            tokio::spawn(async move { router.fetch(Category::Url, Identifier::url(url)).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(results[0].key, results[1].key);
    assert_eq!(results[0].payload, results[1].payload);
    assert_eq!(store.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_caller_does_not_fail_waiters() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = MemoryDurableStore::new();
    let router = CacheTierRouter::new(
        store.clone(),
        counting_fill(calls.clone(), Duration::from_millis(200)),
        CacheConfig::default(),
    );
    let identifier = Identifier::url("https://example.com/slow");

    let impatient = {
        let router = router.clone();
        let identifier = identifier.clone();
        tokio::spawn(async move {
            tokio::time::timeout(
                Duration::from_millis(50),
                router.fetch(Category::Url, identifier),
            )
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let waiter = router.fetch(Category::Url, identifier.clone()).await.unwrap();
    assert!(impatient.await.unwrap().is_err());
    assert_eq!(waiter.source, FetchSource::FreshFill);
    assert_eq!(waiter.payload, Bytes::from("https://example.com/slow#1"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The abandoned caller's fill still landed in both tiers.
    assert_eq!(store.len(), 1);
    let cached = router.fetch(Category::Url, identifier).await.unwrap();
    assert_eq!(cached.source, FetchSource::Memory);
}

#[tokio::test]
async fn test_peer_lease_holder_fills_for_us() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = MemoryDurableStore::new();
    let config = CacheConfig::default()
        .fill_timeout(Duration::from_secs(2))
        .lease(Duration::from_secs(5), Duration::from_millis(20));
    let system = CacheSystem::builder(store.clone(), counting_fill(calls.clone(), Duration::ZERO))
        .config(config)
        .lease_provider(HeldByPeer)
        .build();
    let router = system.router();
    let identifier = Identifier::url("https://example.com/shared");
    let key = router.key_for(Category::Url, &identifier).unwrap();

    // Another process finishes its fill shortly after we start polling.
    let peer = {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            store
                .upsert(&key, Bytes::from_static(b"peer"), Some(Duration::from_secs(60)))
                .await
        })
    };

    let fetched = router.fetch(Category::Url, identifier).await.unwrap();
    peer.await.unwrap().unwrap();
    assert_eq!(fetched.source, FetchSource::Durable);
    assert_eq!(fetched.payload, Bytes::from_static(b"peer"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(router.memory().len(Category::Url), 1);
}

#[tokio::test]
async fn test_peer_lease_holder_never_finishes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = CacheConfig::default()
        .fill_timeout(Duration::from_millis(200))
        .lease(Duration::from_secs(5), Duration::from_millis(20));
    let system = CacheSystem::builder(
        MemoryDurableStore::new(),
        counting_fill(calls.clone(), Duration::ZERO),
    )
    .config(config)
    .lease_provider(HeldByPeer)
    .build();

    let result = system
        .router()
        .fetch(Category::Url, Identifier::url("https://example.com/stuck"))
        .await;
    assert_eq!(result, Err(CacheError::FillTimedOut(Duration::from_millis(200))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_expiry_fill_and_insert_metrics() {
    let config = CacheConfig::default()
        .policy(
            Category::Ocr,
            CategoryPolicy::new().ttl(Duration::from_millis(50)).capacity(16).swr(false),
        )
        .policy(
            Category::Url,
            CategoryPolicy::new().ttl(Duration::from_millis(50)).capacity(16),
        );
    let system = CacheSystem::builder(
        MemoryDurableStore::new(),
        counting_fill(Arc::new(AtomicUsize::new(0)), Duration::ZERO),
    )
    .config(config)
    .metrics(RecordingMetrics::default())
    .build();
    let router = system.router();
    let scan = Identifier::url("https://example.com/scan.png");

    router.fetch(Category::Ocr, scan.clone()).await.unwrap();
    router
        .fetch(Category::Url, Identifier::url("https://example.com/idle"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Read after expiry removes the OCR entry lazily; the URL one is swept.
    router.fetch(Category::Ocr, scan).await.unwrap();
    assert_eq!(router.sweep_memory(), 1);

    system
        .deduplicator()
        .insert(NewSample::new(json!({"words": 12}), 0.8, "https://example.com"))
        .await
        .unwrap();

    let metrics = router.metrics();
    let evictions = metrics.evictions.lock().clone();
    assert!(evictions.contains(&(Category::Ocr, EvictionReason::Expired)));
    assert!(evictions.contains(&(Category::Url, EvictionReason::Expired)));

    let latencies = metrics.latencies.lock().clone();
    assert_eq!(
        latencies.iter().filter(|op| **op == CacheOperation::Fill).count(),
        3
    );
    assert!(latencies.contains(&CacheOperation::SampleInsert));
}

#[tokio::test]
async fn test_stale_screenshot_then_refreshed_hit() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = CacheConfig::default().policy(
        Category::Screenshot,
        CategoryPolicy::new().ttl(Duration::from_millis(200)).capacity(8).swr(true),
    );
    let router = CacheTierRouter::new(
        MemoryDurableStore::new(),
        counting_fill(calls.clone(), Duration::ZERO),
        config,
    );
    let identifier = Identifier::url("https://example.com/landing");

    router.fetch(Category::Screenshot, identifier.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stale = router.fetch(Category::Screenshot, identifier.clone()).await.unwrap();
    assert_eq!(stale.source, FetchSource::StaleDurable);
    assert_eq!(stale.payload, Bytes::from("https://example.com/landing#1"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let refreshed = router.fetch(Category::Screenshot, identifier).await.unwrap();
    assert_eq!(refreshed.source, FetchSource::Memory);
    assert_eq!(refreshed.payload, Bytes::from("https://example.com/landing#2"));
}

#[tokio::test]
async fn test_durable_outage_and_recovery() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = Flaky::default();
    store.down.store(true, Ordering::SeqCst);

    let config = CacheConfig::default().breaker(1, Duration::from_millis(100));
    let system = CacheSystem::builder(store.clone(), counting_fill(calls.clone(), Duration::ZERO))
        .config(config)
        .build();
    let router = system.router();

    // Fresh fill served, kept in memory, not persisted.
    let outage = router
        .fetch(Category::Url, Identifier::url("https://example.com/during"))
        .await
        .unwrap();
    assert_eq!(outage.source, FetchSource::FreshFill);
    assert!(router.is_degraded());
    assert!(store.inner.is_empty());
    assert_eq!(router.memory().len(Category::Url), 1);

    let report = system.stats(None).await;
    assert!(report.degraded);
    assert_eq!(report.category(Category::Url).stats.entries, 1);

    // Store comes back. The outage entry still serves from memory.
    store.down.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;
    let during = Identifier::url("https://example.com/during");

    let cached = router.fetch(Category::Url, during.clone()).await.unwrap();
    assert_eq!(cached.source, FetchSource::Memory);
    assert_eq!(cached.payload, outage.payload);

    // Once memory drops it, the same key probes, refills and persists.
    router.memory().clear();
    let recovered = router.fetch(Category::Url, during.clone()).await.unwrap();
    assert_eq!(recovered.source, FetchSource::FreshFill);
    assert_eq!(recovered.payload, Bytes::from("https://example.com/during#2"));
    assert!(!router.is_degraded());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let stored = store.inner.get(&recovered.key).await.unwrap();
    assert_eq!(stored.entry().map(|e| e.payload), Some(recovered.payload.clone()));

    router.memory().clear();
    let persisted = router.fetch(Category::Url, during).await.unwrap();
    assert_eq!(persisted.source, FetchSource::Durable);
    assert_eq!(persisted.payload, recovered.payload);
}

#[tokio::test]
async fn test_dedup_fails_while_store_down() {
    let store = Flaky::default();
    store.down.store(true, Ordering::SeqCst);
    let system = CacheSystem::builder(
        store,
        counting_fill(Arc::new(AtomicUsize::new(0)), Duration::ZERO),
    )
    .build();

    let result = system
        .deduplicator()
        .insert(NewSample::new(json!({"x": 1}), 0.5, "https://example.com"))
        .await;
    assert!(matches!(result, Err(CacheError::StoreUnavailable(_))));
}

#[tokio::test]
async fn test_failed_fill_is_recorded_once() {
    let sink = MemorySink::new();
    let fill = fill_fn(|_request: FillRequest| async {
        Err::<FillOutput, _>(CacheError::FillFailed("HTTP 502".into()))
    });
    let system = CacheSystem::builder(MemoryDurableStore::new(), fill)
        .activity_sink(sink.clone())
        .build();

    let result = system
        .router()
        .fetch(Category::Url, Identifier::url("https://down.example"))
        .await;
    assert_eq!(result, Err(CacheError::FillFailed("HTTP 502".into())));

    system.recorder().flush().await.unwrap();
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::Error);
    assert_eq!(records[0].host.as_deref(), Some("down.example"));
    assert_eq!(system.stats(None).await.category(Category::Url).stats.errors, 1);
}
