//! Tier routing: memory, then durable, then the fill

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crawl_cache_core::{
    CacheEntry, CacheError, CacheKey, CacheMetrics, CacheOperation, CacheTier, Category,
    ContentFingerprinter, DurableStore, EvictionReason, FingerprintInput, LeaseProvider,
    LocalLeases, Lookup, NetworkActivityRecord, NoopMetrics, OriginCache, Outcome, Result,
};
use crawl_cache_storage::{CircuitBreaker, GuardedStore, MemoryTier};

use crate::config::CacheConfig;
use crate::fill::{Fill, FillRequest, Identifier};
use crate::recorder::{ActivityRecorder, TracingSink};
use crate::singleflight::SingleFlight;

/// Where a fetch was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// Live entry in the memory tier
    Memory,
    /// Fresh entry in the durable tier, now promoted to memory
    Durable,
    /// Expired durable entry served while a refresh runs
    StaleDurable,
    /// Produced by the fill (as leader or follower)
    FreshFill,
}

impl FetchSource {
    pub fn outcome(&self) -> Outcome {
        match self {
            FetchSource::Memory | FetchSource::Durable => Outcome::Hit,
            FetchSource::StaleDurable => Outcome::StaleHit,
            FetchSource::FreshFill => Outcome::Miss,
        }
    }

    pub fn tier(&self) -> CacheTier {
        match self {
            FetchSource::Memory => CacheTier::Memory,
            FetchSource::Durable | FetchSource::StaleDurable => CacheTier::Durable,
            FetchSource::FreshFill => CacheTier::Fill,
        }
    }
}

/// Payload returned by [`CacheTierRouter::fetch`]
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub key: CacheKey,
    pub payload: Bytes,
    pub source: FetchSource,
    /// Reported by the fill; `Unknown` for cached answers
    pub origin_cache: OriginCache,
}

impl Fetched {
    fn from_entry(entry: CacheEntry, source: FetchSource) -> Self {
        Self {
            key: entry.key,
            payload: entry.payload,
            source,
            origin_cache: OriginCache::Unknown,
        }
    }

    /// Served past its expiry
    pub fn is_stale(&self) -> bool {
        self.source == FetchSource::StaleDurable
    }
}

/// Wrap a durable store in the circuit breaker described by `config`
pub(crate) fn guard_store<S>(store: S, config: &CacheConfig) -> GuardedStore<S> {
    let breaker = CircuitBreaker::new(
        config.breaker.failure_threshold,
        config.breaker.reset_timeout,
    );
    GuardedStore::new(store, breaker)
}

struct RouterInner<S, M> {
    memory: MemoryTier,
    store: Arc<GuardedStore<S>>,
    leases: Arc<dyn LeaseProvider>,
    fill: Arc<dyn Fill>,
    flights: SingleFlight<Fetched>,
    recorder: ActivityRecorder,
    metrics: Arc<M>,
    config: CacheConfig,
    fingerprinter: ContentFingerprinter,
}

/// Routes fetches through the memory tier, the durable tier and the fill
///
/// Concurrent misses for one key share a single fill. Expired durable
/// entries are served stale while one background refresh runs, for
/// categories with stale-while-revalidate enabled. When the durable tier
/// fails the router keeps answering from memory and fills, and skips
/// write-through until the store recovers.
///
/// Cloning is cheap and yields a handle to the same router.
pub struct CacheTierRouter<S, M = NoopMetrics> {
    inner: Arc<RouterInner<S, M>>,
}

impl<S, M> Clone for CacheTierRouter<S, M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: DurableStore> CacheTierRouter<S, NoopMetrics> {
    /// Single-process router with local leases and a tracing activity sink
    pub fn new(store: S, fill: impl Fill, config: CacheConfig) -> Self {
        let recorder = ActivityRecorder::new(config.recorder.clone(), Arc::new(TracingSink));
        Self::from_parts(
            Arc::new(guard_store(store, &config)),
            Arc::new(fill),
            config,
            Arc::new(NoopMetrics),
            Arc::new(LocalLeases::new()),
            recorder,
        )
    }
}

impl<S: DurableStore, M: CacheMetrics> CacheTierRouter<S, M> {
    pub(crate) fn from_parts(
        store: Arc<GuardedStore<S>>,
        fill: Arc<dyn Fill>,
        config: CacheConfig,
        metrics: Arc<M>,
        leases: Arc<dyn LeaseProvider>,
        recorder: ActivityRecorder,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                memory: MemoryTier::new(&config.policies),
                store,
                leases,
                fill,
                flights: SingleFlight::new(),
                recorder,
                metrics,
                config,
                fingerprinter: ContentFingerprinter::new(),
            }),
        }
    }

    /// Key a fetch of `identifier` in `category` would use
    pub fn key_for(&self, category: Category, identifier: &Identifier) -> Result<CacheKey> {
        let input = match identifier {
            Identifier::Url(url) => FingerprintInput::Url(url),
            Identifier::Content(bytes) => FingerprintInput::Bytes(bytes),
        };
        self.inner.fingerprinter.fingerprint(category, input)
    }

    /// Fetch through the tiers, filling on a miss
    ///
    /// Emits exactly one activity record per call, failures included. An
    /// identifier that cannot be keyed fails before any record is made.
    pub async fn fetch(&self, category: Category, identifier: Identifier) -> Result<Fetched> {
        let key = self.key_for(category, &identifier)?;
        let host = identifier.host();
        let start = Instant::now();

        let result = self.resolve(key, identifier).await;

        let latency = start.elapsed();
        self.inner
            .metrics
            .record_latency(CacheOperation::Fetch, latency);
        self.record(key, host, &result, latency).await;
        result
    }

    async fn resolve(&self, key: CacheKey, identifier: Identifier) -> Result<Fetched> {
        if let Some(entry) = self.memory_get(&key) {
            self.inner.metrics.record_hit(&key, CacheTier::Memory);
            return Ok(Fetched::from_entry(entry, FetchSource::Memory));
        }

        match self.durable_get(&key).await {
            Some(Lookup::Fresh(entry)) => {
                self.inner.metrics.record_hit(&key, CacheTier::Durable);
                self.promote(entry.clone());
                return Ok(Fetched::from_entry(entry, FetchSource::Durable));
            }
            Some(Lookup::Expired(entry))
                if self.inner.config.policies[key.category].stale_while_revalidate =>
            {
                self.inner.metrics.record_stale_hit(&key);
                if let Err(err) = self.inner.store.touch(&key).await {
                    tracing::debug!(key = %key, error = %err, "touch on stale entry failed");
                }
                self.spawn_refresh(key, identifier);
                return Ok(Fetched::from_entry(entry.into_stale(), FetchSource::StaleDurable));
            }
            _ => {}
        }

        self.inner.metrics.record_miss(&key);
        let router = self.clone();
        self.inner
            .flights
            .execute(&key, move || async move { router.lead_fill(key, identifier).await })
            .await
    }

    /// Start one background refresh for `key` unless one is running
    fn spawn_refresh(&self, key: CacheKey, identifier: Identifier) {
        let router = self.clone();
        let spawned = self.inner.flights.try_spawn_refresh(&key, move || async move {
            let start = Instant::now();
            let leader = router.clone();
            let result = router
                .inner
                .flights
                .execute(&key, move || async move { leader.lead_fill(key, identifier).await })
                .await;
            router
                .inner
                .metrics
                .record_latency(CacheOperation::Refresh, start.elapsed());
            match result {
                Ok(_) => tracing::debug!(key = %key, "background refresh complete"),
                Err(err) => tracing::warn!(key = %key, error = %err, "background refresh failed"),
            }
        });
        if !spawned {
            tracing::trace!(key = %key, "refresh already running");
        }
    }

    /// Body run by the single-flight leader
    async fn lead_fill(&self, key: CacheKey, identifier: Identifier) -> Result<Fetched> {
        // A previous leader may have finished between our miss and registration.
        if let Some(entry) = self.memory_get(&key) {
            return Ok(Fetched::from_entry(entry, FetchSource::Memory));
        }

        let config = &self.inner.config;
        // No deadline when the timeout is too large to represent.
        let deadline = Instant::now().checked_add(config.fill_timeout);
        loop {
            match self.inner.leases.acquire(&key, config.lease_ttl).await {
                Ok(Some(lease)) => {
                    let result = self.run_fill(key, identifier).await;
                    if let Err(err) = self.inner.leases.release(lease).await {
                        tracing::warn!(key = %key, error = %err, "failed to release fill lease");
                    }
                    return result;
                }
                Ok(None) => {
                    if let Some(Lookup::Fresh(entry)) = self.durable_get(&key).await {
                        tracing::debug!(key = %key, "entry filled by lease holder");
                        self.promote(entry.clone());
                        return Ok(Fetched::from_entry(entry, FetchSource::Durable));
                    }
                    let expired = deadline.is_some_and(|deadline| {
                        Instant::now()
                            .checked_add(config.lease_poll_interval)
                            .is_none_or(|next_poll| next_poll > deadline)
                    });
                    if expired {
                        return Err(CacheError::FillTimedOut(config.fill_timeout));
                    }
                    tokio::time::sleep(config.lease_poll_interval).await;
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "lease unavailable, filling without one");
                    return self.run_fill(key, identifier).await;
                }
            }
        }
    }

    async fn run_fill(&self, key: CacheKey, identifier: Identifier) -> Result<Fetched> {
        let request = FillRequest { key, identifier };
        let timeout = self.inner.config.fill_timeout;
        let start = Instant::now();

        let result = match tokio::time::timeout(timeout, self.inner.fill.fill(&request)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) if err.is_fill_failure() => Err(err),
            Ok(Err(err)) => Err(CacheError::FillFailed(err.to_string())),
            Err(_) => Err(CacheError::FillTimedOut(timeout)),
        };
        let elapsed = start.elapsed();
        self.inner
            .metrics
            .record_latency(CacheOperation::Fill, elapsed);
        self.inner
            .metrics
            .record_fill(key.category, elapsed, result.is_ok());

        let output = result.inspect_err(|err| {
            tracing::warn!(key = %key, error = %err, "fill failed");
        })?;
        tracing::debug!(
            key = %key,
            bytes = output.payload.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "filled"
        );

        self.write_through(key, output.payload.clone()).await;
        Ok(Fetched {
            key,
            payload: output.payload,
            source: FetchSource::FreshFill,
            origin_cache: output.origin_cache,
        })
    }

    /// Persist a fresh fill to the durable tier (unless degraded) and memory
    async fn write_through(&self, key: CacheKey, payload: Bytes) {
        let ttl = self.ttl_for(key.category);

        let stored = if self.inner.store.is_degraded() {
            tracing::debug!(key = %key, "durable tier degraded, skipping write-through");
            None
        } else {
            let start = Instant::now();
            match self.inner.store.upsert(&key, payload.clone(), ttl).await {
                Ok(entry) => {
                    self.inner
                        .metrics
                        .record_latency(CacheOperation::DurableWrite, start.elapsed());
                    Some(entry)
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "write-through failed, keeping entry in memory only");
                    None
                }
            }
        };

        let entry = stored.unwrap_or_else(|| CacheEntry::new(key, payload, ttl));
        self.promote(entry);
    }

    fn promote(&self, entry: CacheEntry) {
        let category = entry.key.category;
        if let Some(evicted) = self.inner.memory.put(entry) {
            tracing::trace!(key = %evicted, "evicted from memory tier");
            self.inner
                .metrics
                .record_eviction(category, EvictionReason::Capacity);
        }
    }

    /// Memory lookup that reports lazily expired entries
    fn memory_get(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.inner.memory.lookup(key) {
            Lookup::Fresh(entry) => Some(entry),
            Lookup::Expired(_) => {
                self.inner
                    .metrics
                    .record_eviction(key.category, EvictionReason::Expired);
                None
            }
            Lookup::Missing => None,
        }
    }

    /// Drop expired entries from the memory tier, returning how many
    pub fn sweep_memory(&self) -> usize {
        let mut removed = 0;
        for category in Category::ALL {
            let swept = self.inner.memory.sweep_category(category);
            for _ in 0..swept {
                self.inner
                    .metrics
                    .record_eviction(category, EvictionReason::Expired);
            }
            removed += swept;
        }
        removed
    }

    async fn durable_get(&self, key: &CacheKey) -> Option<Lookup> {
        let start = Instant::now();
        match self.inner.store.get(key).await {
            Ok(lookup) => {
                self.inner
                    .metrics
                    .record_latency(CacheOperation::DurableGet, start.elapsed());
                Some(lookup)
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "durable tier unavailable, continuing memory-only");
                None
            }
        }
    }

    async fn record(
        &self,
        key: CacheKey,
        host: Option<String>,
        result: &Result<Fetched>,
        latency: Duration,
    ) {
        let record = match result {
            Ok(fetched) => NetworkActivityRecord::new(
                key,
                fetched.source.outcome(),
                fetched.source.tier(),
                latency,
            )
            .with_origin_cache(fetched.origin_cache),
            Err(_) => NetworkActivityRecord::new(key, Outcome::Error, CacheTier::Fill, latency),
        };

        if let Err(err) = self.inner.recorder.record(record.with_host(host)).await {
            tracing::warn!(key = %key, error = %err, "failed to record fetch activity");
        }
    }

    /// Category TTL, with jitter applied if configured
    fn ttl_for(&self, category: Category) -> Option<Duration> {
        self.inner.config.policies[category]
            .ttl
            .map(|ttl| self.apply_ttl_jitter(ttl))
    }

    /// Spread expiries so entries filled together do not expire together
    fn apply_ttl_jitter(&self, ttl: Duration) -> Duration {
        if self.inner.config.ttl_jitter > 0.0 {
            let jitter_range = (ttl.as_millis() as f64 * self.inner.config.ttl_jitter) as u64;
            if jitter_range > 0 {
                let jitter = rand::random::<u64>() % jitter_range;
                return ttl + Duration::from_millis(jitter);
            }
        }
        ttl
    }

    /// Drop an entry from both tiers
    ///
    /// Returns whether either tier held it.
    pub async fn invalidate(&self, category: Category, identifier: &Identifier) -> Result<bool> {
        let key = self.key_for(category, identifier)?;
        let in_memory = self.inner.memory.invalidate(&key);
        if in_memory {
            self.inner
                .metrics
                .record_eviction(category, EvictionReason::Invalidated);
        }
        let in_store = self.inner.store.purge(&key).await?;
        Ok(in_memory || in_store)
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.inner.memory
    }

    /// The durable tier behind its circuit breaker
    pub fn store(&self) -> &GuardedStore<S> {
        &*self.inner.store
    }

    /// Durable tier is failing and write-through is suspended
    pub fn is_degraded(&self) -> bool {
        self.inner.store.is_degraded()
    }

    pub fn recorder(&self) -> &ActivityRecorder {
        &self.inner.recorder
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &M {
        &self.inner.metrics
    }

    /// Keys with a fill currently running
    pub fn in_flight(&self) -> usize {
        self.inner.flights.in_flight()
    }
}
