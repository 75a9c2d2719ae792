//! Explicit lifecycle for the whole cache

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

use crawl_cache_core::{
    CacheMetrics, CacheTier, Category, CategoryStats, DurableCategoryStats, DurableStore,
    LeaseProvider, LocalLeases, MemoryTierStats, NoopMetrics, Result,
};
use crawl_cache_storage::GuardedStore;

use crate::config::CacheConfig;
use crate::dedup::{CorpusCounters, SampleDeduplicator};
use crate::fill::Fill;
use crate::recorder::{ActivityRecorder, ActivitySink, TracingSink};
use crate::router::{CacheTierRouter, guard_store};

/// Statistics for one category
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryReport {
    pub stats: CategoryStats,
    pub memory: MemoryTierStats,
}

/// Snapshot returned by [`CacheSystem::stats`]
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    /// One report per category, in [`Category::ALL`] order
    pub categories: Vec<CategoryReport>,
    /// Average fetch latency per answering tier within the window
    pub tier_latency: Vec<(CacheTier, Option<Duration>)>,
    /// Durable tier was failing when the snapshot was taken
    pub degraded: bool,
    pub corpus: CorpusCounters,
}

impl StatsReport {
    pub fn category(&self, category: Category) -> &CategoryReport {
        &self.categories[category.index()]
    }

    pub fn latency(&self, tier: CacheTier) -> Option<Duration> {
        self.tier_latency
            .iter()
            .find(|(t, _)| *t == tier)
            .and_then(|(_, latency)| *latency)
    }
}

/// Builder for [`CacheSystem`]
pub struct CacheSystemBuilder<S, M = NoopMetrics> {
    store: S,
    fill: Arc<dyn Fill>,
    config: CacheConfig,
    metrics: Arc<M>,
    leases: Arc<dyn LeaseProvider>,
    sink: Arc<dyn ActivitySink>,
}

impl<S: DurableStore, M: CacheMetrics> CacheSystemBuilder<S, M> {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a metrics collector
    pub fn metrics<M2: CacheMetrics>(self, metrics: M2) -> CacheSystemBuilder<S, M2> {
        CacheSystemBuilder {
            store: self.store,
            fill: self.fill,
            config: self.config,
            metrics: Arc::new(metrics),
            leases: self.leases,
            sink: self.sink,
        }
    }

    /// Coordinate fills across processes; defaults to [`LocalLeases`]
    pub fn lease_provider(mut self, leases: impl LeaseProvider) -> Self {
        self.leases = Arc::new(leases);
        self
    }

    /// Where activity batches go; defaults to [`TracingSink`]
    pub fn activity_sink(mut self, sink: impl ActivitySink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn build(self) -> CacheSystem<S, M> {
        let store = Arc::new(guard_store(self.store, &self.config));
        let recorder = ActivityRecorder::new(self.config.recorder.clone(), self.sink);
        let deduplicator = SampleDeduplicator::with_metrics(
            store.clone(),
            self.config.min_quality_score,
            self.metrics.clone(),
        );
        let router = CacheTierRouter::from_parts(
            store,
            self.fill,
            self.config,
            self.metrics,
            self.leases,
            recorder,
        );

        CacheSystem {
            router,
            deduplicator,
            tasks: Mutex::new(Vec::new()),
        }
    }
}

/// Router, deduplicator and recorder with their background tasks
///
/// Constructed explicitly and handed to workers; nothing is global, so
/// several isolated systems can live in one process. Call
/// [`start`](Self::start) inside a tokio runtime to run the memory sweeper
/// and the periodic recorder flush, and [`shutdown`](Self::shutdown) to stop
/// them.
pub struct CacheSystem<S, M = NoopMetrics> {
    router: CacheTierRouter<S, M>,
    deduplicator: SampleDeduplicator<Arc<GuardedStore<S>>, M>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: DurableStore> CacheSystem<S> {
    pub fn builder(store: S, fill: impl Fill) -> CacheSystemBuilder<S> {
        CacheSystemBuilder {
            store,
            fill: Arc::new(fill),
            config: CacheConfig::default(),
            metrics: Arc::new(NoopMetrics),
            leases: Arc::new(LocalLeases::new()),
            sink: Arc::new(TracingSink),
        }
    }
}

impl<S: DurableStore, M: CacheMetrics> CacheSystem<S, M> {
    /// Spawn background tasks; calling it again while running is a no-op
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let config = self.router.config();
        if let Some(period) = config.sweep_interval.filter(|p| !p.is_zero()) {
            let router = self.router.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let removed = router.sweep_memory();
                    if removed > 0 {
                        tracing::debug!(removed, "swept expired memory entries");
                    }
                }
            }));
        }

        let period = config.recorder.flush_interval;
        if !period.is_zero() {
            let recorder = self.router.recorder().clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    // A failed batch is already logged and dropped by the recorder.
                    let _ = recorder.flush().await;
                }
            }));
        }

        tracing::info!(tasks = tasks.len(), "cache system started");
    }

    /// Whether background tasks are running
    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Stop background tasks and flush pending activity
    pub async fn shutdown(&self) -> Result<()> {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("cache system stopped");
        self.router.recorder().flush().await
    }

    pub fn router(&self) -> &CacheTierRouter<S, M> {
        &self.router
    }

    pub fn deduplicator(&self) -> &SampleDeduplicator<Arc<GuardedStore<S>>, M> {
        &self.deduplicator
    }

    pub fn recorder(&self) -> &ActivityRecorder {
        self.router.recorder()
    }

    /// Per-category statistics over the last `window` of activity
    ///
    /// Entry counts come from the durable tier. While it is degraded they
    /// fall back to what the memory tier holds.
    pub async fn stats(&self, window: Option<Duration>) -> StatsReport {
        let summary = self.recorder().summary(window);
        let memory = self.router.memory();
        let now = SystemTime::now();

        let mut categories = Vec::with_capacity(Category::COUNT);
        for category in Category::ALL {
            let stored = if self.router.is_degraded() {
                None
            } else {
                match self.router.store().category_stats(category).await {
                    Ok(stored) => Some(stored),
                    Err(err) => {
                        tracing::warn!(%category, error = %err, "durable stats unavailable, using memory tier");
                        None
                    }
                }
            };
            let stored = stored.unwrap_or_else(|| {
                let mut snapshot = DurableCategoryStats::default();
                for entry in memory.entries(category) {
                    snapshot.observe(&entry);
                }
                snapshot
            });

            let age = |t: SystemTime| now.duration_since(t).unwrap_or_default();
            let activity = summary.category(category);
            categories.push(CategoryReport {
                stats: CategoryStats {
                    category,
                    entries: stored.entries,
                    hits: activity.hits,
                    stale_hits: activity.stale_hits,
                    misses: activity.misses,
                    errors: activity.errors,
                    avg_payload_bytes: stored.avg_payload_bytes(),
                    oldest_entry_age: stored.oldest_created_at.map(age),
                    newest_entry_age: stored.newest_created_at.map(age),
                },
                memory: memory.stats(category),
            });
        }

        StatsReport {
            categories,
            tier_latency: CacheTier::ALL
                .into_iter()
                .map(|tier| (tier, summary.avg_latency(tier)))
                .collect(),
            degraded: self.router.is_degraded(),
            corpus: self.deduplicator.counters(),
        }
    }

    /// Delete durable entries of `category` expired for longer than `grace`
    ///
    /// Also drops expired entries from the memory tier. Returns the number
    /// of durable rows deleted.
    pub async fn purge_expired(&self, category: Category, grace: Duration) -> Result<u64> {
        let removed = self.router.sweep_memory();
        let cutoff = SystemTime::now()
            .checked_sub(grace)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let deleted = self
            .router
            .store()
            .expire_older_than(category, cutoff)
            .await?;
        tracing::debug!(%category, deleted, memory_removed = removed, "purged expired entries");
        Ok(deleted)
    }
}

impl<S, M> Drop for CacheSystem<S, M> {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
