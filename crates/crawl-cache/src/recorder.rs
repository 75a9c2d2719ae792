//! Append-only log of fetch attempts

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crawl_cache_core::{
    CacheError, CacheTier, Category, NetworkActivityRecord, OriginCache, Outcome, Result,
};

use crate::config::RecorderConfig;

const MAX_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Destination for flushed activity batches
#[async_trait]
pub trait ActivitySink: Send + Sync + 'static {
    async fn write_batch(&self, batch: Vec<NetworkActivityRecord>) -> Result<()>;
}

/// Sink that keeps every record it receives
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<NetworkActivityRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<NetworkActivityRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl ActivitySink for MemorySink {
    async fn write_batch(&self, batch: Vec<NetworkActivityRecord>) -> Result<()> {
        self.records.lock().extend(batch);
        Ok(())
    }
}

/// Sink that emits one `tracing` event per record
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl ActivitySink for TracingSink {
    async fn write_batch(&self, batch: Vec<NetworkActivityRecord>) -> Result<()> {
        for record in batch {
            tracing::debug!(
                target: "crawl_cache::activity",
                key = %record.requested_key,
                outcome = record.outcome.as_str(),
                tier = record.tier.as_str(),
                latency_ms = record.latency.as_millis() as u64,
                host = record.host.as_deref().unwrap_or("-"),
                origin_cache = ?record.origin_cache,
                "fetch"
            );
        }
        Ok(())
    }
}

/// Outcome counts for one category
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CategoryActivity {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub errors: u64,
}

impl CategoryActivity {
    /// Share of non-error requests answered from a tier, stale included
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.stale_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.stale_hits) as f64 / total as f64
        }
    }

    pub fn total(&self) -> u64 {
        self.hits + self.stale_hits + self.misses + self.errors
    }
}

/// Aggregates over retained records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivitySummary {
    per_category: [CategoryActivity; Category::COUNT],
    latency_sum: [Duration; 3],
    latency_count: [u64; 3],
}

fn tier_index(tier: CacheTier) -> usize {
    match tier {
        CacheTier::Memory => 0,
        CacheTier::Durable => 1,
        CacheTier::Fill => 2,
    }
}

impl ActivitySummary {
    fn observe(&mut self, record: &NetworkActivityRecord) {
        let counts = &mut self.per_category[record.requested_key.category.index()];
        match record.outcome {
            Outcome::Hit => counts.hits += 1,
            Outcome::StaleHit => counts.stale_hits += 1,
            Outcome::Miss => counts.misses += 1,
            Outcome::Error => counts.errors += 1,
        }
        let tier = tier_index(record.tier);
        self.latency_sum[tier] = self.latency_sum[tier].saturating_add(record.latency);
        self.latency_count[tier] += 1;
    }

    pub fn category(&self, category: Category) -> CategoryActivity {
        self.per_category[category.index()]
    }

    /// Mean latency of requests answered by `tier`
    pub fn avg_latency(&self, tier: CacheTier) -> Option<Duration> {
        let i = tier_index(tier);
        match self.latency_count[i] {
            0 => None,
            n => {
                let nanos = self.latency_sum[i].as_nanos() / u128::from(n);
                Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
            }
        }
    }

    pub fn total(&self) -> u64 {
        self.per_category.iter().map(CategoryActivity::total).sum()
    }
}

struct RecorderState {
    retained: VecDeque<NetworkActivityRecord>,
    pending: Vec<NetworkActivityRecord>,
    accepted: u64,
    rejected: u64,
}

/// Validates, retains and batches activity records
///
/// Cloning creates a new handle to the SAME log.
#[derive(Clone)]
pub struct ActivityRecorder {
    config: RecorderConfig,
    state: Arc<Mutex<RecorderState>>,
    sink: Arc<dyn ActivitySink>,
}

impl ActivityRecorder {
    pub fn new(config: RecorderConfig, sink: Arc<dyn ActivitySink>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RecorderState {
                retained: VecDeque::with_capacity(config.retention.min(4_096)),
                pending: Vec::with_capacity(config.batch_size.min(4_096)),
                accepted: 0,
                rejected: 0,
            })),
            config,
            sink,
        }
    }

    fn validate(record: &NetworkActivityRecord) -> Result<()> {
        match (record.outcome, record.tier) {
            (Outcome::Hit, CacheTier::Memory | CacheTier::Durable)
            | (Outcome::StaleHit, CacheTier::Durable)
            | (Outcome::Miss, CacheTier::Fill)
            | (Outcome::Error, _) => {}
            (outcome, tier) => {
                return Err(CacheError::InvalidRecord(format!(
                    "{} cannot be answered by the {} tier",
                    outcome.as_str(),
                    tier.as_str()
                )));
            }
        }

        if record.timestamp > SystemTime::now() + MAX_CLOCK_SKEW {
            return Err(CacheError::InvalidRecord(
                "timestamp is in the future".into(),
            ));
        }
        Ok(())
    }

    /// Append a record; flushes a batch to the sink when one is full
    pub async fn record(&self, record: NetworkActivityRecord) -> Result<()> {
        if let Err(err) = Self::validate(&record) {
            self.state.lock().rejected += 1;
            return Err(err);
        }

        let batch = {
            let mut state = self.state.lock();
            state.accepted += 1;

            if self.config.retention > 0 {
                if state.retained.len() >= self.config.retention {
                    state.retained.pop_front();
                }
                state.retained.push_back(record.clone());
            }

            state.pending.push(record);
            if state.pending.len() >= self.config.batch_size.max(1) {
                Some(std::mem::take(&mut state.pending))
            } else {
                None
            }
        };

        match batch {
            Some(batch) => self.write(batch).await,
            None => Ok(()),
        }
    }

    /// Write out whatever is pending
    pub async fn flush(&self) -> Result<()> {
        let batch = std::mem::take(&mut self.state.lock().pending);
        if batch.is_empty() {
            return Ok(());
        }
        self.write(batch).await
    }

    async fn write(&self, batch: Vec<NetworkActivityRecord>) -> Result<()> {
        let len = batch.len();
        self.sink.write_batch(batch).await.inspect_err(|err| {
            tracing::warn!(records = len, error = %err, "dropping activity batch, sink write failed");
        })
    }

    /// Aggregate retained records, optionally only the last `window`
    pub fn summary(&self, window: Option<Duration>) -> ActivitySummary {
        let since = window.and_then(|w| SystemTime::now().checked_sub(w));
        let state = self.state.lock();
        let mut summary = ActivitySummary::default();
        for record in &state.retained {
            if since.is_none_or(|since| record.timestamp >= since) {
                summary.observe(record);
            }
        }
        summary
    }

    /// Hosts whose pages were seen served by a service worker
    ///
    /// Only retained records count, so hosts age out with the ring.
    pub fn offline_capable_hosts(&self) -> Vec<String> {
        let state = self.state.lock();
        let hosts: BTreeSet<&str> = state
            .retained
            .iter()
            .filter(|record| record.origin_cache == OriginCache::ServiceWorker)
            .filter_map(|record| record.host.as_deref())
            .collect();
        hosts.into_iter().map(str::to_owned).collect()
    }

    /// Records accepted since creation
    pub fn accepted(&self) -> u64 {
        self.state.lock().accepted
    }

    /// Records rejected by validation since creation
    pub fn rejected(&self) -> u64 {
        self.state.lock().rejected
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }
}
