//! Training corpus deduplication

use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crawl_cache_core::fingerprint::{canonical_json, features_fingerprint};
use crawl_cache_core::{
    CacheError, CacheKey, CacheMetrics, CacheOperation, Category, DurableStore, Fingerprint,
    Insertion, NewSample, NoopMetrics, Result, SampleInsert, TrainingSample,
};

use crate::singleflight::{Role, SingleFlight};

/// Running totals for the training corpus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorpusCounters {
    pub inserted: u64,
    pub duplicates: u64,
    pub below_quality: u64,
    pub collisions_suspected: u64,
}

#[derive(Default)]
struct Counters {
    inserted: AtomicU64,
    duplicates: AtomicU64,
    below_quality: AtomicU64,
    collisions_suspected: AtomicU64,
}

struct DedupInner<S, M> {
    store: S,
    min_quality: f64,
    counters: Counters,
    metrics: Arc<M>,
}

/// Stores each distinct feature vector at most once
///
/// Identity is the SHA-256 of the canonical feature JSON. Rows are written
/// with a conditional insert, so a racing process that gets there first
/// turns this insert into a [`SampleInsert::Duplicate`].
pub struct SampleDeduplicator<S, M = NoopMetrics> {
    inner: Arc<DedupInner<S, M>>,
    flights: SingleFlight<SampleInsert>,
}

impl<S: DurableStore> SampleDeduplicator<S, NoopMetrics> {
    pub fn new(store: S, min_quality: f64) -> Self {
        Self::with_metrics(store, min_quality, Arc::new(NoopMetrics))
    }
}

impl<S: DurableStore, M: CacheMetrics> SampleDeduplicator<S, M> {
    /// Deduplicator reporting insert latency to `metrics`
    pub fn with_metrics(store: S, min_quality: f64, metrics: Arc<M>) -> Self {
        Self {
            inner: Arc::new(DedupInner {
                store,
                min_quality,
                counters: Counters::default(),
                metrics,
            }),
            flights: SingleFlight::new(),
        }
    }

    /// Quality threshold below which samples are dropped
    pub fn min_quality(&self) -> f64 {
        self.inner.min_quality
    }

    /// Insert a sample unless an identical one exists
    pub async fn insert(&self, sample: NewSample) -> Result<SampleInsert> {
        let inner = &self.inner;
        let score = sample.quality_score;
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(CacheError::InvalidInput(format!(
                "quality score {score} outside [0, 1]"
            )));
        }
        if score < inner.min_quality {
            inner.counters.below_quality.fetch_add(1, Ordering::Relaxed);
            return Ok(SampleInsert::BelowQuality {
                score,
                threshold: inner.min_quality,
            });
        }

        let start = Instant::now();
        let content_hash = features_fingerprint(&sample.features);
        let key = CacheKey::new(Category::TrainingSample, content_hash);

        let writer = inner.clone();
        let (result, role) = self
            .flights
            .run(&key, move || async move { writer.write_once(key, sample).await })
            .await;
        inner
            .metrics
            .record_latency(CacheOperation::SampleInsert, start.elapsed());

        let outcome = match (result?, role) {
            // The leader's row was written for us; to this caller it already existed.
            (SampleInsert::Inserted(stored), Role::Follower) => SampleInsert::Duplicate(stored),
            (outcome, _) => outcome,
        };

        match &outcome {
            SampleInsert::Inserted(_) => inner.counters.inserted.fetch_add(1, Ordering::Relaxed),
            SampleInsert::Duplicate(_) => inner.counters.duplicates.fetch_add(1, Ordering::Relaxed),
            SampleInsert::BelowQuality { .. } => 0,
        };
        Ok(outcome)
    }

    /// Look up a stored sample by content hash
    pub async fn get(&self, content_hash: &Fingerprint) -> Result<Option<TrainingSample>> {
        let key = CacheKey::new(Category::TrainingSample, *content_hash);
        match self.inner.store.get(&key).await?.entry() {
            Some(entry) => decode(&entry.payload).map(Some),
            None => Ok(None),
        }
    }

    /// Flag a sample as consumed by a training run
    ///
    /// Returns `false` if no such sample exists.
    pub async fn mark_used_in_training(&self, content_hash: &Fingerprint) -> Result<bool> {
        let key = CacheKey::new(Category::TrainingSample, *content_hash);
        let Some(entry) = self.inner.store.get(&key).await?.entry() else {
            return Ok(false);
        };
        let mut sample = decode(&entry.payload)?;
        if sample.used_in_training {
            return Ok(true);
        }
        sample.used_in_training = true;
        self.inner.store.upsert(&key, encode(&sample)?, None).await?;
        Ok(true)
    }

    pub fn counters(&self) -> CorpusCounters {
        let counters = &self.inner.counters;
        CorpusCounters {
            inserted: counters.inserted.load(Ordering::Relaxed),
            duplicates: counters.duplicates.load(Ordering::Relaxed),
            below_quality: counters.below_quality.load(Ordering::Relaxed),
            collisions_suspected: counters.collisions_suspected.load(Ordering::Relaxed),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn metrics(&self) -> &M {
        &self.inner.metrics
    }
}

impl<S: DurableStore, M: CacheMetrics> DedupInner<S, M> {
    async fn write_once(&self, key: CacheKey, sample: NewSample) -> Result<SampleInsert> {
        let features_len = canonical_json(&sample.features).len();
        let row = TrainingSample {
            content_hash: key.fingerprint,
            features: sample.features,
            labels: sample.labels,
            quality_score: sample.quality_score,
            source_url: sample.source_url,
            used_in_training: false,
        };

        match self.store.insert_if_absent(&key, encode(&row)?, None).await? {
            Insertion::Inserted(_) => {
                tracing::debug!(hash = %key.fingerprint, source = %row.source_url, "training sample stored");
                Ok(SampleInsert::Inserted(row))
            }
            Insertion::Existing(entry) => {
                let existing = decode(&entry.payload)?;
                let existing_len = canonical_json(&existing.features).len();
                if existing_len != features_len {
                    self.counters
                        .collisions_suspected
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        hash = %key.fingerprint,
                        existing_len,
                        candidate_len = features_len,
                        "fingerprint collision suspected"
                    );
                }
                Ok(SampleInsert::Duplicate(existing))
            }
        }
    }
}

fn encode(sample: &TrainingSample) -> Result<Bytes> {
    serde_json::to_vec(sample)
        .map(Bytes::from)
        .map_err(|e| CacheError::Serialization(e.to_string()))
}

fn decode(payload: &[u8]) -> Result<TrainingSample> {
    serde_json::from_slice(payload).map_err(|e| CacheError::Deserialization(e.to_string()))
}

/// Hash a feature vector the way [`SampleDeduplicator`] does
pub fn sample_id(features: &Value) -> Fingerprint {
    features_fingerprint(features)
}
