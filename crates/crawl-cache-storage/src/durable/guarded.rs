//! Circuit-breaker wrapper for durable stores

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::time::{Duration, SystemTime};

use crawl_cache_core::{
    CacheEntry, CacheError, CacheKey, Category, DurableCategoryStats, DurableStore, Insertion,
    Lookup, Result,
};

use super::circuit_breaker::CircuitBreaker;

/// Durable store that fails fast while its backend is unhealthy
///
/// Connection and backend errors count against a [`CircuitBreaker`]. Once
/// it opens, every call returns [`CacheError::StoreUnavailable`] without
/// touching the backend until the reset timeout lets a probe through.
pub struct GuardedStore<S> {
    inner: S,
    breaker: CircuitBreaker,
}

impl<S> GuardedStore<S> {
    pub fn new(inner: S, breaker: CircuitBreaker) -> Self {
        Self { inner, breaker }
    }

    /// Whether the circuit is currently open or probing
    pub fn is_degraded(&self) -> bool {
        self.breaker.is_open()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn guard<T, F>(&self, op: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        if !self.breaker.allow_request() {
            return Err(CacheError::StoreUnavailable(format!(
                "circuit open, skipped {op}"
            )));
        }

        match call.await {
            Ok(value) => {
                self.breaker.report_success();
                Ok(value)
            }
            Err(err) if CircuitBreaker::is_failure(&err) => {
                tracing::debug!(op, error = %err, "durable store call failed");
                self.breaker.report_failure();
                Err(err)
            }
            Err(err) => {
                // The store answered; the failure is about the data.
                self.breaker.report_success();
                Err(err)
            }
        }
    }
}

#[async_trait]
impl<S: DurableStore> DurableStore for GuardedStore<S> {
    async fn get(&self, key: &CacheKey) -> Result<Lookup> {
        self.guard("get", self.inner.get(key)).await
    }

    async fn upsert(
        &self,
        key: &CacheKey,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<CacheEntry> {
        self.guard("upsert", self.inner.upsert(key, payload, ttl)).await
    }

    async fn insert_if_absent(
        &self,
        key: &CacheKey,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<Insertion> {
        self.guard("insert_if_absent", self.inner.insert_if_absent(key, payload, ttl))
            .await
    }

    async fn touch(&self, key: &CacheKey) -> Result<bool> {
        self.guard("touch", self.inner.touch(key)).await
    }

    async fn expire_older_than(&self, category: Category, instant: SystemTime) -> Result<u64> {
        self.guard(
            "expire_older_than",
            self.inner.expire_older_than(category, instant),
        )
        .await
    }

    async fn purge(&self, key: &CacheKey) -> Result<bool> {
        self.guard("purge", self.inner.purge(key)).await
    }

    async fn category_stats(&self, category: Category) -> Result<DurableCategoryStats> {
        self.guard("category_stats", self.inner.category_stats(category))
            .await
    }
}
