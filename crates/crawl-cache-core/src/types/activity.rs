//! Network activity records

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use super::key::CacheKey;
use crate::CacheTier;

/// How a fetch request was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Hit,
    StaleHit,
    Miss,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Hit => "hit",
            Outcome::StaleHit => "stale_hit",
            Outcome::Miss => "miss",
            Outcome::Error => "error",
        }
    }
}

/// What the crawled site's own caching did for a fill
///
/// This describes the target site (e.g. a service worker answering
/// offline), not this cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginCache {
    #[default]
    Unknown,
    /// Served from the network
    Network,
    /// Served from the browser HTTP cache
    HttpCache,
    /// Intercepted by a service worker
    ServiceWorker,
}

/// One fetch attempt, append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkActivityRecord {
    pub requested_key: CacheKey,
    pub outcome: Outcome,
    pub tier: CacheTier,
    pub latency: Duration,
    pub timestamp: SystemTime,
    /// Host of the requested URL, when the request was URL-located
    pub host: Option<String>,
    pub origin_cache: OriginCache,
}

impl NetworkActivityRecord {
    pub fn new(requested_key: CacheKey, outcome: Outcome, tier: CacheTier, latency: Duration) -> Self {
        Self {
            requested_key,
            outcome,
            tier,
            latency,
            timestamp: SystemTime::now(),
            host: None,
            origin_cache: OriginCache::Unknown,
        }
    }

    pub fn with_host(mut self, host: Option<String>) -> Self {
        self.host = host;
        self
    }

    pub fn with_origin_cache(mut self, origin_cache: OriginCache) -> Self {
        self.origin_cache = origin_cache;
        self
    }

    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }
}
