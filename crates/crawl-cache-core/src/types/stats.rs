//! Cache statistics

use std::time::{Duration, SystemTime};

use super::category::Category;
use super::entry::CacheEntry;

/// Per-category statistics as reported to dashboards
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryStats {
    pub category: Category,
    /// Total stored entries
    pub entries: u64,
    /// Fresh hits (memory or durable) in the window
    pub hits: u64,
    /// Stale hits served while revalidating
    pub stale_hits: u64,
    /// Hard misses that went to the fill
    pub misses: u64,
    /// Failed fetches
    pub errors: u64,
    /// Average payload size in bytes
    pub avg_payload_bytes: u64,
    /// Age of the oldest stored entry
    pub oldest_entry_age: Option<Duration>,
    /// Age of the newest stored entry
    pub newest_entry_age: Option<Duration>,
}

impl CategoryStats {
    pub fn empty(category: Category) -> Self {
        Self {
            category,
            entries: 0,
            hits: 0,
            stale_hits: 0,
            misses: 0,
            errors: 0,
            avg_payload_bytes: 0,
            oldest_entry_age: None,
            newest_entry_age: None,
        }
    }

    /// Requests answered from a cache tier, fresh or stale (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            (self.hits + self.stale_hits) as f64 / total as f64
        }
    }

    /// Total requests (hits + stale hits + misses)
    pub fn total_requests(&self) -> u64 {
        self.hits + self.stale_hits + self.misses
    }
}

/// Stored-entry statistics for one category of the durable tier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DurableCategoryStats {
    pub entries: u64,
    pub total_bytes: u64,
    pub oldest_created_at: Option<SystemTime>,
    pub newest_created_at: Option<SystemTime>,
}

impl DurableCategoryStats {
    /// Account for one stored entry
    pub fn observe(&mut self, entry: &CacheEntry) {
        self.observe_raw(entry.size_bytes as u64, entry.created_at);
    }

    /// Account for one stored entry given its size and creation time
    pub fn observe_raw(&mut self, size_bytes: u64, created_at: SystemTime) {
        self.entries += 1;
        self.total_bytes += size_bytes;
        self.oldest_created_at = Some(match self.oldest_created_at {
            Some(t) => t.min(created_at),
            None => created_at,
        });
        self.newest_created_at = Some(match self.newest_created_at {
            Some(t) => t.max(created_at),
            None => created_at,
        });
    }

    pub fn avg_payload_bytes(&self) -> u64 {
        if self.entries == 0 {
            0
        } else {
            self.total_bytes / self.entries
        }
    }
}

/// Counters for one category of the memory tier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTierStats {
    /// Current number of entries
    pub entries: usize,
    /// Approximate payload bytes held
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    /// Capacity (LRU) evictions
    pub evictions: u64,
    /// Entries dropped because their TTL passed
    pub expirations: u64,
}

impl MemoryTierStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Merge stats from another category
    pub fn merge(&mut self, other: &MemoryTierStats) {
        self.entries += other.entries;
        self.bytes += other.bytes;
        self.hits += other.hits;
        self.misses += other.misses;
        self.evictions += other.evictions;
        self.expirations += other.expirations;
    }
}
