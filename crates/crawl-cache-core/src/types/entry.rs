//! Cache entry type

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::key::CacheKey;

/// A cached entry with full metadata
///
/// Owned by the tier that stores it. A memory-tier entry is a shadow of the
/// durable entry with the same key and carries the same `expires_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Category-scoped key
    pub key: CacheKey,
    /// The cached payload
    pub payload: Bytes,
    /// Payload length, kept as a secondary identity check
    pub size_bytes: usize,
    /// When the entry was first filled
    pub created_at: SystemTime,
    /// Expiry instant; `None` never expires
    pub expires_at: Option<SystemTime>,
    /// When the entry was last accessed
    pub last_accessed_at: SystemTime,
    /// Number of recorded accesses
    pub access_count: u64,
    /// Set when the entry is served past its expiry
    pub is_stale: bool,
}

impl CacheEntry {
    /// Create a new entry expiring `ttl` from now
    pub fn new(key: CacheKey, payload: Bytes, ttl: Option<Duration>) -> Self {
        let now = SystemTime::now();
        Self::with_times(key, payload, now, expiry_from(now, ttl))
    }

    /// Create an entry with explicit timestamps
    pub fn with_times(
        key: CacheKey,
        payload: Bytes,
        created_at: SystemTime,
        expires_at: Option<SystemTime>,
    ) -> Self {
        Self {
            key,
            size_bytes: payload.len(),
            payload,
            created_at,
            expires_at,
            last_accessed_at: created_at,
            access_count: 0,
            is_stale: false,
        }
    }

    /// Check if entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Check expiry against a given instant
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }

    /// Get remaining TTL; `None` for entries that never expire
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at.map(|expires_at| {
            expires_at
                .duration_since(SystemTime::now())
                .unwrap_or_default()
        })
    }

    /// Get age of the entry
    pub fn age(&self) -> Duration {
        self.created_at.elapsed().unwrap_or_default()
    }

    /// Record one access at `now`
    pub fn record_access(&mut self, now: SystemTime) {
        self.last_accessed_at = now;
        self.access_count += 1;
    }

    /// Mark as served past expiry
    pub fn into_stale(mut self) -> Self {
        self.is_stale = true;
        self
    }
}

/// Expiry instant for a TTL measured from `now`
pub fn expiry_from(now: SystemTime, ttl: Option<Duration>) -> Option<SystemTime> {
    ttl.and_then(|ttl| now.checked_add(ttl))
}

/// Milliseconds since the Unix epoch
pub fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Inverse of [`unix_millis`]
pub fn from_unix_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Category, Fingerprint};

    fn key() -> CacheKey {
        CacheKey::new(Category::Url, Fingerprint::from_bytes([3; 32]))
    }

    #[test]
    fn test_new_entry() {
        let entry = CacheEntry::new(key(), Bytes::from_static(b"test"), None);
        assert_eq!(entry.payload, Bytes::from_static(b"test"));
        assert_eq!(entry.size_bytes, 4);
        assert_eq!(entry.access_count, 0);
        assert!(!entry.is_expired());
        assert!(!entry.is_stale);
    }

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let entry = CacheEntry::new(key(), Bytes::new(), None);
        let far_future = SystemTime::now() + Duration::from_secs(10 * 365 * 86_400);
        assert!(!entry.is_expired_at(far_future));
        assert!(entry.ttl_remaining().is_none());
    }

    #[test]
    fn test_entry_with_ttl() {
        let entry = CacheEntry::new(key(), Bytes::new(), Some(Duration::from_secs(60)));
        assert!(!entry.is_expired());
        assert!(entry.ttl_remaining().unwrap() <= Duration::from_secs(60));

        let later = entry.created_at + Duration::from_secs(61);
        assert!(entry.is_expired_at(later));
    }

    #[test]
    fn test_expiry_boundary_is_expired() {
        let entry = CacheEntry::new(key(), Bytes::new(), Some(Duration::from_secs(1)));
        let expires_at = entry.expires_at.unwrap();
        assert!(entry.is_expired_at(expires_at));
    }

    #[test]
    fn test_unix_millis() {
        let t = from_unix_millis(1_700_000_000_123);
        assert_eq!(unix_millis(t), 1_700_000_000_123);
    }
}
