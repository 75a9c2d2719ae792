//! Durable lookup outcomes

use std::time::SystemTime;

use super::entry::CacheEntry;

/// Result of a tier lookup
///
/// Found-but-expired is distinct from missing: an expired entry may still
/// be served while a refresh runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Present and within its TTL
    Fresh(CacheEntry),
    /// Present but past `expires_at`
    Expired(CacheEntry),
    /// No entry for the key
    Missing,
}

impl Lookup {
    /// Classify a stored entry against `now`
    pub fn classify(entry: CacheEntry, now: SystemTime) -> Self {
        if entry.is_expired_at(now) {
            Lookup::Expired(entry)
        } else {
            Lookup::Fresh(entry)
        }
    }

    /// Entry present (fresh or expired)
    pub fn found(&self) -> bool {
        !matches!(self, Lookup::Missing)
    }

    /// Entry present but expired
    pub fn is_expired(&self) -> bool {
        matches!(self, Lookup::Expired(_))
    }

    /// Entry present and fresh
    pub fn is_fresh(&self) -> bool {
        matches!(self, Lookup::Fresh(_))
    }

    /// Borrow the entry if present
    pub fn entry_ref(&self) -> Option<&CacheEntry> {
        match self {
            Lookup::Fresh(entry) | Lookup::Expired(entry) => Some(entry),
            Lookup::Missing => None,
        }
    }

    /// Extract the entry, consuming the result
    pub fn entry(self) -> Option<CacheEntry> {
        match self {
            Lookup::Fresh(entry) | Lookup::Expired(entry) => Some(entry),
            Lookup::Missing => None,
        }
    }
}

/// Result of a conditional insert
#[derive(Debug, Clone, PartialEq)]
pub enum Insertion {
    /// The key was absent and the entry was written
    Inserted(CacheEntry),
    /// The key already existed; nothing was written
    Existing(CacheEntry),
}

impl Insertion {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Insertion::Inserted(_))
    }

    pub fn into_entry(self) -> CacheEntry {
        match self {
            Insertion::Inserted(entry) | Insertion::Existing(entry) => entry,
        }
    }
}
