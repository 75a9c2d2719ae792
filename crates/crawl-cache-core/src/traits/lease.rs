//! Cross-process fill leases

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::{CacheKey, Result};

/// A held fill lease
///
/// The token identifies the holder so a lease that expired and was taken
/// by another process is not released by the original holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: CacheKey,
    pub token: String,
}

/// Grants exclusive permission to fill a key across processes
///
/// Singleflight only deduplicates inside one process. Deployments with
/// several worker processes sharing a durable store plug a distributed
/// provider in here.
#[async_trait]
pub trait LeaseProvider: Send + Sync + 'static {
    /// Try to take the lease; `None` if another holder has it
    async fn acquire(&self, key: &CacheKey, ttl: Duration) -> Result<Option<Lease>>;

    /// Release a lease; `false` if it had already expired or changed hands
    async fn release(&self, lease: Lease) -> Result<bool>;
}

/// Lease provider for single-process deployments
///
/// Always grants; the in-process singleflight already serializes fills.
#[derive(Debug, Default)]
pub struct LocalLeases {
    next: AtomicU64,
}

impl LocalLeases {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseProvider for LocalLeases {
    async fn acquire(&self, key: &CacheKey, _ttl: Duration) -> Result<Option<Lease>> {
        let token = self.next.fetch_add(1, Ordering::Relaxed);
        Ok(Some(Lease {
            key: *key,
            token: format!("local-{token}"),
        }))
    }

    async fn release(&self, _lease: Lease) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Category, Fingerprint};

    #[tokio::test]
    async fn test_local_leases_always_grant() {
        let leases = LocalLeases::new();
        let key = CacheKey::new(Category::Ocr, Fingerprint::from_bytes([9; 32]));

        let a = leases.acquire(&key, Duration::from_secs(1)).await.unwrap();
        let b = leases.acquire(&key, Duration::from_secs(1)).await.unwrap();
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.token, b.token);
        assert!(leases.release(a).await.unwrap());
    }
}
