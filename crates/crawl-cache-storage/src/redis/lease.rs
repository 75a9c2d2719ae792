use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::Script;
use std::time::Duration;

use crawl_cache_core::{CacheError, CacheKey, Lease, LeaseProvider, Result};

use super::config::RedisConfig;

/// Deletes the lease only if the caller still holds it
const RELEASE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Fill leases shared by every process using the same Redis
///
/// A lease is a `SET NX PX` key holding a random token, so it expires on
/// its own if the holder dies mid-fill.
#[derive(Clone)]
pub struct RedisLeaseProvider {
    pool: Pool<RedisConnectionManager>,
    config: RedisConfig,
    release_script: Script,
}

impl RedisLeaseProvider {
    /// Connect a standalone provider
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
        Ok(Self::from_pool(pool, config))
    }

    pub(crate) fn from_pool(pool: Pool<RedisConnectionManager>, config: RedisConfig) -> Self {
        Self {
            pool,
            config,
            release_script: Script::new(RELEASE),
        }
    }

    fn lease_key(&self, key: &CacheKey) -> String {
        self.config.key(&format!("lease:{}", key.storage_key()))
    }
}

fn new_token() -> String {
    format!("{:016x}{:016x}", rand::random::<u64>(), rand::random::<u64>())
}

#[async_trait]
impl LeaseProvider for RedisLeaseProvider {
    async fn acquire(&self, key: &CacheKey, ttl: Duration) -> Result<Option<Lease>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
        let token = new_token();

        let reply: Option<String> = redis::cmd("SET")
            .arg(self.lease_key(key))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        Ok(reply.map(|_| Lease { key: *key, token }))
    }

    async fn release(&self, lease: Lease) -> Result<bool> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;

        let deleted: i64 = self
            .release_script
            .key(self.lease_key(&lease.key))
            .arg(&lease.token)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(deleted == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let a = new_token();
        let b = new_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
