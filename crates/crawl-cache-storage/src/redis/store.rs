use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use bytes::Bytes;
use redis::Script;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crawl_cache_core::compression::{self, Codec, Compressor, NoopCompressor};
use crawl_cache_core::{
    CacheEntry, CacheError, CacheKey, Category, DurableCategoryStats, DurableStore, Insertion,
    Lookup, Result, expiry_from, from_unix_millis, unix_millis,
};

use super::config::RedisConfig;
use super::lease::RedisLeaseProvider;

type Fields = HashMap<String, Vec<u8>>;

const SCAN_COUNT: usize = 500;

/// Writes only when the key is absent or past its expiry.
/// Returns the stored hash prefixed with `inserted` or `existing`.
const INSERT_IF_ABSENT: &str = r#"
local now = tonumber(ARGV[1])
if redis.call('EXISTS', KEYS[1]) == 1 then
  local exp = tonumber(redis.call('HGET', KEYS[1], 'expires_at_ms') or '0')
  if exp == 0 or exp > now then
    local fields = redis.call('HGETALL', KEYS[1])
    table.insert(fields, 1, 'existing')
    return fields
  end
  redis.call('DEL', KEYS[1])
end
redis.call('HSET', KEYS[1],
  'payload', ARGV[2], 'codec', ARGV[3], 'size', ARGV[4],
  'created_at_ms', ARGV[1], 'expires_at_ms', ARGV[5],
  'last_accessed_ms', ARGV[1], 'access_count', 1)
local ttl = tonumber(ARGV[6])
if ttl > 0 then
  redis.call('PEXPIRE', KEYS[1], ttl)
end
local fields = redis.call('HGETALL', KEYS[1])
table.insert(fields, 1, 'inserted')
return fields
"#;

const TOUCH: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], 'last_accessed_ms', ARGV[1])
redis.call('HINCRBY', KEYS[1], 'access_count', 1)
return 1
"#;

/// Durable store backed by Redis hashes
///
/// Each entry is one hash at `<prefix>:<category>:<hex>` holding the
/// (possibly compressed) payload and its metadata. The Redis key outlives
/// the logical TTL by `stale_retention` so expired entries stay readable.
#[derive(Clone)]
pub struct RedisDurableStore<C = NoopCompressor> {
    pool: Pool<RedisConnectionManager>,
    config: RedisConfig,
    compressor: C,
    insert_script: Script,
    touch_script: Script,
}

impl RedisDurableStore<NoopCompressor> {
    /// Connect with payloads stored uncompressed
    pub async fn new(config: RedisConfig) -> Result<Self> {
        Self::with_compressor(config, NoopCompressor).await
    }
}

impl<C: Compressor> RedisDurableStore<C> {
    /// Connect with the given payload compressor
    pub async fn with_compressor(config: RedisConfig, compressor: C) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;

        Ok(Self {
            pool,
            config,
            compressor,
            insert_script: Script::new(INSERT_IF_ABSENT),
            touch_script: Script::new(TOUCH),
        })
    }

    /// Lease provider sharing this store's pool and prefix
    pub fn lease_provider(&self) -> RedisLeaseProvider {
        RedisLeaseProvider::from_pool(self.pool.clone(), self.config.clone())
    }

    fn entry_key(&self, key: &CacheKey) -> String {
        self.config.key(&key.storage_key())
    }

    fn category_pattern(&self, category: Category) -> String {
        self.config.key(&format!("{}:*", category.as_str()))
    }

    fn redis_ttl_ms(&self, ttl: Option<Duration>) -> Option<u64> {
        ttl.map(|ttl| (ttl + self.config.stale_retention).as_millis() as u64)
    }

    async fn get_connection(&self) -> Result<PooledConnection<'_, RedisConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))
    }

    async fn scan_batch(
        conn: &mut PooledConnection<'_, RedisConnectionManager>,
        cursor: u64,
        pattern: &str,
    ) -> Result<(u64, Vec<String>)> {
        redis::cmd("SCAN")
            .cursor_arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_COUNT)
            .query_async(&mut **conn)
            .await
            .map_err(backend)
    }
}

fn backend(err: redis::RedisError) -> CacheError {
    CacheError::Backend(err.to_string())
}

fn field_u64(fields: &Fields, name: &str) -> Result<u64> {
    let raw = fields
        .get(name)
        .ok_or_else(|| CacheError::Deserialization(format!("missing field {name}")))?;
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CacheError::Deserialization(format!("malformed field {name}")))
}

/// Rebuild an entry from its stored hash
pub(crate) fn decode_entry(key: CacheKey, mut fields: Fields) -> Result<CacheEntry> {
    let codec = match fields.get("codec") {
        Some(raw) => String::from_utf8_lossy(raw).parse::<Codec>()?,
        None => Codec::Raw,
    };
    let size = field_u64(&fields, "size")? as usize;
    let created_at = from_unix_millis(field_u64(&fields, "created_at_ms")?);
    let expires_at = match field_u64(&fields, "expires_at_ms")? {
        0 => None,
        ms => Some(from_unix_millis(ms)),
    };
    let last_accessed_at = field_u64(&fields, "last_accessed_ms")
        .map(from_unix_millis)
        .unwrap_or(created_at);
    let access_count = field_u64(&fields, "access_count").unwrap_or(0);

    let raw = fields
        .remove("payload")
        .ok_or_else(|| CacheError::Deserialization("missing field payload".into()))?;
    let payload = compression::decode(codec, Bytes::from(raw))?;
    if payload.len() != size {
        return Err(CacheError::Deserialization(format!(
            "payload size mismatch for {key}: stored {size}, decoded {}",
            payload.len()
        )));
    }

    Ok(CacheEntry {
        key,
        payload,
        size_bytes: size,
        created_at,
        expires_at,
        last_accessed_at,
        access_count,
        is_stale: false,
    })
}

/// Split a script reply `[tag, field, value, ...]` into the tag and hash
fn split_tagged(mut items: Vec<Vec<u8>>) -> Result<(Vec<u8>, Fields)> {
    if items.is_empty() {
        return Err(CacheError::Deserialization("empty script reply".into()));
    }
    let tag = items.remove(0);
    let mut fields = Fields::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
        fields.insert(String::from_utf8_lossy(&name).into_owned(), value);
    }
    Ok((tag, fields))
}

#[async_trait]
impl<C: Compressor> DurableStore for RedisDurableStore<C> {
    async fn get(&self, key: &CacheKey) -> Result<Lookup> {
        let mut conn = self.get_connection().await?;
        let fields: Fields = redis::cmd("HGETALL")
            .arg(self.entry_key(key))
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;

        if fields.is_empty() {
            return Ok(Lookup::Missing);
        }
        let entry = decode_entry(*key, fields)?;
        Ok(Lookup::classify(entry, SystemTime::now()))
    }

    async fn upsert(
        &self,
        key: &CacheKey,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<CacheEntry> {
        let mut conn = self.get_connection().await?;
        let redis_key = self.entry_key(key);
        let now = SystemTime::now();
        let now_ms = unix_millis(now);
        let expires_at = expiry_from(now, ttl);
        let (codec, encoded) = self.compressor.encode(&payload)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET")
            .arg(&redis_key)
            .arg("payload")
            .arg(encoded.as_ref())
            .arg("codec")
            .arg(codec.as_str())
            .arg("size")
            .arg(payload.len())
            .arg("expires_at_ms")
            .arg(expires_at.map(unix_millis).unwrap_or(0))
            .arg("last_accessed_ms")
            .arg(now_ms)
            .ignore()
            .cmd("HSETNX")
            .arg(&redis_key)
            .arg("created_at_ms")
            .arg(now_ms)
            .ignore()
            .cmd("HINCRBY")
            .arg(&redis_key)
            .arg("access_count")
            .arg(1)
            .ignore();
        match self.redis_ttl_ms(ttl) {
            Some(ms) => {
                pipe.cmd("PEXPIRE").arg(&redis_key).arg(ms).ignore();
            }
            None => {
                pipe.cmd("PERSIST").arg(&redis_key).ignore();
            }
        }
        pipe.cmd("HMGET")
            .arg(&redis_key)
            .arg("created_at_ms")
            .arg("access_count");

        let ((created_ms, access_count),): ((u64, u64),) =
            pipe.query_async(&mut *conn).await.map_err(backend)?;

        Ok(CacheEntry {
            key: *key,
            size_bytes: payload.len(),
            payload,
            created_at: from_unix_millis(created_ms),
            expires_at,
            last_accessed_at: now,
            access_count,
            is_stale: false,
        })
    }

    async fn insert_if_absent(
        &self,
        key: &CacheKey,
        payload: Bytes,
        ttl: Option<Duration>,
    ) -> Result<Insertion> {
        let mut conn = self.get_connection().await?;
        let now = SystemTime::now();
        let (codec, encoded) = self.compressor.encode(&payload)?;

        let reply: Vec<Vec<u8>> = self
            .insert_script
            .key(self.entry_key(key))
            .arg(unix_millis(now))
            .arg(encoded.as_ref())
            .arg(codec.as_str())
            .arg(payload.len())
            .arg(expiry_from(now, ttl).map(unix_millis).unwrap_or(0))
            .arg(self.redis_ttl_ms(ttl).unwrap_or(0))
            .invoke_async(&mut *conn)
            .await
            .map_err(backend)?;

        let (tag, fields) = split_tagged(reply)?;
        let entry = decode_entry(*key, fields)?;
        match tag.as_slice() {
            b"inserted" => Ok(Insertion::Inserted(entry)),
            b"existing" => Ok(Insertion::Existing(entry)),
            other => Err(CacheError::Deserialization(format!(
                "unexpected insert reply tag {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    async fn touch(&self, key: &CacheKey) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let touched: i64 = self
            .touch_script
            .key(self.entry_key(key))
            .arg(unix_millis(SystemTime::now()))
            .invoke_async(&mut *conn)
            .await
            .map_err(backend)?;
        Ok(touched == 1)
    }

    async fn expire_older_than(&self, category: Category, instant: SystemTime) -> Result<u64> {
        let mut conn = self.get_connection().await?;
        let pattern = self.category_pattern(category);
        let cutoff = unix_millis(instant);
        let mut removed = 0u64;
        let mut cursor = 0u64;

        loop {
            let (next, keys) = Self::scan_batch(&mut conn, cursor, &pattern).await?;
            if !keys.is_empty() {
                let mut pipe = redis::pipe();
                for key in &keys {
                    pipe.cmd("HGET").arg(key).arg("expires_at_ms");
                }
                let expiries: Vec<Option<u64>> =
                    pipe.query_async(&mut *conn).await.map_err(backend)?;

                let doomed: Vec<&String> = keys
                    .iter()
                    .zip(expiries)
                    .filter(|(_, exp)| matches!(exp, Some(ms) if *ms > 0 && *ms <= cutoff))
                    .map(|(key, _)| key)
                    .collect();
                if !doomed.is_empty() {
                    let count: u64 = redis::cmd("UNLINK")
                        .arg(&doomed)
                        .query_async(&mut *conn)
                        .await
                        .map_err(backend)?;
                    removed += count;
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        if removed > 0 {
            tracing::debug!(category = %category, removed, "expired durable entries");
        }
        Ok(removed)
    }

    async fn purge(&self, key: &CacheKey) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let deleted: u64 = redis::cmd("DEL")
            .arg(self.entry_key(key))
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;
        Ok(deleted > 0)
    }

    async fn category_stats(&self, category: Category) -> Result<DurableCategoryStats> {
        let mut conn = self.get_connection().await?;
        let pattern = self.category_pattern(category);
        let mut stats = DurableCategoryStats::default();
        let mut cursor = 0u64;

        loop {
            let (next, keys) = Self::scan_batch(&mut conn, cursor, &pattern).await?;
            if !keys.is_empty() {
                let mut pipe = redis::pipe();
                for key in &keys {
                    pipe.cmd("HMGET").arg(key).arg("size").arg("created_at_ms");
                }
                let rows: Vec<(Option<u64>, Option<u64>)> =
                    pipe.query_async(&mut *conn).await.map_err(backend)?;
                for (size, created_ms) in rows {
                    // Keys can vanish between SCAN and HMGET.
                    if let (Some(size), Some(created_ms)) = (size, created_ms) {
                        stats.observe_raw(size, from_unix_millis(created_ms));
                    }
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(stats)
    }
}
