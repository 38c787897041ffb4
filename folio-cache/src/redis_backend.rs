//! Redis-backed cache store.
//!
//! Blobs map to Redis strings with `SET EX`, membership sets to Redis sets and
//! ACL maps to Redis hashes. Multi-command writes run as atomic pipelines; the
//! conditional member add is a small Lua script so that an expired or missing
//! set is never recreated with a single member.
//!
//! The connection is a `redis::aio::ConnectionManager`, which reconnects on
//! its own. Connection failures surface as `CacheError::Unavailable` so callers
//! can fall back to the source of truth.

use async_trait::async_trait;
use folio_core::{CacheError, FolioError, FolioResult};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::keys::CacheKey;
use crate::traits::{CacheStats, CacheStore, StatsRecorder};

/// Default Redis URL.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

const SADD_IF_PRESENT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    redis.call('SADD', KEYS[1], ARGV[2])
    redis.call('EXPIRE', KEYS[1], ARGV[1])
    return 1
end
return 0
"#;

/// Redis connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

impl RedisConfig {
    /// Create RedisConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FOLIO_REDIS_URL`: connection URL (default: `redis://127.0.0.1:6379`)
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("FOLIO_REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
        }
    }
}

/// Cache store backed by Redis.
#[derive(Clone)]
pub struct RedisCacheStore {
    conn: ConnectionManager,
    sadd_if_present: Arc<Script>,
    stats: Arc<StatsRecorder>,
}

impl RedisCacheStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Unavailable` if the URL is invalid or the first
    /// connection cannot be established.
    pub async fn connect(config: &RedisConfig) -> FolioResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| CacheError::Unavailable {
            reason: format!("Failed to create Redis client: {}", e),
        })?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Unavailable {
                reason: format!("Failed to connect to Redis: {}", e),
            })?;

        tracing::debug!(url = %config.url, "Redis cache store initialized");

        Ok(Self {
            conn,
            sadd_if_present: Arc::new(Script::new(SADD_IF_PRESENT)),
            stats: Arc::new(StatsRecorder::default()),
        })
    }

    fn fail(&self, operation: &'static str, key: &CacheKey, e: RedisError) -> FolioError {
        self.stats.record_error();
        if e.is_connection_refusal() || e.is_io_error() || e.is_timeout() || e.is_connection_dropped()
        {
            CacheError::Unavailable {
                reason: format!("{} {}: {}", operation, key, e),
            }
            .into()
        } else {
            CacheError::Command {
                operation,
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        }
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &CacheKey) -> FolioResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn
            .get(key.as_str())
            .await
            .map_err(|e| self.fail("GET", key, e))?;
        self.stats.record_lookup(value.is_some());
        Ok(value)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> FolioResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key.as_str(), value, ttl_secs(ttl))
            .await
            .map_err(|e| self.fail("SET", key, e))?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> FolioResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .del(key.as_str())
            .await
            .map_err(|e| self.fail("DEL", key, e))?;
        Ok(removed > 0)
    }

    async fn set_add(&self, key: &CacheKey, members: &[String], ttl: Duration) -> FolioResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .sadd(key.as_str(), members)
            .ignore()
            .expire(key.as_str(), ttl_secs(ttl) as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| self.fail("SADD", key, e))?;
        Ok(())
    }

    async fn set_add_if_present(
        &self,
        key: &CacheKey,
        member: &str,
        ttl: Duration,
    ) -> FolioResult<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = self
            .sadd_if_present
            .key(key.as_str())
            .arg(ttl_secs(ttl))
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| self.fail("SADD", key, e))?;
        Ok(added == 1)
    }

    async fn set_remove(&self, key: &CacheKey, member: &str) -> FolioResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .srem(key.as_str(), member)
            .await
            .map_err(|e| self.fail("SREM", key, e))?;
        Ok(())
    }

    async fn set_members(&self, key: &CacheKey) -> FolioResult<Option<Vec<String>>> {
        let mut conn = self.conn.clone();
        let mut members: Vec<String> = conn
            .smembers(key.as_str())
            .await
            .map_err(|e| self.fail("SMEMBERS", key, e))?;
        self.stats.record_lookup(!members.is_empty());
        if members.is_empty() {
            return Ok(None);
        }
        members.sort();
        Ok(Some(members))
    }

    async fn set_replace(
        &self,
        key: &CacheKey,
        members: &[String],
        ttl: Duration,
    ) -> FolioResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().del(key.as_str()).ignore();
        if !members.is_empty() {
            pipe.sadd(key.as_str(), members)
                .ignore()
                .expire(key.as_str(), ttl_secs(ttl) as i64)
                .ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| self.fail("SADD", key, e))?;
        Ok(())
    }

    async fn map_upsert(
        &self,
        key: &CacheKey,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> FolioResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().hset(key.as_str(), field, value).ignore();
        if let Some(ttl) = ttl {
            pipe.expire(key.as_str(), ttl_secs(ttl) as i64).ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| self.fail("HSET", key, e))?;
        Ok(())
    }

    async fn map_remove(&self, key: &CacheKey, field: &str) -> FolioResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .hdel(key.as_str(), field)
            .await
            .map_err(|e| self.fail("HDEL", key, e))?;
        Ok(())
    }

    async fn map_get(&self, key: &CacheKey, field: &str) -> FolioResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .hget(key.as_str(), field)
            .await
            .map_err(|e| self.fail("HGET", key, e))?;
        self.stats.record_lookup(value.is_some());
        Ok(value)
    }

    async fn map_get_all(&self, key: &CacheKey) -> FolioResult<Option<BTreeMap<String, String>>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn
            .hgetall(key.as_str())
            .await
            .map_err(|e| self.fail("HGETALL", key, e))?;
        self.stats.record_lookup(!map.is_empty());
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(map.into_iter().collect()))
    }

    async fn stats(&self) -> FolioResult<CacheStats> {
        let mut conn = self.conn.clone();
        let entry_count: u64 = redis::cmd("DBSIZE")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                self.stats.record_error();
                CacheError::Unavailable {
                    reason: format!("DBSIZE: {}", e),
                }
            })?;
        Ok(self.stats.snapshot(entry_count))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(all(test, feature = "redis-tests"))]
mod tests {
    use super::*;
    use folio_core::AssetKind;
    use uuid::Uuid;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    async fn connect() -> RedisCacheStore {
        RedisCacheStore::connect(&RedisConfig::from_env())
            .await
            .expect("Redis should be reachable for redis-tests")
    }

    #[tokio::test]
    async fn test_blob_roundtrip_against_redis() {
        let store = connect().await;
        let key = CacheKey::asset_metadata(AssetKind::Note, Uuid::now_v7());

        store.set(&key, b"{\"id\":1}".to_vec(), DAY).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"{\"id\":1}".to_vec()));
        assert!(store.delete(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_conditional_member_add_against_redis() {
        let store = connect().await;
        let key = CacheKey::team_members(i64::from(rand_team()));

        assert!(!store.set_add_if_present(&key, "u2", DAY).await.unwrap());
        store
            .set_replace(&key, &["u1".to_string()], DAY)
            .await
            .unwrap();
        assert!(store.set_add_if_present(&key, "u2", DAY).await.unwrap());
        assert_eq!(
            store.set_members(&key).await.unwrap(),
            Some(vec!["u1".to_string(), "u2".to_string()])
        );
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_acl_hash_against_redis() {
        let store = connect().await;
        let key = CacheKey::asset_acl(Uuid::now_v7());

        store.map_upsert(&key, "u3", "read", Some(DAY)).await.unwrap();
        store.map_upsert(&key, "u3", "write", Some(DAY)).await.unwrap();
        assert_eq!(
            store.map_get(&key, "u3").await.unwrap(),
            Some("write".to_string())
        );
        store.map_remove(&key, "u3").await.unwrap();
        assert_eq!(store.map_get_all(&key).await.unwrap(), None);
    }

    fn rand_team() -> u32 {
        Uuid::now_v7().as_u128() as u32
    }
}
