//! In-process cache store.
//!
//! Used by tests and single-instance deployments. Deadlines are measured on
//! `tokio::time::Instant`, so tests can advance time with a paused clock.
//! Expired entries are treated as absent on read and dropped lazily.

use async_trait::async_trait;
use folio_core::{CacheError, FolioResult};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::keys::CacheKey;
use crate::traits::{CacheStats, CacheStore, StatsRecorder};

#[derive(Debug, Clone)]
enum Value {
    Blob(Vec<u8>),
    Set(BTreeSet<String>),
    Map(BTreeMap<String, String>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Blob(_) => "string",
            Value::Set(_) => "set",
            Value::Map(_) => "hash",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// Cache store backed by a `HashMap` behind a tokio `RwLock`.
#[derive(Clone, Default)]
pub struct InMemoryCacheStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    stats: Arc<StatsRecorder>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Remaining TTL of a live key, `None` if absent or without expiry.
    pub async fn ttl(&self, key: &CacheKey) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries
            .get(key.as_str())
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn wrong_type(&self, operation: &'static str, key: &CacheKey, found: &Value) -> CacheError {
        self.stats.record_error();
        CacheError::Command {
            operation,
            key: key.to_string(),
            reason: format!("WRONGTYPE key holds a {}", found.type_name()),
        }
    }

    /// Read a live entry, dropping it if it has expired.
    async fn live_entry(&self, key: &CacheKey) -> Option<Entry> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key.as_str()) {
                Some(entry) if entry.is_live(now) => return Some(entry.clone()),
                None => return None,
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().await;
        if entries
            .get(key.as_str())
            .is_some_and(|entry| !entry.is_live(now))
        {
            entries.remove(key.as_str());
        }
        None
    }
}

fn deadline(ttl: Duration) -> Option<Instant> {
    Some(Instant::now() + ttl)
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> FolioResult<Option<Vec<u8>>> {
        let value = match self.live_entry(key).await {
            Some(Entry {
                value: Value::Blob(bytes),
                ..
            }) => Some(bytes),
            Some(Entry { value, .. }) => return Err(self.wrong_type("GET", key, &value).into()),
            None => None,
        };
        self.stats.record_lookup(value.is_some());
        Ok(value)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> FolioResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.as_str().to_string(),
            Entry {
                value: Value::Blob(value),
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> FolioResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        Ok(entries
            .remove(key.as_str())
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn set_add(&self, key: &CacheKey, members: &[String], ttl: Duration) -> FolioResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(key.as_str().to_string())
            .or_insert_with(|| Entry {
                value: Value::Set(BTreeSet::new()),
                expires_at: None,
            });
        if !entry.is_live(now) {
            entry.value = Value::Set(BTreeSet::new());
        }
        match &mut entry.value {
            Value::Set(set) => set.extend(members.iter().cloned()),
            other => {
                let other = other.clone();
                return Err(self.wrong_type("SADD", key, &other).into());
            }
        }
        entry.expires_at = deadline(ttl);
        Ok(())
    }

    async fn set_add_if_present(
        &self,
        key: &CacheKey,
        member: &str,
        ttl: Duration,
    ) -> FolioResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let Some(entry) = entries
            .get_mut(key.as_str())
            .filter(|entry| entry.is_live(now))
        else {
            return Ok(false);
        };
        match &mut entry.value {
            Value::Set(set) => {
                set.insert(member.to_string());
            }
            other => {
                let other = other.clone();
                return Err(self.wrong_type("SADD", key, &other).into());
            }
        }
        entry.expires_at = deadline(ttl);
        Ok(true)
    }

    async fn set_remove(&self, key: &CacheKey, member: &str) -> FolioResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let now_empty = match entries.get_mut(key.as_str()) {
            Some(entry) if entry.is_live(now) => match &mut entry.value {
                Value::Set(set) => {
                    set.remove(member);
                    set.is_empty()
                }
                other => {
                    let other = other.clone();
                    return Err(self.wrong_type("SREM", key, &other).into());
                }
            },
            _ => false,
        };
        if now_empty {
            entries.remove(key.as_str());
        }
        Ok(())
    }

    async fn set_members(&self, key: &CacheKey) -> FolioResult<Option<Vec<String>>> {
        let members = match self.live_entry(key).await {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Some(set.into_iter().collect::<Vec<_>>()),
            Some(Entry { value, .. }) => {
                return Err(self.wrong_type("SMEMBERS", key, &value).into())
            }
            None => None,
        };
        self.stats.record_lookup(members.is_some());
        Ok(members)
    }

    async fn set_replace(
        &self,
        key: &CacheKey,
        members: &[String],
        ttl: Duration,
    ) -> FolioResult<()> {
        let mut entries = self.entries.write().await;
        if members.is_empty() {
            entries.remove(key.as_str());
            return Ok(());
        }
        entries.insert(
            key.as_str().to_string(),
            Entry {
                value: Value::Set(members.iter().cloned().collect()),
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn map_upsert(
        &self,
        key: &CacheKey,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> FolioResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(key.as_str().to_string())
            .or_insert_with(|| Entry {
                value: Value::Map(BTreeMap::new()),
                expires_at: None,
            });
        if !entry.is_live(now) {
            entry.value = Value::Map(BTreeMap::new());
            entry.expires_at = None;
        }
        match &mut entry.value {
            Value::Map(map) => {
                map.insert(field.to_string(), value.to_string());
            }
            other => {
                let other = other.clone();
                return Err(self.wrong_type("HSET", key, &other).into());
            }
        }
        if let Some(ttl) = ttl {
            entry.expires_at = deadline(ttl);
        }
        Ok(())
    }

    async fn map_remove(&self, key: &CacheKey, field: &str) -> FolioResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let now_empty = match entries.get_mut(key.as_str()) {
            Some(entry) if entry.is_live(now) => match &mut entry.value {
                Value::Map(map) => {
                    map.remove(field);
                    map.is_empty()
                }
                other => {
                    let other = other.clone();
                    return Err(self.wrong_type("HDEL", key, &other).into());
                }
            },
            _ => false,
        };
        if now_empty {
            entries.remove(key.as_str());
        }
        Ok(())
    }

    async fn map_get(&self, key: &CacheKey, field: &str) -> FolioResult<Option<String>> {
        let value = match self.live_entry(key).await {
            Some(Entry {
                value: Value::Map(map),
                ..
            }) => map.get(field).cloned(),
            Some(Entry { value, .. }) => return Err(self.wrong_type("HGET", key, &value).into()),
            None => None,
        };
        self.stats.record_lookup(value.is_some());
        Ok(value)
    }

    async fn map_get_all(&self, key: &CacheKey) -> FolioResult<Option<BTreeMap<String, String>>> {
        let map = match self.live_entry(key).await {
            Some(Entry {
                value: Value::Map(map),
                ..
            }) => Some(map),
            Some(Entry { value, .. }) => {
                return Err(self.wrong_type("HGETALL", key, &value).into())
            }
            None => None,
        };
        self.stats.record_lookup(map.is_some());
        Ok(map)
    }

    async fn stats(&self) -> FolioResult<CacheStats> {
        let live = self.len().await as u64;
        Ok(self.stats.snapshot(live))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{AssetKind, FolioError};
    use uuid::Uuid;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn members(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_blob_set_get_delete() {
        let store = InMemoryCacheStore::new();
        let key = CacheKey::asset_metadata(AssetKind::Folder, Uuid::now_v7());

        assert_eq!(store.get(&key).await.unwrap(), None);
        store.set(&key, b"{}".to_vec(), DAY).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"{}".to_vec()));

        assert!(store.delete(&key).await.unwrap());
        assert!(!store.delete(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_add_is_idempotent() {
        let store = InMemoryCacheStore::new();
        let key = CacheKey::team_members(7);

        store.set_add(&key, &members(&["u1", "u2"]), DAY).await.unwrap();
        store.set_add(&key, &members(&["u2"]), DAY).await.unwrap();

        let got = store.set_members(&key).await.unwrap().unwrap();
        assert_eq!(got, members(&["u1", "u2"]));
    }

    #[tokio::test]
    async fn test_set_add_if_present_skips_absent_set() {
        let store = InMemoryCacheStore::new();
        let key = CacheKey::team_members(7);

        assert!(!store.set_add_if_present(&key, "u2", DAY).await.unwrap());
        assert_eq!(store.set_members(&key).await.unwrap(), None);

        store.set_replace(&key, &members(&["u1"]), DAY).await.unwrap();
        assert!(store.set_add_if_present(&key, "u2", DAY).await.unwrap());
        assert_eq!(
            store.set_members(&key).await.unwrap(),
            Some(members(&["u1", "u2"]))
        );
    }

    #[tokio::test]
    async fn test_removing_last_member_removes_key() {
        let store = InMemoryCacheStore::new();
        let key = CacheKey::team_members(1);

        store.set_replace(&key, &members(&["u1"]), DAY).await.unwrap();
        store.set_remove(&key, "u1").await.unwrap();
        assert_eq!(store.set_members(&key).await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_replace_with_empty_leaves_key_absent() {
        let store = InMemoryCacheStore::new();
        let key = CacheKey::team_members(3);

        store.set_replace(&key, &members(&["u1", "u2"]), DAY).await.unwrap();
        store.set_replace(&key, &[], DAY).await.unwrap();
        assert_eq!(store.set_members(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_map_upsert_last_writer_wins() {
        let store = InMemoryCacheStore::new();
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

    #[tokio::test]
    async fn test_map_upsert_without_ttl_never_expires() {
        let store = InMemoryCacheStore::new();
        let key = CacheKey::asset_acl(Uuid::now_v7());

        store.map_upsert(&key, "u1", "read", None).await.unwrap();
        assert_eq!(store.ttl(&key).await, None);
        assert!(store.map_get(&key, "u1").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let store = InMemoryCacheStore::new();
        let blob = CacheKey::asset_metadata(AssetKind::Note, Uuid::now_v7());
        let set = CacheKey::team_members(9);

        store.set(&blob, b"x".to_vec(), DAY).await.unwrap();
        store.set_replace(&set, &members(&["u1"]), DAY).await.unwrap();

        tokio::time::advance(DAY - Duration::from_secs(1)).await;
        assert!(store.get(&blob).await.unwrap().is_some());
        assert!(store.set_members(&set).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get(&blob).await.unwrap(), None);
        assert_eq!(store.set_members(&set).await.unwrap(), None);
        assert!(!store.set_add_if_present(&set, "u2", DAY).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_add_refreshes_ttl() {
        let store = InMemoryCacheStore::new();
        let key = CacheKey::team_members(4);

        store.set_replace(&key, &members(&["u1"]), DAY).await.unwrap();
        tokio::time::advance(Duration::from_secs(3600)).await;
        store.set_add_if_present(&key, "u2", DAY).await.unwrap();

        assert_eq!(store.ttl(&key).await, Some(DAY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = InMemoryCacheStore::new();
        store
            .set(&CacheKey::team_members(1), vec![1], Duration::from_secs(5))
            .await
            .unwrap();
        store
            .set(&CacheKey::team_members(2), vec![2], Duration::from_secs(50))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let store = InMemoryCacheStore::new();
        let key = CacheKey::team_members(5);
        store.set(&key, b"blob".to_vec(), DAY).await.unwrap();

        let err = store.set_members(&key).await.unwrap_err();
        assert!(matches!(err, FolioError::Cache(CacheError::Command { .. })));
        assert_eq!(store.stats().await.unwrap().errors, 1);
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let store = InMemoryCacheStore::new();
        let key = CacheKey::team_members(6);

        store.set_members(&key).await.unwrap();
        store.set_replace(&key, &members(&["u1"]), DAY).await.unwrap();
        store.set_members(&key).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }
}
