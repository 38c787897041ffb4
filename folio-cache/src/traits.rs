//! Cache store trait and statistics.
//!
//! The store is a disposable projection of the relational store. Every
//! operation here is idempotent on its own; none is transactional across
//! keys.

use async_trait::async_trait;
use folio_core::FolioResult;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::keys::CacheKey;

/// Key-value cache backend holding blobs, sets and maps.
///
/// Implementations are shared as `Arc<dyn CacheStore>` between request
/// handlers and event consumers and must tolerate concurrent use.
///
/// Expired entries are indistinguishable from missing ones.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a blob.
    async fn get(&self, key: &CacheKey) -> FolioResult<Option<Vec<u8>>>;

    /// Overwrite a blob with a fresh TTL.
    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> FolioResult<()>;

    /// Delete a key of any type. Returns whether anything was removed.
    async fn delete(&self, key: &CacheKey) -> FolioResult<bool>;

    /// Add members to a set, creating it if needed, and refresh its TTL.
    async fn set_add(&self, key: &CacheKey, members: &[String], ttl: Duration) -> FolioResult<()>;

    /// Add one member only if the set already exists, refreshing its TTL.
    ///
    /// Returns `false` (and writes nothing) when the set is absent.
    async fn set_add_if_present(
        &self,
        key: &CacheKey,
        member: &str,
        ttl: Duration,
    ) -> FolioResult<bool>;

    /// Remove one member. Removing the last member removes the key.
    async fn set_remove(&self, key: &CacheKey, member: &str) -> FolioResult<()>;

    /// All members, or `None` when the set is absent.
    async fn set_members(&self, key: &CacheKey) -> FolioResult<Option<Vec<String>>>;

    /// Replace the whole set and its TTL in one step.
    ///
    /// An empty `members` slice leaves the key absent.
    async fn set_replace(
        &self,
        key: &CacheKey,
        members: &[String],
        ttl: Duration,
    ) -> FolioResult<()>;

    /// Upsert one map field. `Some(ttl)` refreshes the map's TTL.
    async fn map_upsert(
        &self,
        key: &CacheKey,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> FolioResult<()>;

    /// Remove one map field. Removing the last field removes the key.
    async fn map_remove(&self, key: &CacheKey, field: &str) -> FolioResult<()>;

    /// One map field.
    async fn map_get(&self, key: &CacheKey, field: &str) -> FolioResult<Option<String>>;

    /// The whole map, or `None` when absent.
    async fn map_get_all(&self, key: &CacheKey) -> FolioResult<Option<BTreeMap<String, String>>>;

    /// Get cache statistics.
    async fn stats(&self) -> FolioResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that found a live entry.
    pub hits: u64,
    /// Number of reads that found nothing.
    pub misses: u64,
    /// Number of live keys, where the backend can report it.
    pub entry_count: u64,
    /// Number of backend commands that failed.
    pub errors: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Atomic counters behind [`CacheStats`], shared by the backends.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_lookup(&self, found: bool) {
        if found {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entry_count: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
