//! FOLIO cache store client.
//!
//! The cache is a disposable projection of the relational store. It holds
//! three kinds of entry, all with a TTL:
//!
//! - team membership sets
//! - folder/note metadata snapshots
//! - per-asset ACL maps
//!
//! [`CacheStore`] is the backend seam ([`InMemoryCacheStore`],
//! [`RedisCacheStore`]); [`CacheClient`] is the typed handle the rest of the
//! workspace uses. Callers decide how to degrade when the cache fails.

pub mod client;
pub mod config;
pub mod freshness;
pub mod keys;
pub mod memory;
pub mod redis_backend;
pub mod traits;

pub use client::CacheClient;
pub use config::{CacheConfig, DEFAULT_CACHE_TTL_SECS};
pub use freshness::CacheRead;
pub use keys::{CacheKey, KeyNamespace};
pub use memory::InMemoryCacheStore;
pub use redis_backend::{RedisCacheStore, RedisConfig, DEFAULT_REDIS_URL};
pub use traits::{CacheStats, CacheStore};
