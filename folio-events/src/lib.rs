//! FOLIO event log, producer and cache-updating consumers.
//!
//! Mutating handlers publish [`TeamEvent`](folio_core::TeamEvent)s and
//! [`AssetEvent`](folio_core::AssetEvent)s through an [`EventPublisher`]
//! once their transaction commits. A [`TopicConsumer`] per topic follows the
//! log and applies each event to the cache through [`CacheEventHandler`].
//!
//! Two [`EventLog`] backings share one interface: [`InMemoryEventLog`] for
//! tests and single-process use, [`LmdbEventLog`] when a separate consumer
//! process follows the API process.

pub mod consumer;
pub mod dispatch;
pub mod lmdb;
pub mod log;
pub mod memory;
pub mod producer;

pub use consumer::{
    spawn_cache_consumers, CacheConsumers, ConsumerConfig, ConsumerMetrics, ConsumerSnapshot,
    TopicConsumer, DEFAULT_BATCH_SIZE, DEFAULT_COMPACTION_INTERVAL_SECS, DEFAULT_CONSUMER_GROUP,
    DEFAULT_MAX_RETAINED, DEFAULT_POLL_INTERVAL_MS,
};
pub use dispatch::{CacheAction, CacheEventHandler, EventHandler, HandlerError};
pub use lmdb::{EventLogConfig, LmdbEventLog};
pub use log::{
    compact, consumer_lag, partition_for, wait_for_drain, EventLog, LogPosition, LogRecord,
    DEFAULT_PARTITIONS,
};
pub use memory::InMemoryEventLog;
pub use producer::{EventPublisher, PublisherMetrics, PublisherSnapshot};
