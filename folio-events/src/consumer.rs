//! Cache-updating event consumers.
//!
//! One [`TopicConsumer`] per topic, each an independent tokio task. A
//! consumer reads every partition from its group's committed offset, hands
//! each record to the [`EventHandler`] and commits `offset + 1` once the
//! record has been handled. Records that fail to decode or apply are logged
//! and committed anyway; self-healing is TTL expiry and read-through.
//!
//! Each running consumer also applies retention to its topic on a slower
//! interval, see [`compact`](crate::log::compact).
//!
//! # Usage
//!
//! ```ignore
//! use folio_events::{spawn_cache_consumers, CacheEventHandler, ConsumerConfig};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let consumers = spawn_cache_consumers(log, Arc::new(handler), ConsumerConfig::from_env(), shutdown_rx);
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = consumers.join().await;
//! ```

use folio_core::Topic;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::dispatch::{EventHandler, HandlerError};
use crate::log::{compact, EventLog, LogRecord};

pub const DEFAULT_CONSUMER_GROUP: &str = "cache-updater";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_COMPACTION_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_RETAINED: u64 = 100_000;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Base consumer group; each topic gets `{group}-{suffix}`.
    pub group: String,

    /// Wait between polls that find nothing (default: 500ms)
    pub poll_interval: Duration,

    /// Max records read per partition per poll (default: 100)
    pub batch_size: usize,

    /// Wait between retention passes (default: 60s)
    pub compaction_interval: Duration,

    /// Records kept behind the head of each partition regardless of
    /// uncommitted groups (default: 100000)
    pub max_retained: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_CONSUMER_GROUP.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            batch_size: DEFAULT_BATCH_SIZE,
            compaction_interval: Duration::from_secs(DEFAULT_COMPACTION_INTERVAL_SECS),
            max_retained: DEFAULT_MAX_RETAINED,
        }
    }
}

impl ConsumerConfig {
    /// Create ConsumerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FOLIO_CONSUMER_GROUP`: Base consumer group (default: cache-updater)
    /// - `FOLIO_CONSUMER_POLL_INTERVAL_MS`: Idle poll interval (default: 500)
    /// - `FOLIO_CONSUMER_BATCH_SIZE`: Records per partition per poll (default: 100)
    /// - `FOLIO_CONSUMER_COMPACTION_INTERVAL_SECS`: Retention interval (default: 60)
    /// - `FOLIO_CONSUMER_MAX_RETAINED`: Records kept per partition (default: 100000)
    pub fn from_env() -> Self {
        let group = std::env::var("FOLIO_CONSUMER_GROUP")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string());

        let poll_interval = Duration::from_millis(
            std::env::var("FOLIO_CONSUMER_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        );

        let batch_size = std::env::var("FOLIO_CONSUMER_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE);

        let compaction_interval = Duration::from_secs(
            std::env::var("FOLIO_CONSUMER_COMPACTION_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u64| *n > 0)
                .unwrap_or(DEFAULT_COMPACTION_INTERVAL_SECS),
        );

        let max_retained = std::env::var("FOLIO_CONSUMER_MAX_RETAINED")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETAINED);

        Self {
            group,
            poll_interval,
            batch_size,
            compaction_interval,
            max_retained,
        }
    }

    /// Short intervals for tests.
    pub fn development() -> Self {
        Self {
            group: DEFAULT_CONSUMER_GROUP.to_string(),
            poll_interval: Duration::from_millis(10),
            batch_size: 10,
            compaction_interval: Duration::from_millis(50),
            max_retained: 1_000,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Consumer group name for one topic.
    pub fn group_for(&self, topic: Topic) -> String {
        format!("{}-{}", self.group, topic.group_suffix())
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    pub polls: AtomicU64,
    pub records_applied: AtomicU64,
    pub decode_failures: AtomicU64,
    pub handler_failures: AtomicU64,
    pub commits: AtomicU64,
    pub commit_failures: AtomicU64,
    pub poll_errors: AtomicU64,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            records_applied: self.records_applied.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumerSnapshot {
    pub polls: u64,
    pub records_applied: u64,
    pub decode_failures: u64,
    pub handler_failures: u64,
    pub commits: u64,
    pub commit_failures: u64,
    pub poll_errors: u64,
}

// ============================================================================
// TOPIC CONSUMER
// ============================================================================

/// Reads one topic for one consumer group.
pub struct TopicConsumer {
    log: Arc<dyn EventLog>,
    handler: Arc<dyn EventHandler>,
    topic: Topic,
    group: String,
    batch_size: usize,
    poll_interval: Duration,
    compaction_interval: Duration,
    max_retained: u64,
    metrics: Arc<ConsumerMetrics>,
}

impl TopicConsumer {
    pub fn new(
        log: Arc<dyn EventLog>,
        handler: Arc<dyn EventHandler>,
        topic: Topic,
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            log,
            handler,
            topic,
            group: config.group_for(topic),
            batch_size: config.batch_size.max(1),
            poll_interval: config.poll_interval,
            compaction_interval: config.compaction_interval,
            max_retained: config.max_retained,
            metrics: Arc::new(ConsumerMetrics::new()),
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn metrics(&self) -> Arc<ConsumerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// One pass over every partition. Returns how many records were
    /// processed (applied or skipped).
    pub async fn poll_once(&self) -> usize {
        self.poll(None).await
    }

    /// Like [`poll_once`](Self::poll_once), but stops before the next record
    /// once `shutdown` reads `true`. Everything processed so far is committed.
    async fn poll(&self, shutdown: Option<&watch::Receiver<bool>>) -> usize {
        let stopping = || shutdown.is_some_and(|rx| *rx.borrow());
        self.metrics.polls.fetch_add(1, Ordering::Relaxed);
        let mut processed = 0;

        for partition in 0..self.log.partition_count() {
            if stopping() {
                break;
            }
            let from = match self
                .log
                .committed_offset(&self.group, self.topic, partition)
                .await
            {
                Ok(offset) => offset.unwrap_or(0),
                Err(e) => {
                    tracing::error!(error = %e, topic = %self.topic, partition, "Failed to load committed offset");
                    self.metrics.poll_errors.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            let records = match self
                .log
                .read(self.topic, partition, from, self.batch_size)
                .await
            {
                Ok(records) => records,
                Err(e) => {
                    tracing::error!(error = %e, topic = %self.topic, partition, offset = from, "Failed to read partition");
                    self.metrics.poll_errors.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            for record in records {
                if stopping() {
                    return processed;
                }
                self.process(&record).await;
                processed += 1;

                if let Err(e) = self
                    .log
                    .commit(&self.group, self.topic, partition, record.offset + 1)
                    .await
                {
                    // Stop this partition; the record is redelivered next poll.
                    tracing::error!(
                        error = %e,
                        topic = %self.topic,
                        partition,
                        offset = record.offset,
                        "Failed to commit offset"
                    );
                    self.metrics.commit_failures.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                self.metrics.commits.fetch_add(1, Ordering::Relaxed);
            }
        }

        processed
    }

    async fn process(&self, record: &LogRecord) {
        match self.handler.handle(self.topic, &record.payload).await {
            Ok(action) => {
                self.metrics.records_applied.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    topic = %self.topic,
                    partition = record.partition,
                    offset = record.offset,
                    action = ?action,
                    "Event applied"
                );
            }
            Err(HandlerError::Decode(reason)) => {
                self.metrics.decode_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    topic = %self.topic,
                    partition = record.partition,
                    offset = record.offset,
                    key = %record.key,
                    reason = %reason,
                    "Skipping undecodable event"
                );
            }
            Err(e) => {
                self.metrics.handler_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    topic = %self.topic,
                    partition = record.partition,
                    offset = record.offset,
                    key = %record.key,
                    "Skipping event that could not be applied"
                );
            }
        }
    }

    /// Apply retention to this consumer's topic.
    pub async fn compact(&self) {
        match compact(self.log.as_ref(), self.topic, self.max_retained).await {
            Ok(0) => {}
            Ok(removed) => {
                tracing::debug!(topic = %self.topic, removed, "Event log compacted");
            }
            Err(e) => {
                tracing::warn!(error = %e, topic = %self.topic, "Event log compaction failed");
            }
        }
    }

    /// Poll until the shutdown signal flips to `true` or its sender is
    /// dropped. The record in hand is finished and committed; the rest of a
    /// backlog is left for the next start.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Arc<ConsumerMetrics> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut compaction = interval(self.compaction_interval);
        compaction.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            topic = %self.topic,
            group = %self.group,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            max_retained = self.max_retained,
            "Event consumer started"
        );

        if !*shutdown_rx.borrow() {
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            tracing::info!(topic = %self.topic, "Event consumer shutting down");
                            break;
                        }
                    }

                    _ = ticker.tick() => {
                        // Drain without waiting while there is a backlog.
                        while self.poll(Some(&shutdown_rx)).await >= self.batch_size {}
                    }

                    _ = compaction.tick() => {
                        self.compact().await;
                    }
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            topic = %self.topic,
            group = %self.group,
            polls = snapshot.polls,
            records_applied = snapshot.records_applied,
            decode_failures = snapshot.decode_failures,
            handler_failures = snapshot.handler_failures,
            commits = snapshot.commits,
            commit_failures = snapshot.commit_failures,
            poll_errors = snapshot.poll_errors,
            "Event consumer stopped"
        );

        self.metrics
    }
}

// ============================================================================
// SPAWNING
// ============================================================================

/// Handles of the two running consumer tasks.
pub struct CacheConsumers {
    pub team: JoinHandle<Arc<ConsumerMetrics>>,
    pub asset: JoinHandle<Arc<ConsumerMetrics>>,
    team_metrics: Arc<ConsumerMetrics>,
    asset_metrics: Arc<ConsumerMetrics>,
}

impl CacheConsumers {
    /// Live counters of each running consumer, by topic.
    pub fn metrics(&self) -> [(Topic, Arc<ConsumerMetrics>); 2] {
        [
            (Topic::TeamActivity, Arc::clone(&self.team_metrics)),
            (Topic::AssetChanges, Arc::clone(&self.asset_metrics)),
        ]
    }

    /// Wait for both tasks. A task that panicked reports `None`.
    pub async fn join(self) -> (Option<ConsumerSnapshot>, Option<ConsumerSnapshot>) {
        let team = match self.team.await {
            Ok(metrics) => Some(metrics.snapshot()),
            Err(e) => {
                tracing::error!(error = %e, "Team consumer task failed");
                None
            }
        };
        let asset = match self.asset.await {
            Ok(metrics) => Some(metrics.snapshot()),
            Err(e) => {
                tracing::error!(error = %e, "Asset consumer task failed");
                None
            }
        };
        (team, asset)
    }
}

/// Start one consumer task per topic so neither topic blocks the other.
pub fn spawn_cache_consumers(
    log: Arc<dyn EventLog>,
    handler: Arc<dyn EventHandler>,
    config: ConsumerConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> CacheConsumers {
    let team = TopicConsumer::new(Arc::clone(&log), Arc::clone(&handler), Topic::TeamActivity, &config);
    let asset = TopicConsumer::new(log, handler, Topic::AssetChanges, &config);
    let (team_metrics, asset_metrics) = (team.metrics(), asset.metrics());

    CacheConsumers {
        team: tokio::spawn(team.run(shutdown_rx.clone())),
        asset: tokio::spawn(asset.run(shutdown_rx)),
        team_metrics,
        asset_metrics,
    }
}

// ============================================================================
// TESTS
// ============================================================================
