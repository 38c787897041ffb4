//! Event producer.
//!
//! Publishing happens after the database transaction commits and is never
//! retried. A failed publish leaves the cache stale until TTL expiry or the
//! next read-through; it never undoes the mutation.

use folio_core::{AssetEvent, EventLogError, FolioResult, TeamEvent, Topic};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::log::{EventLog, LogPosition};

/// Publish counters.
#[derive(Debug, Default)]
pub struct PublisherMetrics {
    pub published: AtomicU64,
    pub failed: AtomicU64,
}

impl PublisherMetrics {
    pub fn snapshot(&self) -> PublisherSnapshot {
        PublisherSnapshot {
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherSnapshot {
    pub published: u64,
    pub failed: u64,
}

/// Appends team and asset events to their topics.
#[derive(Clone)]
pub struct EventPublisher {
    log: Arc<dyn EventLog>,
    metrics: Arc<PublisherMetrics>,
}

impl EventPublisher {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self {
            log,
            metrics: Arc::new(PublisherMetrics::default()),
        }
    }

    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    pub fn metrics(&self) -> PublisherSnapshot {
        self.metrics.snapshot()
    }

    /// Append to `team.activity`, keyed by team id.
    pub async fn publish_team_event(&self, event: &TeamEvent) -> FolioResult<LogPosition> {
        self.publish(Topic::TeamActivity, &event.partition_key(), event)
            .await
    }

    /// Append to `asset.changes`, keyed by asset id.
    pub async fn publish_asset_event(&self, event: &AssetEvent) -> FolioResult<LogPosition> {
        self.publish(Topic::AssetChanges, &event.partition_key(), event)
            .await
    }

    /// Publish and log any failure. For use after a commit, where the caller
    /// has nothing left to roll back.
    pub async fn publish_team_event_best_effort(&self, event: &TeamEvent) -> Option<LogPosition> {
        match self.publish_team_event(event).await {
            Ok(position) => Some(position),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    event_type = ?event.event_type,
                    team_id = event.team_id,
                    "Failed to publish team event"
                );
                None
            }
        }
    }

    pub async fn publish_asset_event_best_effort(&self, event: &AssetEvent) -> Option<LogPosition> {
        match self.publish_asset_event(event).await {
            Ok(position) => Some(position),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    event_type = ?event.event_type,
                    asset_id = %event.asset_id,
                    "Failed to publish asset event"
                );
                None
            }
        }
    }

    async fn publish<E: Serialize + Sync>(
        &self,
        topic: Topic,
        key: &str,
        event: &E,
    ) -> FolioResult<LogPosition> {
        let payload = serde_json::to_vec(event).map_err(|e| EventLogError::Encode {
            reason: e.to_string(),
        })?;

        match self.log.append(topic, key, payload).await {
            Ok(position) => {
                self.metrics.published.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    topic = %topic,
                    key = %key,
                    partition = position.partition,
                    offset = position.offset,
                    "Event published"
                );
                Ok(position)
            }
            Err(e) => {
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}
