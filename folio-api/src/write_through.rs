//! Write-through cache integration.
//!
//! After a mutation commits, the handler applies the resulting event to its
//! own cache inline and publishes it so every other process converges
//! through the consumers. Both steps are best-effort: the mutation already
//! happened and nothing here can undo it.

use folio_cache::CacheClient;
use folio_core::{AssetEvent, AssetMetadata, TeamEvent, TeamId, Topic, UserId};
use folio_events::{CacheAction, CacheEventHandler, EventPublisher, LogPosition};
use std::collections::BTreeSet;

use crate::telemetry::METRICS;

/// What happened to one event on the write path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// `None` when the inline cache mutation failed.
    pub applied: Option<CacheAction>,
    /// `None` when the publish failed.
    pub position: Option<LogPosition>,
}

impl WriteOutcome {
    pub fn is_complete(&self) -> bool {
        self.applied.is_some() && self.position.is_some()
    }
}

/// Inline cache updates plus event publication.
#[derive(Clone)]
pub struct WriteThrough {
    handler: CacheEventHandler,
    publisher: EventPublisher,
}

impl WriteThrough {
    pub fn new(handler: CacheEventHandler, publisher: EventPublisher) -> Self {
        Self { handler, publisher }
    }

    pub fn cache(&self) -> &CacheClient {
        self.handler.cache()
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub async fn team_event(&self, event: &TeamEvent) -> WriteOutcome {
        let applied = match self.handler.apply_team_event(event).await {
            Ok(action) => Some(action),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    event_type = ?event.event_type,
                    team_id = event.team_id,
                    "Inline cache update failed"
                );
                None
            }
        };
        let position = self.publisher.publish_team_event_best_effort(event).await;
        record_publish(Topic::TeamActivity, &position);
        WriteOutcome { applied, position }
    }

    pub async fn asset_event(&self, event: &AssetEvent) -> WriteOutcome {
        let applied = match self.handler.apply_asset_event(event).await {
            Ok(action) => Some(action),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    event_type = ?event.event_type,
                    asset_id = %event.asset_id,
                    "Inline cache update failed"
                );
                None
            }
        };
        let position = self.publisher.publish_asset_event_best_effort(event).await;
        record_publish(Topic::AssetChanges, &position);
        WriteOutcome { applied, position }
    }

    /// Cache a freshly created or re-read asset.
    pub async fn populate_asset(&self, meta: &AssetMetadata) {
        if let Err(e) = self.cache().set_asset_metadata(meta).await {
            tracing::warn!(error = %e, asset_id = %meta.id(), kind = %meta.kind(), "Failed to populate metadata cache");
        }
    }

    /// Cache a full roster. Used on team creation, where the whole set is
    /// known and the conditional member add would otherwise leave it absent.
    pub async fn populate_team(&self, team_id: TeamId, members: &BTreeSet<UserId>) {
        if members.is_empty() {
            return;
        }
        if let Err(e) = self.cache().store_team_members(team_id, members).await {
            tracing::warn!(error = %e, team_id, "Failed to populate membership cache");
        }
    }
}

fn record_publish(topic: Topic, position: &Option<LogPosition>) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_publish(topic, position.is_some());
    }
}
