//! Event → cache mutation dispatch.
//!
//! | Event | Cache mutation |
//! |---|---|
//! | `MEMBER_ADDED` | add target to `team:{id}:members` if the set is cached |
//! | `MEMBER_REMOVED` | remove target from `team:{id}:members` |
//! | `MANAGER_ADDED` / `MANAGER_REMOVED` | none, logged |
//! | `TEAM_CREATED` | none |
//! | `*_UPDATED` | delete `folder:{id}` / `note:{id}` |
//! | `*_DELETED` | delete metadata and `asset:{id}:acl` |
//! | `*_SHARED` | upsert user → level in `asset:{id}:acl` |
//! | `*_UNSHARED` | remove user from `asset:{id}:acl` |
//! | `*_CREATED` | none |
//!
//! Every mutation is idempotent, so redelivery is harmless. The same
//! [`CacheEventHandler`] backs both the inline write-through path and the
//! asynchronous consumer.

use async_trait::async_trait;
use folio_cache::CacheClient;
use folio_core::{
    AccessLevel, AssetAction, AssetEvent, AssetId, AssetKind, FolioError, TeamEvent,
    TeamEventType, TeamId, Topic, UserId, ValidationError,
};
use thiserror::Error;

/// The cache mutation one event produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheAction {
    /// `patched` is false when the set was not cached and was left absent.
    MemberAdded {
        team_id: TeamId,
        user_id: UserId,
        patched: bool,
    },
    MemberRemoved {
        team_id: TeamId,
        user_id: UserId,
    },
    /// `removed` is false when no metadata entry was cached.
    MetadataInvalidated {
        kind: AssetKind,
        asset_id: AssetId,
        removed: bool,
    },
    AssetEvicted {
        kind: AssetKind,
        asset_id: AssetId,
    },
    AccessGranted {
        asset_id: AssetId,
        user_id: UserId,
        level: AccessLevel,
    },
    AccessRevoked {
        asset_id: AssetId,
        user_id: UserId,
    },
    LoggedOnly(TeamEventType),
    Noop,
}

/// Why a record could not be applied.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Undecodable event payload: {0}")]
    Decode(String),

    #[error("Invalid event: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Cache mutation failed: {0}")]
    Apply(#[from] FolioError),
}

/// Applies one raw record from a topic.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, topic: Topic, payload: &[u8]) -> Result<CacheAction, HandlerError>;
}

/// Maps team and asset events onto [`CacheClient`] mutations.
#[derive(Clone)]
pub struct CacheEventHandler {
    cache: CacheClient,
}

impl CacheEventHandler {
    pub fn new(cache: CacheClient) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &CacheClient {
        &self.cache
    }

    pub async fn apply_team_event(&self, event: &TeamEvent) -> Result<CacheAction, HandlerError> {
        event.validate()?;
        let team_id = event.team_id;

        let action = match (event.event_type, event.target_user_id) {
            (TeamEventType::MemberAdded, Some(user_id)) => {
                let patched = self.cache.add_team_member(team_id, user_id).await?;
                CacheAction::MemberAdded {
                    team_id,
                    user_id,
                    patched,
                }
            }
            (TeamEventType::MemberRemoved, Some(user_id)) => {
                self.cache.remove_team_member(team_id, user_id).await?;
                CacheAction::MemberRemoved { team_id, user_id }
            }
            (event_type @ (TeamEventType::ManagerAdded | TeamEventType::ManagerRemoved), _) => {
                tracing::info!(
                    team_id,
                    event_type = ?event_type,
                    target_user_id = ?event.target_user_id,
                    performed_by = %event.performed_by,
                    "Team manager change"
                );
                CacheAction::LoggedOnly(event_type)
            }
            _ => CacheAction::Noop,
        };

        tracing::debug!(team_id, action = ?action, "Applied team event");
        Ok(action)
    }

    pub async fn apply_asset_event(&self, event: &AssetEvent) -> Result<CacheAction, HandlerError> {
        event.validate()?;
        let kind = event.asset_type;
        let asset_id = event.asset_id;

        let action = match event.action() {
            AssetAction::Created => CacheAction::Noop,
            AssetAction::Updated => {
                let removed = self.cache.invalidate_asset_metadata(kind, asset_id).await?;
                CacheAction::MetadataInvalidated {
                    kind,
                    asset_id,
                    removed,
                }
            }
            AssetAction::Deleted => {
                self.cache.invalidate_asset(kind, asset_id).await?;
                CacheAction::AssetEvicted { kind, asset_id }
            }
            AssetAction::Shared => {
                let (user_id, level) = match (event.shared_with_user_id, event.access_level) {
                    (Some(user_id), Some(level)) => (user_id, level),
                    _ => {
                        return Err(ValidationError::RequiredFieldMissing {
                            field: "sharedWithUserId/accessLevel".to_string(),
                        }
                        .into())
                    }
                };
                self.cache.add_asset_access(asset_id, user_id, level).await?;
                CacheAction::AccessGranted {
                    asset_id,
                    user_id,
                    level,
                }
            }
            AssetAction::Unshared => {
                let user_id = event.shared_with_user_id.ok_or_else(|| {
                    ValidationError::RequiredFieldMissing {
                        field: "sharedWithUserId".to_string(),
                    }
                })?;
                self.cache.remove_asset_access(asset_id, user_id).await?;
                CacheAction::AccessRevoked { asset_id, user_id }
            }
        };

        tracing::debug!(asset_id = %asset_id, kind = %kind, action = ?action, "Applied asset event");
        Ok(action)
    }
}

#[async_trait]
impl EventHandler for CacheEventHandler {
    async fn handle(&self, topic: Topic, payload: &[u8]) -> Result<CacheAction, HandlerError> {
        match topic {
            Topic::TeamActivity => {
                let event: TeamEvent = serde_json::from_slice(payload)
                    .map_err(|e| HandlerError::Decode(e.to_string()))?;
                self.apply_team_event(&event).await
            }
            Topic::AssetChanges => {
                let event: AssetEvent = serde_json::from_slice(payload)
                    .map_err(|e| HandlerError::Decode(e.to_string()))?;
                self.apply_asset_event(&event).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use folio_cache::{CacheConfig, InMemoryCacheStore};
    use folio_core::{AssetMetadata, Folder};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use uuid::Uuid;

    fn handler() -> CacheEventHandler {
        let store = Arc::new(InMemoryCacheStore::new());
        CacheEventHandler::new(CacheClient::new(store, CacheConfig::default()))
    }

    fn folder(owner: UserId) -> Folder {
        let now = Utc::now();
        Folder {
            id: Uuid::new_v4(),
            folder_name: "Plans".to_string(),
            owner_id: owner,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_member_added_twice_is_idempotent() {
        let handler = handler();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        handler
            .cache()
            .store_team_members(7, &BTreeSet::from([u1]))
            .await
            .unwrap();

        let event = TeamEvent::member_added(7, u1, u2);
        handler.apply_team_event(&event).await.unwrap();
        let once = handler.cache().get_team_members(7).await.unwrap();
        handler.apply_team_event(&event).await.unwrap();
        let twice = handler.cache().get_team_members(7).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice, Some(BTreeSet::from([u1, u2])));
    }

    #[tokio::test]
    async fn test_member_added_leaves_absent_set_absent() {
        let handler = handler();
        let action = handler
            .apply_team_event(&TeamEvent::member_added(9, Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap();

        assert!(matches!(action, CacheAction::MemberAdded { patched: false, .. }));
        assert_eq!(handler.cache().get_team_members(9).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_member_event_without_target_is_rejected() {
        let handler = handler();
        let event = TeamEvent::new(TeamEventType::MemberRemoved, 7, Uuid::new_v4());
        let err = handler.apply_team_event(&event).await.unwrap_err();
        assert!(matches!(err, HandlerError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_manager_events_are_logged_only() {
        let handler = handler();
        let action = handler
            .apply_team_event(&TeamEvent::manager_added(7, Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(action, CacheAction::LoggedOnly(TeamEventType::ManagerAdded));
    }

    #[tokio::test]
    async fn test_update_on_absent_metadata_is_noop() {
        let handler = handler();
        let owner = Uuid::new_v4();
        let id = Uuid::new_v4();
        let event = AssetEvent::new(AssetKind::Folder, AssetAction::Updated, id, owner, owner);

        let action = handler.apply_asset_event(&event).await.unwrap();
        assert_eq!(
            action,
            CacheAction::MetadataInvalidated {
                kind: AssetKind::Folder,
                asset_id: id,
                removed: false
            }
        );
        assert_eq!(
            handler
                .cache()
                .get_asset_metadata(AssetKind::Folder, id)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_update_deletes_cached_metadata() {
        let handler = handler();
        let owner = Uuid::new_v4();
        let folder = folder(owner);
        handler
            .cache()
            .set_asset_metadata(&AssetMetadata::Folder(folder.clone()))
            .await
            .unwrap();

        let event = AssetEvent::new(AssetKind::Folder, AssetAction::Updated, folder.id, owner, owner);
        let action = handler.apply_asset_event(&event).await.unwrap();

        assert!(matches!(action, CacheAction::MetadataInvalidated { removed: true, .. }));
        assert_eq!(
            handler
                .cache()
                .get_asset_metadata(AssetKind::Folder, folder.id)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_share_then_upgrade_last_applied_wins() {
        let handler = handler();
        let owner = Uuid::new_v4();
        let (folder_id, u3) = (Uuid::new_v4(), Uuid::new_v4());

        for level in [AccessLevel::Read, AccessLevel::Write] {
            let event = AssetEvent::shared(AssetKind::Folder, folder_id, owner, owner, u3, level);
            handler.apply_asset_event(&event).await.unwrap();
        }

        assert_eq!(
            handler.cache().get_asset_access(folder_id, u3).await.unwrap(),
            Some(AccessLevel::Write)
        );
    }

    #[tokio::test]
    async fn test_unshare_removes_acl_entry() {
        let handler = handler();
        let owner = Uuid::new_v4();
        let (note_id, user) = (Uuid::new_v4(), Uuid::new_v4());
        handler
            .apply_asset_event(&AssetEvent::shared(
                AssetKind::Note,
                note_id,
                owner,
                owner,
                user,
                AccessLevel::Read,
            ))
            .await
            .unwrap();
        handler
            .apply_asset_event(&AssetEvent::unshared(AssetKind::Note, note_id, owner, owner, user))
            .await
            .unwrap();

        assert_eq!(handler.cache().get_asset_access(note_id, user).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_evicts_metadata_and_acl() {
        let handler = handler();
        let owner = Uuid::new_v4();
        let folder = folder(owner);
        let reader = Uuid::new_v4();
        handler
            .cache()
            .set_asset_metadata(&AssetMetadata::Folder(folder.clone()))
            .await
            .unwrap();
        handler
            .cache()
            .add_asset_access(folder.id, reader, AccessLevel::Read)
            .await
            .unwrap();

        let event = AssetEvent::new(AssetKind::Folder, AssetAction::Deleted, folder.id, owner, owner);
        handler.apply_asset_event(&event).await.unwrap();

        assert_eq!(
            handler
                .cache()
                .get_asset_metadata(AssetKind::Folder, folder.id)
                .await
                .unwrap(),
            None
        );
        assert_eq!(handler.cache().get_asset_acl(folder.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_handle_rejects_garbage_payload() {
        let handler = handler();
        let err = handler
            .handle(Topic::AssetChanges, b"not json")
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Decode(_)));
    }

    #[tokio::test]
    async fn test_handle_decodes_wire_format() {
        let handler = handler();
        let user = Uuid::new_v4();
        let payload = format!(
            r#"{{"eventType":"TEAM_CREATED","teamId":"7","performedBy":"{}","timestamp":"2024-05-01T10:00:00Z"}}"#,
            user
        );
        let action = handler
            .handle(Topic::TeamActivity, payload.as_bytes())
            .await
            .unwrap();
        assert_eq!(action, CacheAction::Noop);
    }
}
