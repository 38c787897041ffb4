//! Typed cache client.
//!
//! `CacheClient` is the one handle request handlers and event consumers share.
//! It turns domain values into the three cache namespaces and back:
//!
//! - `team:{id}:members` holds user ids of every roster row, regardless of role
//! - `folder:{id}` / `note:{id}` hold a JSON [`AssetMetadata`] snapshot
//! - `asset:{id}:acl` maps user id to `read` / `write`
//!
//! Lookups return `Ok(None)` for "not cached". A value that is present but
//! cannot be decoded is logged, dropped, and reported as `Ok(None)` so the
//! caller falls through to the source of truth.

use folio_core::{AccessLevel, AssetId, AssetKind, AssetMetadata, FolioResult, TeamId, UserId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::keys::CacheKey;
use crate::traits::{CacheStats, CacheStore};

/// Shared, cloneable handle over one [`CacheStore`].
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub async fn stats(&self) -> FolioResult<CacheStats> {
        self.store.stats().await
    }

    // ========================================================================
    // ASSET METADATA
    // ========================================================================

    pub async fn get_asset_metadata(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
    ) -> FolioResult<Option<AssetMetadata>> {
        let key = CacheKey::asset_metadata(kind, asset_id);
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<AssetMetadata>(&bytes) {
            Ok(meta) if meta.kind() == kind && meta.id() == asset_id => Ok(Some(meta)),
            Ok(meta) => {
                tracing::warn!(
                    key = %key,
                    cached_kind = %meta.kind(),
                    cached_id = %meta.id(),
                    "Cached metadata does not match its key, dropping"
                );
                self.discard(&key).await;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Undecodable cached metadata, dropping");
                self.discard(&key).await;
                Ok(None)
            }
        }
    }

    pub async fn set_asset_metadata(&self, meta: &AssetMetadata) -> FolioResult<()> {
        let key = CacheKey::asset_metadata(meta.kind(), meta.id());
        let bytes = serde_json::to_vec(meta).map_err(|e| folio_core::CacheError::Codec {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.store.set(&key, bytes, self.config.metadata_ttl).await
    }

    /// Delete the metadata snapshot. Returns whether one was present.
    pub async fn invalidate_asset_metadata(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
    ) -> FolioResult<bool> {
        self.store
            .delete(&CacheKey::asset_metadata(kind, asset_id))
            .await
    }

    /// Delete both the metadata snapshot and the ACL map of a deleted asset.
    pub async fn invalidate_asset(&self, kind: AssetKind, asset_id: AssetId) -> FolioResult<()> {
        self.invalidate_asset_metadata(kind, asset_id).await?;
        self.store.delete(&CacheKey::asset_acl(asset_id)).await?;
        Ok(())
    }

    // ========================================================================
    // ASSET ACL
    // ========================================================================

    /// Cached access level of one user. `None` means "not cached", never "denied".
    pub async fn get_asset_access(
        &self,
        asset_id: AssetId,
        user_id: UserId,
    ) -> FolioResult<Option<AccessLevel>> {
        let key = CacheKey::asset_acl(asset_id);
        let Some(raw) = self.store.map_get(&key, &user_id.to_string()).await? else {
            return Ok(None);
        };
        match raw.parse::<AccessLevel>() {
            Ok(level) => Ok(Some(level)),
            Err(e) => {
                tracing::warn!(key = %key, user_id = %user_id, error = %e, "Invalid cached ACL entry, dropping");
                if let Err(e) = self.store.map_remove(&key, &user_id.to_string()).await {
                    tracing::warn!(key = %key, error = %e, "Failed to drop invalid ACL entry");
                }
                Ok(None)
            }
        }
    }

    /// Every cached ACL entry for an asset. Invalid entries are skipped.
    pub async fn get_asset_acl(
        &self,
        asset_id: AssetId,
    ) -> FolioResult<Option<BTreeMap<UserId, AccessLevel>>> {
        let key = CacheKey::asset_acl(asset_id);
        let Some(raw) = self.store.map_get_all(&key).await? else {
            return Ok(None);
        };
        let mut acl = BTreeMap::new();
        for (user, level) in raw {
            match (Uuid::parse_str(&user), level.parse::<AccessLevel>()) {
                (Ok(user_id), Ok(level)) => {
                    acl.insert(user_id, level);
                }
                _ => tracing::warn!(key = %key, field = %user, value = %level, "Skipping invalid ACL entry"),
            }
        }
        Ok(Some(acl))
    }

    pub async fn add_asset_access(
        &self,
        asset_id: AssetId,
        user_id: UserId,
        level: AccessLevel,
    ) -> FolioResult<()> {
        self.store
            .map_upsert(
                &CacheKey::asset_acl(asset_id),
                &user_id.to_string(),
                level.as_str(),
                self.config.acl_ttl,
            )
            .await
    }

    pub async fn remove_asset_access(&self, asset_id: AssetId, user_id: UserId) -> FolioResult<()> {
        self.store
            .map_remove(&CacheKey::asset_acl(asset_id), &user_id.to_string())
            .await
    }

    // ========================================================================
    // TEAM MEMBERSHIP
    // ========================================================================

    pub async fn get_team_members(&self, team_id: TeamId) -> FolioResult<Option<BTreeSet<UserId>>> {
        let key = CacheKey::team_members(team_id);
        let Some(raw) = self.store.set_members(&key).await? else {
            return Ok(None);
        };
        let mut members = BTreeSet::new();
        for member in raw {
            match Uuid::parse_str(&member) {
                Ok(user_id) => {
                    members.insert(user_id);
                }
                Err(e) => {
                    tracing::warn!(key = %key, member = %member, error = %e, "Skipping invalid cached member id")
                }
            }
        }
        if members.is_empty() {
            return Ok(None);
        }
        Ok(Some(members))
    }

    /// Overwrite the whole membership set with the roster's user ids.
    pub async fn store_team_members(
        &self,
        team_id: TeamId,
        members: &BTreeSet<UserId>,
    ) -> FolioResult<()> {
        let members: Vec<String> = members.iter().map(Uuid::to_string).collect();
        self.store
            .set_replace(
                &CacheKey::team_members(team_id),
                &members,
                self.config.membership_ttl,
            )
            .await
    }

    /// Patch one member into a cached set. Returns `false` when the set is
    /// not cached, in which case nothing is written.
    pub async fn add_team_member(&self, team_id: TeamId, user_id: UserId) -> FolioResult<bool> {
        self.store
            .set_add_if_present(
                &CacheKey::team_members(team_id),
                &user_id.to_string(),
                self.config.membership_ttl,
            )
            .await
    }

    pub async fn remove_team_member(&self, team_id: TeamId, user_id: UserId) -> FolioResult<()> {
        self.store
            .set_remove(&CacheKey::team_members(team_id), &user_id.to_string())
            .await
    }

    async fn discard(&self, key: &CacheKey) {
        if let Err(e) = self.store.delete(key).await {
            tracing::warn!(key = %key, error = %e, "Failed to drop cache entry");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
