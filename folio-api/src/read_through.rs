//! Read-through cache integration.
//!
//! Every read consults the cache first and falls back to the source of
//! truth. Cache failures are logged and treated as misses; store failures
//! propagate and leave the cache untouched. Populating the cache after a
//! store read is best-effort.
//!
//! Access resolution never treats a cache miss as a denial: owner check,
//! then the cached ACL, then the sharing table.

use folio_cache::{CacheClient, CacheRead};
use folio_core::{
    AccessLevel, AssetId, AssetKind, AssetMetadata, EntityKind, FolioResult, StoreError, TeamId,
    UserId,
};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::auth::RequestContext;
use crate::store::SourceOfTruth;

/// Where an access decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantSource {
    Owner,
    AclCache,
    ShareTable,
    /// Granted on the enclosing folder and applied to a note inside it.
    Folder,
}

/// A caller's effective access to one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessGrant {
    pub level: AccessLevel,
    pub source: GrantSource,
}

impl AccessGrant {
    pub fn owner() -> Self {
        Self {
            level: AccessLevel::Write,
            source: GrantSource::Owner,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.source == GrantSource::Owner
    }

    pub fn allows(&self, required: AccessLevel) -> bool {
        self.level.allows(required)
    }

    /// The same level, re-attributed to the enclosing folder.
    pub fn inherited(self) -> Self {
        Self {
            level: self.level,
            source: GrantSource::Folder,
        }
    }
}

/// Cache-aside reads over one cache and one source of truth.
#[derive(Clone)]
pub struct ReadThrough {
    store: Arc<dyn SourceOfTruth>,
    cache: CacheClient,
}

impl ReadThrough {
    pub fn new(store: Arc<dyn SourceOfTruth>, cache: CacheClient) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &Arc<dyn SourceOfTruth> {
        &self.store
    }

    pub fn cache(&self) -> &CacheClient {
        &self.cache
    }

    /// Folder or note metadata. `Ok(None)` when the asset does not exist.
    pub async fn asset_metadata(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
    ) -> FolioResult<Option<CacheRead<AssetMetadata>>> {
        match self.cache.get_asset_metadata(kind, asset_id).await {
            Ok(Some(meta)) => return Ok(Some(CacheRead::from_cache(meta))),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, kind = %kind, asset_id = %asset_id, "Metadata cache read failed, using store");
            }
        }

        let Some(meta) = self.store.get_asset(kind, asset_id).await? else {
            return Ok(None);
        };

        if let Err(e) = self.cache.set_asset_metadata(&meta).await {
            tracing::warn!(error = %e, kind = %kind, asset_id = %asset_id, "Failed to populate metadata cache");
        }
        Ok(Some(CacheRead::from_storage(meta)))
    }

    /// Same as [`asset_metadata`](Self::asset_metadata) but a missing asset
    /// is a `NotFound` error.
    pub async fn require_asset(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
    ) -> FolioResult<CacheRead<AssetMetadata>> {
        self.asset_metadata(kind, asset_id)
            .await?
            .ok_or_else(|| StoreError::not_found(kind, asset_id).into())
    }

    /// Member ids of a team, role-agnostic.
    pub async fn team_members(&self, team_id: TeamId) -> FolioResult<CacheRead<BTreeSet<UserId>>> {
        match self.cache.get_team_members(team_id).await {
            Ok(Some(members)) => return Ok(CacheRead::from_cache(members)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, team_id, "Membership cache read failed, using store");
            }
        }

        let roster = self.store.team_roster(team_id).await?;
        if roster.is_empty() && self.store.get_team(team_id).await?.is_none() {
            return Err(StoreError::not_found(EntityKind::Team, team_id).into());
        }

        let members: BTreeSet<UserId> = roster.iter().map(|entry| entry.user_id).collect();
        if !members.is_empty() {
            if let Err(e) = self.cache.store_team_members(team_id, &members).await {
                tracing::warn!(error = %e, team_id, "Failed to populate membership cache");
            }
        }
        Ok(CacheRead::from_storage(members))
    }

    /// Effective access of the caller to an asset owned by `owner_id`.
    /// `Ok(None)` means no access.
    pub async fn resolve_access(
        &self,
        ctx: &RequestContext,
        owner_id: UserId,
        kind: AssetKind,
        asset_id: AssetId,
    ) -> FolioResult<Option<AccessGrant>> {
        if ctx.user_id == owner_id {
            return Ok(Some(AccessGrant::owner()));
        }

        match self.cache.get_asset_access(asset_id, ctx.user_id).await {
            Ok(Some(level)) => {
                return Ok(Some(AccessGrant {
                    level,
                    source: GrantSource::AclCache,
                }))
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, asset_id = %asset_id, user_id = %ctx.user_id, "ACL cache read failed, using share table");
            }
        }

        let Some(share) = self.store.find_share(kind, asset_id, ctx.user_id).await? else {
            return Ok(None);
        };

        if let Err(e) = self
            .cache
            .add_asset_access(asset_id, ctx.user_id, share.access_level)
            .await
        {
            tracing::warn!(error = %e, asset_id = %asset_id, "Failed to populate ACL cache");
        }
        Ok(Some(AccessGrant {
            level: share.access_level,
            source: GrantSource::ShareTable,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryStore;
    use chrono::Utc;
    use folio_cache::{CacheConfig, InMemoryCacheStore};
    use folio_core::{new_asset_id, Folder};
    use uuid::Uuid;

    fn setup() -> (ReadThrough, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let cache = CacheClient::new(Arc::new(InMemoryCacheStore::new()), CacheConfig::default());
        (ReadThrough::new(store.clone(), cache), store)
    }

    async fn folder(store: &InMemoryStore, owner: UserId) -> Folder {
        let now = Utc::now();
        let folder = Folder {
            id: new_asset_id(),
            folder_name: "Specs".to_string(),
            owner_id: owner,
            created_at: now,
            updated_at: now,
        };
        store.insert_folder(&folder).await.unwrap();
        folder
    }

    #[tokio::test]
    async fn test_metadata_miss_then_hit() {
        let (reads, store) = setup();
        let folder = folder(&store, Uuid::new_v4()).await;

        let first = reads
            .asset_metadata(AssetKind::Folder, folder.id)
            .await
            .unwrap()
            .unwrap();
        assert!(first.was_cache_miss());

        let second = reads
            .asset_metadata(AssetKind::Folder, folder.id)
            .await
            .unwrap()
            .unwrap();
        assert!(second.was_cache_hit());
        assert_eq!(second.into_value(), AssetMetadata::Folder(folder));
    }

    #[tokio::test]
    async fn test_missing_asset_is_none() {
        let (reads, _) = setup();
        assert!(reads
            .asset_metadata(AssetKind::Note, Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
        assert!(reads
            .require_asset(AssetKind::Note, Uuid::new_v4())
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_team_members_populates_cache() {
        let (reads, store) = setup();
        let (creator, member) = (Uuid::new_v4(), Uuid::new_v4());
        let team = store.create_team("t", creator, &[member]).await.unwrap().team;

        let first = reads.team_members(team.id).await.unwrap();
        assert!(first.was_cache_miss());
        assert_eq!(first.value(), &BTreeSet::from([creator, member]));

        let second = reads.team_members(team.id).await.unwrap();
        assert!(second.was_cache_hit());
        assert!(reads.team_members(999).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_acl_miss_falls_back_to_share_table() {
        let (reads, store) = setup();
        let owner = Uuid::new_v4();
        let reader = Uuid::new_v4();
        let folder = folder(&store, owner).await;
        store
            .upsert_share(AssetKind::Folder, folder.id, reader, AccessLevel::Read, owner)
            .await
            .unwrap();

        let ctx = RequestContext::member(reader);
        let grant = reads
            .resolve_access(&ctx, owner, AssetKind::Folder, folder.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grant.source, GrantSource::ShareTable);
        assert_eq!(grant.level, AccessLevel::Read);

        let grant = reads
            .resolve_access(&ctx, owner, AssetKind::Folder, folder.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grant.source, GrantSource::AclCache);
    }

    #[tokio::test]
    async fn test_owner_and_stranger() {
        let (reads, store) = setup();
        let owner = Uuid::new_v4();
        let folder = folder(&store, owner).await;

        let grant = reads
            .resolve_access(&RequestContext::member(owner), owner, AssetKind::Folder, folder.id)
            .await
            .unwrap()
            .unwrap();
        assert!(grant.is_owner());
        assert!(grant.allows(AccessLevel::Write));

        assert!(reads
            .resolve_access(
                &RequestContext::member(Uuid::new_v4()),
                owner,
                AssetKind::Folder,
                folder.id
            )
            .await
            .unwrap()
            .is_none());
    }
}
