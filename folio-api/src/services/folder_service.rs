//! Folder Service
//!
//! Folder CRUD and sharing. Access decisions start from the folder row in
//! the store; the ACL lookup and the metadata served back go through the
//! caches. Writes commit first, then invalidate or patch the cache inline and
//! publish to `asset.changes`.

use chrono::Utc;
use folio_core::{
    new_asset_id, AccessLevel, AssetAction, AssetEvent, AssetKind, AssetMetadata, EntityKind,
    Folder, FolioResult, Note, Share, StoreError, UserId,
};

use super::{reject_self_share, require_grant, require_owner};
use crate::auth::RequestContext;
use crate::read_through::AccessGrant;
use crate::state::AppState;
use crate::store::FolderDeletion;
use crate::validation::{required_name, MAX_NAME_LEN};

/// A folder as seen by one caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderView {
    pub folder: Folder,
    pub access: AccessGrant,
    pub notes: Vec<Note>,
    /// Only populated for the owner.
    pub shares: Vec<Share>,
    pub from_cache: bool,
}

pub async fn create_folder(
    state: &AppState,
    ctx: &RequestContext,
    folder_name: &str,
) -> FolioResult<Folder> {
    let folder_name = required_name("folderName", folder_name, MAX_NAME_LEN)?;
    let now = Utc::now();
    let folder = Folder {
        id: new_asset_id(),
        folder_name,
        owner_id: ctx.user_id,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_folder(&folder).await?;

    state
        .writes
        .populate_asset(&AssetMetadata::Folder(folder.clone()))
        .await;
    state
        .writes
        .asset_event(&AssetEvent::new(
            AssetKind::Folder,
            AssetAction::Created,
            folder.id,
            folder.owner_id,
            ctx.user_id,
        ))
        .await;

    tracing::info!(folder_id = %folder.id, owner_id = %folder.owner_id, "Folder created");
    Ok(folder)
}

/// Folder details with its notes. Any access level may read.
pub async fn get_folder(
    state: &AppState,
    ctx: &RequestContext,
    folder_id: folio_core::AssetId,
) -> FolioResult<FolderView> {
    let owner_id = authoritative_folder(state, folder_id).await?.owner_id;
    let grant = state
        .reads
        .resolve_access(ctx, owner_id, AssetKind::Folder, folder_id)
        .await?;
    let access = require_grant(grant, AssetKind::Folder, folder_id, AccessLevel::Read)?;

    let (folder, from_cache) = load_folder(state, folder_id).await?;
    let notes = state.store.notes_in_folder(folder_id).await?;
    let shares = if access.is_owner() {
        state.store.shares_for(AssetKind::Folder, folder_id).await?
    } else {
        Vec::new()
    };

    Ok(FolderView {
        folder,
        access,
        notes,
        shares,
        from_cache,
    })
}

/// Rename a folder. Owner or `write` share.
pub async fn update_folder(
    state: &AppState,
    ctx: &RequestContext,
    folder_id: folio_core::AssetId,
    folder_name: &str,
) -> FolioResult<Folder> {
    let folder_name = required_name("folderName", folder_name, MAX_NAME_LEN)?;
    let folder = authoritative_folder(state, folder_id).await?;
    let grant = state
        .reads
        .resolve_access(ctx, folder.owner_id, AssetKind::Folder, folder_id)
        .await?;
    require_grant(grant, AssetKind::Folder, folder_id, AccessLevel::Write)?;

    let updated = state
        .store
        .rename_folder(folder_id, &folder_name)
        .await?
        .ok_or_else(|| StoreError::not_found(EntityKind::Folder, folder_id))?;

    state
        .writes
        .asset_event(&AssetEvent::new(
            AssetKind::Folder,
            AssetAction::Updated,
            folder_id,
            updated.owner_id,
            ctx.user_id,
        ))
        .await;
    Ok(updated)
}

/// Delete a folder with its notes and shares. Owner only.
///
/// Publishes `FOLDER_DELETED` and one `NOTE_DELETED` per removed note.
pub async fn delete_folder(
    state: &AppState,
    ctx: &RequestContext,
    folder_id: folio_core::AssetId,
) -> FolioResult<FolderDeletion> {
    let folder = authoritative_folder(state, folder_id).await?;
    require_owner(ctx, folder.owner_id, AssetKind::Folder, folder_id)?;

    let deletion = state
        .store
        .delete_folder_cascade(folder_id)
        .await?
        .ok_or_else(|| StoreError::not_found(EntityKind::Folder, folder_id))?;

    state
        .writes
        .asset_event(&AssetEvent::new(
            AssetKind::Folder,
            AssetAction::Deleted,
            folder_id,
            folder.owner_id,
            ctx.user_id,
        ))
        .await;
    for note in &deletion.notes {
        state
            .writes
            .asset_event(&AssetEvent::new(
                AssetKind::Note,
                AssetAction::Deleted,
                note.id,
                note.owner_id,
                ctx.user_id,
            ))
            .await;
    }

    tracing::info!(
        folder_id = %folder_id,
        notes = deletion.notes.len(),
        shares = deletion.shares_removed,
        "Folder deleted"
    );
    Ok(deletion)
}

/// Grant or change a user's access to a folder. Owner only.
pub async fn share_folder(
    state: &AppState,
    ctx: &RequestContext,
    folder_id: folio_core::AssetId,
    user_id: UserId,
    level: AccessLevel,
) -> FolioResult<Share> {
    reject_self_share(ctx, user_id)?;
    let folder = authoritative_folder(state, folder_id).await?;
    require_owner(ctx, folder.owner_id, AssetKind::Folder, folder_id)?;

    let share = state
        .store
        .upsert_share(AssetKind::Folder, folder_id, user_id, level, ctx.user_id)
        .await?;

    state
        .writes
        .asset_event(&AssetEvent::shared(
            AssetKind::Folder,
            folder_id,
            folder.owner_id,
            ctx.user_id,
            user_id,
            level,
        ))
        .await;
    Ok(share)
}

/// Revoke a user's access to a folder. Owner only.
pub async fn unshare_folder(
    state: &AppState,
    ctx: &RequestContext,
    folder_id: folio_core::AssetId,
    user_id: UserId,
) -> FolioResult<()> {
    let folder = authoritative_folder(state, folder_id).await?;
    require_owner(ctx, folder.owner_id, AssetKind::Folder, folder_id)?;

    if !state
        .store
        .remove_share(AssetKind::Folder, folder_id, user_id)
        .await?
    {
        return Err(StoreError::not_found(EntityKind::Share, user_id).into());
    }

    state
        .writes
        .asset_event(&AssetEvent::unshared(
            AssetKind::Folder,
            folder_id,
            folder.owner_id,
            ctx.user_id,
            user_id,
        ))
        .await;
    Ok(())
}

/// Folders the caller owns.
pub async fn list_owned_folders(state: &AppState, ctx: &RequestContext) -> FolioResult<Vec<Folder>> {
    state.store.folders_owned_by(ctx.user_id).await
}

/// The folder row from the store. Owner checks read this, never the cache.
pub(crate) async fn authoritative_folder(
    state: &AppState,
    folder_id: folio_core::AssetId,
) -> FolioResult<Folder> {
    state
        .store
        .get_folder(folder_id)
        .await?
        .ok_or_else(|| StoreError::not_found(EntityKind::Folder, folder_id).into())
}

/// The folder as served to readers, from the metadata cache when present.
async fn load_folder(
    state: &AppState,
    folder_id: folio_core::AssetId,
) -> FolioResult<(Folder, bool)> {
    let read = state.reads.require_asset(AssetKind::Folder, folder_id).await?;
    let from_cache = read.was_cache_hit();
    match read.into_value() {
        AssetMetadata::Folder(folder) => Ok((folder, from_cache)),
        AssetMetadata::Note(_) => Err(StoreError::not_found(EntityKind::Folder, folder_id).into()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
