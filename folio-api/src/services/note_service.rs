//! Note Service
//!
//! Notes follow the folder rules, with one addition: access granted on the
//! enclosing folder carries over to every note in it. The stronger of the
//! note's own grant and the inherited one wins.

use chrono::Utc;
use folio_core::{
    new_asset_id, AccessError, AccessLevel, AssetAction, AssetEvent, AssetId, AssetKind,
    AssetMetadata, EntityKind, FolioResult, Note, Share, StoreError, UserId, ValidationError,
};

use super::folder_service::authoritative_folder;
use super::{reject_self_share, require_grant, require_owner};
use crate::auth::RequestContext;
use crate::read_through::{AccessGrant, GrantSource};
use crate::state::AppState;
use crate::store::NoteChanges;
use crate::validation::{required_name, MAX_TITLE_LEN};

/// A note as seen by one caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteView {
    pub note: Note,
    pub access: AccessGrant,
    /// Only populated for the owner.
    pub shares: Vec<Share>,
    pub from_cache: bool,
}

/// Create a note in a folder. Requires owning the folder or a `write`
/// share on it.
pub async fn create_note(
    state: &AppState,
    ctx: &RequestContext,
    folder_id: AssetId,
    title: &str,
    content: &str,
) -> FolioResult<Note> {
    let title = required_name("title", title, MAX_TITLE_LEN)?;
    let folder = authoritative_folder(state, folder_id).await?;
    let grant = state
        .reads
        .resolve_access(ctx, folder.owner_id, AssetKind::Folder, folder_id)
        .await?;
    require_grant(grant, AssetKind::Folder, folder_id, AccessLevel::Write)?;

    let now = Utc::now();
    let note = Note {
        id: new_asset_id(),
        title,
        content: content.to_string(),
        owner_id: ctx.user_id,
        folder_id,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_note(&note).await?;

    state
        .writes
        .populate_asset(&AssetMetadata::Note(note.clone()))
        .await;
    state
        .writes
        .asset_event(&AssetEvent::new(
            AssetKind::Note,
            AssetAction::Created,
            note.id,
            note.owner_id,
            ctx.user_id,
        ))
        .await;

    tracing::info!(note_id = %note.id, folder_id = %folder_id, "Note created");
    Ok(note)
}

pub async fn get_note(state: &AppState, ctx: &RequestContext, note_id: AssetId) -> FolioResult<NoteView> {
    let note = authoritative_note(state, note_id).await?;
    let grant = note_access(state, ctx, &note).await?;
    let access = require_grant(grant, AssetKind::Note, note_id, AccessLevel::Read)?;

    let (note, from_cache) = load_note(state, note_id).await?;

    let shares = if access.is_owner() {
        state.store.shares_for(AssetKind::Note, note_id).await?
    } else {
        Vec::new()
    };

    Ok(NoteView {
        note,
        access,
        shares,
        from_cache,
    })
}

/// Change a note's title and/or content. Owner, `write` share on the note,
/// or `write` share on its folder.
pub async fn update_note(
    state: &AppState,
    ctx: &RequestContext,
    note_id: AssetId,
    changes: &NoteChanges,
) -> FolioResult<Note> {
    if changes.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "title or content".to_string(),
        }
        .into());
    }
    let changes = match &changes.title {
        Some(title) => NoteChanges {
            title: Some(required_name("title", title, MAX_TITLE_LEN)?),
            content: changes.content.clone(),
        },
        None => changes.clone(),
    };

    let note = authoritative_note(state, note_id).await?;
    let grant = note_access(state, ctx, &note).await?;
    require_grant(grant, AssetKind::Note, note_id, AccessLevel::Write)?;

    let updated = state
        .store
        .update_note(note_id, &changes)
        .await?
        .ok_or_else(|| StoreError::not_found(EntityKind::Note, note_id))?;

    state
        .writes
        .asset_event(&AssetEvent::new(
            AssetKind::Note,
            AssetAction::Updated,
            note_id,
            updated.owner_id,
            ctx.user_id,
        ))
        .await;
    Ok(updated)
}

/// Delete a note and its shares. Owner, or `write` access on its folder.
pub async fn delete_note(state: &AppState, ctx: &RequestContext, note_id: AssetId) -> FolioResult<Note> {
    let note = authoritative_note(state, note_id).await?;
    let grant = note_access(state, ctx, &note).await?;
    let allowed = match grant {
        Some(g) if g.is_owner() => true,
        Some(g) => g.source == GrantSource::Folder && g.allows(AccessLevel::Write),
        None => false,
    };
    if !allowed {
        return Err(AccessError::Insufficient {
            kind: AssetKind::Folder,
            asset_id: note.folder_id,
            required: AccessLevel::Write,
        }
        .into());
    }

    let deleted = state
        .store
        .delete_note(note_id)
        .await?
        .ok_or_else(|| StoreError::not_found(EntityKind::Note, note_id))?;

    state
        .writes
        .asset_event(&AssetEvent::new(
            AssetKind::Note,
            AssetAction::Deleted,
            note_id,
            deleted.owner_id,
            ctx.user_id,
        ))
        .await;
    tracing::info!(note_id = %note_id, "Note deleted");
    Ok(deleted)
}

/// Grant or change a user's access to a note. Owner only.
pub async fn share_note(
    state: &AppState,
    ctx: &RequestContext,
    note_id: AssetId,
    user_id: UserId,
    level: AccessLevel,
) -> FolioResult<Share> {
    reject_self_share(ctx, user_id)?;
    let note = authoritative_note(state, note_id).await?;
    require_owner(ctx, note.owner_id, AssetKind::Note, note_id)?;

    let share = state
        .store
        .upsert_share(AssetKind::Note, note_id, user_id, level, ctx.user_id)
        .await?;

    state
        .writes
        .asset_event(&AssetEvent::shared(
            AssetKind::Note,
            note_id,
            note.owner_id,
            ctx.user_id,
            user_id,
            level,
        ))
        .await;
    Ok(share)
}

/// Revoke a user's access to a note. Owner only.
pub async fn unshare_note(
    state: &AppState,
    ctx: &RequestContext,
    note_id: AssetId,
    user_id: UserId,
) -> FolioResult<()> {
    let note = authoritative_note(state, note_id).await?;
    require_owner(ctx, note.owner_id, AssetKind::Note, note_id)?;

    if !state
        .store
        .remove_share(AssetKind::Note, note_id, user_id)
        .await?
    {
        return Err(StoreError::not_found(EntityKind::Share, user_id).into());
    }

    state
        .writes
        .asset_event(&AssetEvent::unshared(
            AssetKind::Note,
            note_id,
            note.owner_id,
            ctx.user_id,
            user_id,
        ))
        .await;
    Ok(())
}

/// The caller's effective access to a note: its own grant, or the folder's
/// grant if that is at least as strong.
pub async fn note_access(
    state: &AppState,
    ctx: &RequestContext,
    note: &Note,
) -> FolioResult<Option<AccessGrant>> {
    let direct = state
        .reads
        .resolve_access(ctx, note.owner_id, AssetKind::Note, note.id)
        .await?;
    if direct.is_some_and(|grant| grant.is_owner()) {
        return Ok(direct);
    }

    let folder = match authoritative_folder(state, note.folder_id).await {
        Ok(folder) => folder,
        Err(e) if e.is_not_found() => return Ok(direct),
        Err(e) => return Err(e),
    };
    let inherited = state
        .reads
        .resolve_access(ctx, folder.owner_id, AssetKind::Folder, folder.id)
        .await?
        .map(AccessGrant::inherited);

    Ok(match (direct, inherited) {
        (Some(d), Some(i)) if i.level >= d.level => Some(i),
        (Some(d), _) => Some(d),
        (None, i) => i,
    })
}

/// The note row from the store. Access checks read this, never the cache.
async fn authoritative_note(state: &AppState, note_id: AssetId) -> FolioResult<Note> {
    state
        .store
        .get_note(note_id)
        .await?
        .ok_or_else(|| StoreError::not_found(EntityKind::Note, note_id).into())
}

async fn load_note(state: &AppState, note_id: AssetId) -> FolioResult<(Note, bool)> {
    let read = state.reads.require_asset(AssetKind::Note, note_id).await?;
    let from_cache = read.was_cache_hit();
    match read.into_value() {
        AssetMetadata::Note(note) => Ok((note, from_cache)),
        AssetMetadata::Folder(_) => Err(StoreError::not_found(EntityKind::Note, note_id).into()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{create_folder, share_folder};
    use folio_core::{FolioError, Folder};
    use uuid::Uuid;

    async fn folder_and_note(state: &AppState, owner: &RequestContext) -> (Folder, Note) {
        let folder = create_folder(state, owner, "Notes").await.unwrap();
        let note = create_note(state, owner, folder.id, "Plan", "draft").await.unwrap();
        (folder, note)
    }

    #[tokio::test]
    async fn test_create_requires_folder_write() {
        let state = AppState::in_memory();
        let owner = RequestContext::member(Uuid::new_v4());
        let guest = RequestContext::member(Uuid::new_v4());
        let folder = create_folder(&state, &owner, "F").await.unwrap();

        assert!(create_note(&state, &guest, folder.id, "t", "").await.is_err());
        share_folder(&state, &owner, folder.id, guest.user_id, AccessLevel::Write)
            .await
            .unwrap();
        let note = create_note(&state, &guest, folder.id, "t", "").await.unwrap();
        assert_eq!(note.owner_id, guest.user_id);

        assert!(create_note(&state, &owner, Uuid::new_v4(), "t", "")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_folder_share_grants_note_access() {
        let state = AppState::in_memory();
        let owner = RequestContext::member(Uuid::new_v4());
        let reader = RequestContext::member(Uuid::new_v4());
        let (folder, note) = folder_and_note(&state, &owner).await;

        assert!(get_note(&state, &reader, note.id).await.is_err());
        share_folder(&state, &owner, folder.id, reader.user_id, AccessLevel::Read)
            .await
            .unwrap();

        let view = get_note(&state, &reader, note.id).await.unwrap();
        assert_eq!(view.access.source, GrantSource::Folder);
        assert!(view.shares.is_empty());

        let changes = NoteChanges {
            content: Some("edited".to_string()),
            ..Default::default()
        };
        assert!(update_note(&state, &reader, note.id, &changes).await.is_err());
        assert!(delete_note(&state, &reader, note.id).await.is_err());
    }

    #[tokio::test]
    async fn test_note_write_share_updates_but_cannot_delete() {
        let state = AppState::in_memory();
        let owner = RequestContext::member(Uuid::new_v4());
        let editor = RequestContext::member(Uuid::new_v4());
        let (_, note) = folder_and_note(&state, &owner).await;

        share_note(&state, &owner, note.id, editor.user_id, AccessLevel::Write)
            .await
            .unwrap();
        let changes = NoteChanges {
            title: Some("Plan v2".to_string()),
            content: None,
        };
        let updated = update_note(&state, &editor, note.id, &changes).await.unwrap();
        assert_eq!(updated.title, "Plan v2");
        assert_eq!(updated.content, "draft");

        let err = delete_note(&state, &editor, note.id).await.unwrap_err();
        assert!(matches!(err, FolioError::Access(AccessError::Insufficient { .. })));
    }

    #[tokio::test]
    async fn test_folder_writer_can_delete_note() {
        let state = AppState::in_memory();
        let owner = RequestContext::member(Uuid::new_v4());
        let writer = RequestContext::member(Uuid::new_v4());
        let (folder, note) = folder_and_note(&state, &owner).await;
        share_folder(&state, &owner, folder.id, writer.user_id, AccessLevel::Write)
            .await
            .unwrap();

        let deleted = delete_note(&state, &writer, note.id).await.unwrap();
        assert_eq!(deleted.id, note.id);
        assert!(get_note(&state, &owner, note.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_empty_update_rejected() {
        let state = AppState::in_memory();
        let owner = RequestContext::member(Uuid::new_v4());
        let (_, note) = folder_and_note(&state, &owner).await;

        let err = update_note(&state, &owner, note.id, &NoteChanges::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FolioError::Validation(ValidationError::RequiredFieldMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_deleted_note_is_gone_despite_cached_metadata() {
        let state = AppState::in_memory();
        let owner = RequestContext::member(Uuid::new_v4());
        let (_, note) = folder_and_note(&state, &owner).await;

        // Delete behind the cache's back, as another process would.
        state.store.delete_note(note.id).await.unwrap();
        assert!(state
            .cache()
            .get_asset_metadata(AssetKind::Note, note.id)
            .await
            .unwrap()
            .is_some());

        assert!(get_note(&state, &owner, note.id).await.unwrap_err().is_not_found());
        assert!(share_note(&state, &owner, note.id, Uuid::new_v4(), AccessLevel::Read)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_unshare_note() {
        let state = AppState::in_memory();
        let owner = RequestContext::member(Uuid::new_v4());
        let guest = RequestContext::member(Uuid::new_v4());
        let (_, note) = folder_and_note(&state, &owner).await;

        share_note(&state, &owner, note.id, guest.user_id, AccessLevel::Read)
            .await
            .unwrap();
        assert_eq!(
            get_note(&state, &guest, note.id).await.unwrap().access.source,
            GrantSource::AclCache
        );

        unshare_note(&state, &owner, note.id, guest.user_id).await.unwrap();
        assert!(get_note(&state, &guest, note.id).await.is_err());
        assert_eq!(
            get_note(&state, &owner, note.id).await.unwrap().shares.len(),
            0
        );
    }
}
