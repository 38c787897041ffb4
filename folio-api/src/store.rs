//! Source-of-truth store interface.
//!
//! The relational store is the single authority for correctness. Every
//! method is one transaction; multi-row mutations (team creation, cascading
//! folder delete) are atomic.

use async_trait::async_trait;
use folio_core::{
    AccessLevel, AssetId, AssetKind, AssetMetadata, Folder, FolioResult, Note, RosterEntry, Share,
    Team, TeamId, TeamRole, UserId,
};

/// A newly created team together with its initial roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTeam {
    pub team: Team,
    pub roster: Vec<RosterEntry>,
}

/// What a cascading folder delete removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderDeletion {
    pub folder: Folder,
    pub notes: Vec<Note>,
    pub shares_removed: usize,
}

/// Partial update of a note. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteChanges {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl NoteChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

#[async_trait]
pub trait SourceOfTruth: Send + Sync {
    // ------------------------------------------------------------------
    // Teams
    // ------------------------------------------------------------------

    /// Insert a team, the creator as `MANAGER` and `members` as `MEMBER`.
    async fn create_team(
        &self,
        team_name: &str,
        creator: UserId,
        members: &[UserId],
    ) -> FolioResult<NewTeam>;

    async fn get_team(&self, team_id: TeamId) -> FolioResult<Option<Team>>;

    async fn team_roster(&self, team_id: TeamId) -> FolioResult<Vec<RosterEntry>>;

    async fn roster_entry(&self, team_id: TeamId, user_id: UserId)
        -> FolioResult<Option<RosterEntry>>;

    /// Insert `MEMBER` rows for users not yet on the roster. Returns only the
    /// rows that were inserted.
    async fn add_team_members(
        &self,
        team_id: TeamId,
        user_ids: &[UserId],
    ) -> FolioResult<Vec<RosterEntry>>;

    /// Returns whether a row was removed.
    async fn remove_team_member(&self, team_id: TeamId, user_id: UserId) -> FolioResult<bool>;

    /// Change the role of an existing roster row. `None` if the user is not
    /// on the roster.
    async fn set_team_role(
        &self,
        team_id: TeamId,
        user_id: UserId,
        role: TeamRole,
    ) -> FolioResult<Option<RosterEntry>>;

    // ------------------------------------------------------------------
    // Folders
    // ------------------------------------------------------------------

    async fn insert_folder(&self, folder: &Folder) -> FolioResult<()>;

    async fn get_folder(&self, folder_id: AssetId) -> FolioResult<Option<Folder>>;

    async fn rename_folder(
        &self,
        folder_id: AssetId,
        folder_name: &str,
    ) -> FolioResult<Option<Folder>>;

    /// Delete a folder, its notes and every share of either, in one
    /// transaction.
    async fn delete_folder_cascade(&self, folder_id: AssetId)
        -> FolioResult<Option<FolderDeletion>>;

    async fn folders_owned_by(&self, owner_id: UserId) -> FolioResult<Vec<Folder>>;

    // ------------------------------------------------------------------
    // Notes
    // ------------------------------------------------------------------

    async fn insert_note(&self, note: &Note) -> FolioResult<()>;

    async fn get_note(&self, note_id: AssetId) -> FolioResult<Option<Note>>;

    async fn update_note(&self, note_id: AssetId, changes: &NoteChanges)
        -> FolioResult<Option<Note>>;

    /// Delete a note and its shares in one transaction.
    async fn delete_note(&self, note_id: AssetId) -> FolioResult<Option<Note>>;

    async fn notes_in_folder(&self, folder_id: AssetId) -> FolioResult<Vec<Note>>;

    // ------------------------------------------------------------------
    // Shares
    // ------------------------------------------------------------------

    /// Insert or update the share of `asset_id` with `user_id`.
    async fn upsert_share(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
        user_id: UserId,
        level: AccessLevel,
        shared_by: UserId,
    ) -> FolioResult<Share>;

    /// Returns whether a share was removed.
    async fn remove_share(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
        user_id: UserId,
    ) -> FolioResult<bool>;

    async fn find_share(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
        user_id: UserId,
    ) -> FolioResult<Option<Share>>;

    async fn shares_for(&self, kind: AssetKind, asset_id: AssetId) -> FolioResult<Vec<Share>>;

    // ------------------------------------------------------------------
    // Provided
    // ------------------------------------------------------------------

    /// Metadata of a folder or note.
    async fn get_asset(&self, kind: AssetKind, asset_id: AssetId) -> FolioResult<Option<AssetMetadata>> {
        Ok(match kind {
            AssetKind::Folder => self.get_folder(asset_id).await?.map(AssetMetadata::Folder),
            AssetKind::Note => self.get_note(asset_id).await?.map(AssetMetadata::Note),
        })
    }
}
