//! In-memory source-of-truth store.
//!
//! All tables live behind one `RwLock`, so every method is trivially a
//! single transaction. Used by tests and single-process demos.

use async_trait::async_trait;
use chrono::Utc;
use folio_core::{
    AccessLevel, AssetId, AssetKind, EntityKind, Folder, FolioResult, Note, RosterEntry, Share,
    StoreError, Team, TeamId, TeamRole, UserId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::store::{FolderDeletion, NewTeam, NoteChanges, SourceOfTruth};

#[derive(Debug, Default)]
struct Tables {
    last_team_id: TeamId,
    teams: BTreeMap<TeamId, Team>,
    roster: BTreeMap<(TeamId, UserId), RosterEntry>,
    folders: HashMap<AssetId, Folder>,
    notes: HashMap<AssetId, Note>,
    shares: HashMap<(AssetKind, AssetId, UserId), Share>,
}

impl Tables {
    fn remove_shares_of(&mut self, kind: AssetKind, asset_id: AssetId) -> usize {
        let before = self.shares.len();
        self.shares
            .retain(|(k, id, _), _| !(*k == kind && *id == asset_id));
        before - self.shares.len()
    }
}

pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryStore {
    fn clone(&self) -> Self {
        Self {
            tables: Arc::clone(&self.tables),
        }
    }
}

#[async_trait]
impl SourceOfTruth for InMemoryStore {
    async fn create_team(
        &self,
        team_name: &str,
        creator: UserId,
        members: &[UserId],
    ) -> FolioResult<NewTeam> {
        let mut tables = self.write()?;
        if tables.teams.values().any(|t| t.team_name == team_name) {
            return Err(StoreError::AlreadyExists {
                entity: EntityKind::Team,
                id: team_name.to_string(),
            }
            .into());
        }

        let now = Utc::now();
        tables.last_team_id += 1;
        let team = Team {
            id: tables.last_team_id,
            team_name: team_name.to_string(),
            created_at: now,
            updated_at: now,
        };
        tables.teams.insert(team.id, team.clone());

        let mut roster = Vec::new();
        let entries = std::iter::once((creator, TeamRole::Manager))
            .chain(members.iter().map(|m| (*m, TeamRole::Member)));
        for (user_id, role) in entries {
            if tables.roster.contains_key(&(team.id, user_id)) {
                continue;
            }
            let entry = RosterEntry {
                team_id: team.id,
                user_id,
                role,
                created_at: now,
                updated_at: now,
            };
            tables.roster.insert((team.id, user_id), entry.clone());
            roster.push(entry);
        }

        Ok(NewTeam { team, roster })
    }

    async fn get_team(&self, team_id: TeamId) -> FolioResult<Option<Team>> {
        Ok(self.read()?.teams.get(&team_id).cloned())
    }

    async fn team_roster(&self, team_id: TeamId) -> FolioResult<Vec<RosterEntry>> {
        Ok(self
            .read()?
            .roster
            .range((team_id, Uuid::nil())..=(team_id, Uuid::from_u128(u128::MAX)))
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn roster_entry(
        &self,
        team_id: TeamId,
        user_id: UserId,
    ) -> FolioResult<Option<RosterEntry>> {
        Ok(self.read()?.roster.get(&(team_id, user_id)).cloned())
    }

    async fn add_team_members(
        &self,
        team_id: TeamId,
        user_ids: &[UserId],
    ) -> FolioResult<Vec<RosterEntry>> {
        let mut tables = self.write()?;
        if !tables.teams.contains_key(&team_id) {
            return Err(StoreError::not_found(EntityKind::Team, team_id).into());
        }

        let now = Utc::now();
        let mut added = Vec::new();
        for user_id in user_ids {
            if tables.roster.contains_key(&(team_id, *user_id)) {
                continue;
            }
            let entry = RosterEntry {
                team_id,
                user_id: *user_id,
                role: TeamRole::Member,
                created_at: now,
                updated_at: now,
            };
            tables.roster.insert((team_id, *user_id), entry.clone());
            added.push(entry);
        }
        Ok(added)
    }

    async fn remove_team_member(&self, team_id: TeamId, user_id: UserId) -> FolioResult<bool> {
        Ok(self.write()?.roster.remove(&(team_id, user_id)).is_some())
    }

    async fn set_team_role(
        &self,
        team_id: TeamId,
        user_id: UserId,
        role: TeamRole,
    ) -> FolioResult<Option<RosterEntry>> {
        let mut tables = self.write()?;
        Ok(tables.roster.get_mut(&(team_id, user_id)).map(|entry| {
            entry.role = role;
            entry.updated_at = Utc::now();
            entry.clone()
        }))
    }

    async fn insert_folder(&self, folder: &Folder) -> FolioResult<()> {
        let mut tables = self.write()?;
        if tables.folders.contains_key(&folder.id) {
            return Err(StoreError::AlreadyExists {
                entity: EntityKind::Folder,
                id: folder.id.to_string(),
            }
            .into());
        }
        tables.folders.insert(folder.id, folder.clone());
        Ok(())
    }

    async fn get_folder(&self, folder_id: AssetId) -> FolioResult<Option<Folder>> {
        Ok(self.read()?.folders.get(&folder_id).cloned())
    }

    async fn rename_folder(
        &self,
        folder_id: AssetId,
        folder_name: &str,
    ) -> FolioResult<Option<Folder>> {
        let mut tables = self.write()?;
        Ok(tables.folders.get_mut(&folder_id).map(|folder| {
            folder.folder_name = folder_name.to_string();
            folder.updated_at = Utc::now();
            folder.clone()
        }))
    }

    async fn delete_folder_cascade(
        &self,
        folder_id: AssetId,
    ) -> FolioResult<Option<FolderDeletion>> {
        let mut tables = self.write()?;
        let Some(folder) = tables.folders.remove(&folder_id) else {
            return Ok(None);
        };

        let note_ids: Vec<AssetId> = tables
            .notes
            .values()
            .filter(|n| n.folder_id == folder_id)
            .map(|n| n.id)
            .collect();

        let mut notes = Vec::with_capacity(note_ids.len());
        let mut shares_removed = tables.remove_shares_of(AssetKind::Folder, folder_id);
        for note_id in note_ids {
            if let Some(note) = tables.notes.remove(&note_id) {
                shares_removed += tables.remove_shares_of(AssetKind::Note, note_id);
                notes.push(note);
            }
        }
        notes.sort_by_key(|n| n.id);

        Ok(Some(FolderDeletion {
            folder,
            notes,
            shares_removed,
        }))
    }

    async fn folders_owned_by(&self, owner_id: UserId) -> FolioResult<Vec<Folder>> {
        let tables = self.read()?;
        let mut folders: Vec<Folder> = tables
            .folders
            .values()
            .filter(|f| f.owner_id == owner_id)
            .cloned()
            .collect();
        folders.sort_by_key(|f| f.id);
        Ok(folders)
    }

    async fn insert_note(&self, note: &Note) -> FolioResult<()> {
        let mut tables = self.write()?;
        if !tables.folders.contains_key(&note.folder_id) {
            return Err(StoreError::not_found(EntityKind::Folder, note.folder_id).into());
        }
        if tables.notes.contains_key(&note.id) {
            return Err(StoreError::AlreadyExists {
                entity: EntityKind::Note,
                id: note.id.to_string(),
            }
            .into());
        }
        tables.notes.insert(note.id, note.clone());
        Ok(())
    }

    async fn get_note(&self, note_id: AssetId) -> FolioResult<Option<Note>> {
        Ok(self.read()?.notes.get(&note_id).cloned())
    }

    async fn update_note(
        &self,
        note_id: AssetId,
        changes: &NoteChanges,
    ) -> FolioResult<Option<Note>> {
        let mut tables = self.write()?;
        Ok(tables.notes.get_mut(&note_id).map(|note| {
            if let Some(title) = &changes.title {
                note.title = title.clone();
            }
            if let Some(content) = &changes.content {
                note.content = content.clone();
            }
            note.updated_at = Utc::now();
            note.clone()
        }))
    }

    async fn delete_note(&self, note_id: AssetId) -> FolioResult<Option<Note>> {
        let mut tables = self.write()?;
        let note = tables.notes.remove(&note_id);
        if note.is_some() {
            tables.remove_shares_of(AssetKind::Note, note_id);
        }
        Ok(note)
    }

    async fn notes_in_folder(&self, folder_id: AssetId) -> FolioResult<Vec<Note>> {
        let tables = self.read()?;
        let mut notes: Vec<Note> = tables
            .notes
            .values()
            .filter(|n| n.folder_id == folder_id)
            .cloned()
            .collect();
        notes.sort_by_key(|n| n.id);
        Ok(notes)
    }

    async fn upsert_share(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
        user_id: UserId,
        level: AccessLevel,
        shared_by: UserId,
    ) -> FolioResult<Share> {
        let mut tables = self.write()?;
        let exists = match kind {
            AssetKind::Folder => tables.folders.contains_key(&asset_id),
            AssetKind::Note => tables.notes.contains_key(&asset_id),
        };
        if !exists {
            return Err(StoreError::not_found(kind, asset_id).into());
        }

        let now = Utc::now();
        let share = tables
            .shares
            .entry((kind, asset_id, user_id))
            .and_modify(|share| {
                share.access_level = level;
                share.shared_by = shared_by;
                share.updated_at = now;
            })
            .or_insert_with(|| Share {
                id: Uuid::new_v4(),
                asset_kind: kind,
                asset_id,
                user_id,
                access_level: level,
                shared_by,
                created_at: now,
                updated_at: now,
            });
        Ok(share.clone())
    }

    async fn remove_share(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
        user_id: UserId,
    ) -> FolioResult<bool> {
        Ok(self
            .write()?
            .shares
            .remove(&(kind, asset_id, user_id))
            .is_some())
    }

    async fn find_share(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
        user_id: UserId,
    ) -> FolioResult<Option<Share>> {
        Ok(self.read()?.shares.get(&(kind, asset_id, user_id)).cloned())
    }

    async fn shares_for(&self, kind: AssetKind, asset_id: AssetId) -> FolioResult<Vec<Share>> {
        let tables = self.read()?;
        let mut shares: Vec<Share> = tables
            .shares
            .values()
            .filter(|s| s.asset_kind == kind && s.asset_id == asset_id)
            .cloned()
            .collect();
        shares.sort_by_key(|s| s.user_id);
        Ok(shares)
    }
}
