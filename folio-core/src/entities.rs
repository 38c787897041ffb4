//! Entity types mirrored from the relational store.

use crate::{AccessLevel, AssetId, AssetKind, ShareId, TeamId, TeamRole, Timestamp, UserId};
use serde::{Deserialize, Serialize};

// ============================================================================
// TEAMS
// ============================================================================

/// A team. Membership lives in [`RosterEntry`] rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: TeamId,
    pub team_name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// One user's membership in one team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub team_id: TeamId,
    pub user_id: UserId,
    pub role: TeamRole,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ============================================================================
// ASSETS
// ============================================================================

/// A folder owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: AssetId,
    pub folder_name: String,
    pub owner_id: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A note inside a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: AssetId,
    pub title: String,
    pub content: String,
    pub owner_id: UserId,
    pub folder_id: AssetId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A share row from either the folder-share or the note-share table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub id: ShareId,
    pub asset_kind: AssetKind,
    pub asset_id: AssetId,
    pub user_id: UserId,
    pub access_level: AccessLevel,
    pub shared_by: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Snapshot of an asset's non-ACL fields, as held in the metadata cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "assetType", rename_all = "lowercase")]
pub enum AssetMetadata {
    Folder(Folder),
    Note(Note),
}

impl AssetMetadata {
    pub fn id(&self) -> AssetId {
        match self {
            AssetMetadata::Folder(f) => f.id,
            AssetMetadata::Note(n) => n.id,
        }
    }

    pub fn owner_id(&self) -> UserId {
        match self {
            AssetMetadata::Folder(f) => f.owner_id,
            AssetMetadata::Note(n) => n.owner_id,
        }
    }

    pub fn kind(&self) -> AssetKind {
        match self {
            AssetMetadata::Folder(_) => AssetKind::Folder,
            AssetMetadata::Note(_) => AssetKind::Note,
        }
    }

    pub fn updated_at(&self) -> Timestamp {
        match self {
            AssetMetadata::Folder(f) => f.updated_at,
            AssetMetadata::Note(n) => n.updated_at,
        }
    }

    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            AssetMetadata::Folder(f) => Some(f),
            AssetMetadata::Note(_) => None,
        }
    }

    pub fn as_note(&self) -> Option<&Note> {
        match self {
            AssetMetadata::Note(n) => Some(n),
            AssetMetadata::Folder(_) => None,
        }
    }
}

impl From<Folder> for AssetMetadata {
    fn from(folder: Folder) -> Self {
        AssetMetadata::Folder(folder)
    }
}

impl From<Note> for AssetMetadata {
    fn from(note: Note) -> Self {
        AssetMetadata::Note(note)
    }
}
