//! Change events published after a committed mutation.
//!
//! Every event names exactly one subject (a team or an asset) and is keyed
//! by that subject's id on the log, so all events about one subject are
//! observed in commit order by a single consumer.
//!
//! # Wire format
//!
//! Events are JSON with camelCase field names. Team ids travel as decimal
//! strings.
//!
//! ```text
//! {"eventType":"MEMBER_ADDED","teamId":"7","performedBy":"…","targetUserId":"…","timestamp":"…"}
//! {"eventType":"FOLDER_SHARED","assetType":"folder","assetId":"…","ownerId":"…",
//!  "actionBy":"…","timestamp":"…","sharedWithUserId":"…","accessLevel":"read"}
//! ```

use crate::{AccessLevel, AssetId, AssetKind, TeamId, Timestamp, UserId, ValidationError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TOPICS
// ============================================================================

/// Topic carrying team membership activity, keyed by team id.
pub const TEAM_ACTIVITY_TOPIC: &str = "team.activity";

/// Topic carrying folder and note changes, keyed by asset id.
pub const ASSET_CHANGES_TOPIC: &str = "asset.changes";

/// The two event topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    TeamActivity,
    AssetChanges,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::TeamActivity, Topic::AssetChanges];

    pub fn name(&self) -> &'static str {
        match self {
            Topic::TeamActivity => TEAM_ACTIVITY_TOPIC,
            Topic::AssetChanges => ASSET_CHANGES_TOPIC,
        }
    }

    /// Consumer-group suffix used when one group reads both topics.
    pub fn group_suffix(&self) -> &'static str {
        match self {
            Topic::TeamActivity => "team",
            Topic::AssetChanges => "asset",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            TEAM_ACTIVITY_TOPIC => Ok(Topic::TeamActivity),
            ASSET_CHANGES_TOPIC => Ok(Topic::AssetChanges),
            _ => Err(format!("Unknown topic: {}", s)),
        }
    }
}

// ============================================================================
// TEAM EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TeamEventType {
    TeamCreated,
    MemberAdded,
    MemberRemoved,
    ManagerAdded,
    ManagerRemoved,
}

impl TeamEventType {
    /// Whether events of this type must name a target user.
    pub fn requires_target(&self) -> bool {
        !matches!(self, TeamEventType::TeamCreated)
    }
}

/// A completed change to a team or its roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamEvent {
    pub event_type: TeamEventType,
    #[serde(with = "team_id_string")]
    pub team_id: TeamId,
    pub performed_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<UserId>,
    pub timestamp: Timestamp,
}

impl TeamEvent {
    pub fn new(event_type: TeamEventType, team_id: TeamId, performed_by: UserId) -> Self {
        Self {
            event_type,
            team_id,
            performed_by,
            target_user_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_target(mut self, user_id: UserId) -> Self {
        self.target_user_id = Some(user_id);
        self
    }

    pub fn team_created(team_id: TeamId, performed_by: UserId) -> Self {
        Self::new(TeamEventType::TeamCreated, team_id, performed_by)
    }

    pub fn member_added(team_id: TeamId, performed_by: UserId, member: UserId) -> Self {
        Self::new(TeamEventType::MemberAdded, team_id, performed_by).with_target(member)
    }

    pub fn member_removed(team_id: TeamId, performed_by: UserId, member: UserId) -> Self {
        Self::new(TeamEventType::MemberRemoved, team_id, performed_by).with_target(member)
    }

    pub fn manager_added(team_id: TeamId, performed_by: UserId, manager: UserId) -> Self {
        Self::new(TeamEventType::ManagerAdded, team_id, performed_by).with_target(manager)
    }

    pub fn manager_removed(team_id: TeamId, performed_by: UserId, manager: UserId) -> Self {
        Self::new(TeamEventType::ManagerRemoved, team_id, performed_by).with_target(manager)
    }

    /// Log key: the team id in decimal.
    pub fn partition_key(&self) -> String {
        self.team_id.to_string()
    }

    /// Check field combinations that JSON decoding alone cannot enforce.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_type.requires_target() && self.target_user_id.is_none() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "targetUserId".to_string(),
            });
        }
        Ok(())
    }
}

mod team_id_string {
    use crate::TeamId;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &TeamId, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TeamId, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(TeamId),
            Str(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Num(id) => Ok(id),
            Repr::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

// ============================================================================
// ASSET EVENTS
// ============================================================================

/// What happened to an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetAction {
    Created,
    Updated,
    Deleted,
    Shared,
    Unshared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetEventType {
    FolderCreated,
    FolderUpdated,
    FolderDeleted,
    FolderShared,
    FolderUnshared,
    NoteCreated,
    NoteUpdated,
    NoteDeleted,
    NoteShared,
    NoteUnshared,
}

impl AssetEventType {
    pub fn new(kind: AssetKind, action: AssetAction) -> Self {
        use AssetAction::*;
        match (kind, action) {
            (AssetKind::Folder, Created) => AssetEventType::FolderCreated,
            (AssetKind::Folder, Updated) => AssetEventType::FolderUpdated,
            (AssetKind::Folder, Deleted) => AssetEventType::FolderDeleted,
            (AssetKind::Folder, Shared) => AssetEventType::FolderShared,
            (AssetKind::Folder, Unshared) => AssetEventType::FolderUnshared,
            (AssetKind::Note, Created) => AssetEventType::NoteCreated,
            (AssetKind::Note, Updated) => AssetEventType::NoteUpdated,
            (AssetKind::Note, Deleted) => AssetEventType::NoteDeleted,
            (AssetKind::Note, Shared) => AssetEventType::NoteShared,
            (AssetKind::Note, Unshared) => AssetEventType::NoteUnshared,
        }
    }

    pub fn kind(&self) -> AssetKind {
        use AssetEventType::*;
        match self {
            FolderCreated | FolderUpdated | FolderDeleted | FolderShared | FolderUnshared => {
                AssetKind::Folder
            }
            NoteCreated | NoteUpdated | NoteDeleted | NoteShared | NoteUnshared => AssetKind::Note,
        }
    }

    pub fn action(&self) -> AssetAction {
        use AssetEventType::*;
        match self {
            FolderCreated | NoteCreated => AssetAction::Created,
            FolderUpdated | NoteUpdated => AssetAction::Updated,
            FolderDeleted | NoteDeleted => AssetAction::Deleted,
            FolderShared | NoteShared => AssetAction::Shared,
            FolderUnshared | NoteUnshared => AssetAction::Unshared,
        }
    }
}

/// A completed change to a folder or note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetEvent {
    pub event_type: AssetEventType,
    pub asset_type: AssetKind,
    pub asset_id: AssetId,
    pub owner_id: UserId,
    pub action_by: UserId,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_with_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_level: Option<AccessLevel>,
}

impl AssetEvent {
    pub fn new(
        kind: AssetKind,
        action: AssetAction,
        asset_id: AssetId,
        owner_id: UserId,
        action_by: UserId,
    ) -> Self {
        Self {
            event_type: AssetEventType::new(kind, action),
            asset_type: kind,
            asset_id,
            owner_id,
            action_by,
            timestamp: Utc::now(),
            shared_with_user_id: None,
            access_level: None,
        }
    }

    /// A share grant (or re-grant at a new level).
    pub fn shared(
        kind: AssetKind,
        asset_id: AssetId,
        owner_id: UserId,
        action_by: UserId,
        shared_with: UserId,
        level: AccessLevel,
    ) -> Self {
        let mut event = Self::new(kind, AssetAction::Shared, asset_id, owner_id, action_by);
        event.shared_with_user_id = Some(shared_with);
        event.access_level = Some(level);
        event
    }

    pub fn unshared(
        kind: AssetKind,
        asset_id: AssetId,
        owner_id: UserId,
        action_by: UserId,
        unshared_with: UserId,
    ) -> Self {
        let mut event = Self::new(kind, AssetAction::Unshared, asset_id, owner_id, action_by);
        event.shared_with_user_id = Some(unshared_with);
        event
    }

    pub fn action(&self) -> AssetAction {
        self.event_type.action()
    }

    /// Log key: the asset id.
    pub fn partition_key(&self) -> String {
        self.asset_id.to_string()
    }

    /// Check field combinations that JSON decoding alone cannot enforce.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_type.kind() != self.asset_type {
            return Err(ValidationError::InvalidValue {
                field: "assetType".to_string(),
                reason: format!(
                    "{} does not match event type {:?}",
                    self.asset_type, self.event_type
                ),
            });
        }
        match self.action() {
            AssetAction::Shared | AssetAction::Unshared if self.shared_with_user_id.is_none() => {
                Err(ValidationError::RequiredFieldMissing {
                    field: "sharedWithUserId".to_string(),
                })
            }
            AssetAction::Shared if self.access_level.is_none() => {
                Err(ValidationError::RequiredFieldMissing {
                    field: "accessLevel".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_team_event_wire_format() {
        let by = Uuid::now_v7();
        let target = Uuid::now_v7();
        let event = TeamEvent::member_added(7, by, target);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["eventType"], "MEMBER_ADDED");
        assert_eq!(json["teamId"], "7");
        assert_eq!(json["performedBy"], by.to_string());
        assert_eq!(json["targetUserId"], target.to_string());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_team_created_omits_target() {
        let event = TeamEvent::team_created(3, Uuid::now_v7());
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("targetUserId").is_none());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_team_id_accepts_number_or_string() {
        let by = Uuid::now_v7();
        let as_string = format!(
            r#"{{"eventType":"TEAM_CREATED","teamId":"42","performedBy":"{}","timestamp":"2024-05-01T10:00:00Z"}}"#,
            by
        );
        let as_number = as_string.replace("\"42\"", "42");

        let a: TeamEvent = serde_json::from_str(&as_string).unwrap();
        let b: TeamEvent = serde_json::from_str(&as_number).unwrap();
        assert_eq!(a.team_id, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn test_member_event_without_target_is_invalid() {
        let event = TeamEvent::new(TeamEventType::MemberRemoved, 1, Uuid::now_v7());
        assert!(matches!(
            event.validate(),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
    }

    #[test]
    fn test_asset_share_wire_format() {
        let asset = Uuid::now_v7();
        let owner = Uuid::now_v7();
        let user = Uuid::now_v7();
        let event = AssetEvent::shared(AssetKind::Note, asset, owner, owner, user, AccessLevel::Write);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["eventType"], "NOTE_SHARED");
        assert_eq!(json["assetType"], "note");
        assert_eq!(json["assetId"], asset.to_string());
        assert_eq!(json["sharedWithUserId"], user.to_string());
        assert_eq!(json["accessLevel"], "write");
        assert_eq!(event.partition_key(), asset.to_string());
    }

    #[test]
    fn test_asset_update_omits_share_fields() {
        let id = Uuid::now_v7();
        let owner = Uuid::now_v7();
        let event = AssetEvent::new(AssetKind::Folder, AssetAction::Updated, id, owner, owner);
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("sharedWithUserId").is_none());
        assert!(json.get("accessLevel").is_none());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_asset_event_kind_mismatch_is_invalid() {
        let id = Uuid::now_v7();
        let mut event = AssetEvent::new(AssetKind::Folder, AssetAction::Deleted, id, id, id);
        event.asset_type = AssetKind::Note;
        assert!(matches!(
            event.validate(),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_share_without_level_is_invalid() {
        let id = Uuid::now_v7();
        let mut event =
            AssetEvent::shared(AssetKind::Folder, id, id, id, Uuid::now_v7(), AccessLevel::Read);
        event.access_level = None;
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_event_type_kind_action_consistency() {
        for kind in [AssetKind::Folder, AssetKind::Note] {
            for action in [
                AssetAction::Created,
                AssetAction::Updated,
                AssetAction::Deleted,
                AssetAction::Shared,
                AssetAction::Unshared,
            ] {
                let t = AssetEventType::new(kind, action);
                assert_eq!(t.kind(), kind);
                assert_eq!(t.action(), action);
            }
        }
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::TeamActivity.name(), "team.activity");
        assert_eq!(Topic::AssetChanges.name(), "asset.changes");
        assert_eq!("asset.changes".parse::<Topic>(), Ok(Topic::AssetChanges));
        assert!("other".parse::<Topic>().is_err());
    }
}
