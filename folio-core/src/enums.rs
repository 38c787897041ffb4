//! Enum types for FOLIO entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ACCESS LEVEL
// ============================================================================

/// Access level granted by a share.
///
/// `Write` implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
}

impl AccessLevel {
    /// Convert to the string stored in share tables and ACL maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
        }
    }

    /// Whether a grant at this level satisfies `required`.
    pub fn allows(&self, required: AccessLevel) -> bool {
        *self >= required
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::Write),
            _ => Err(ParseEnumError::new("access level", s)),
        }
    }
}

// ============================================================================
// ASSET KIND
// ============================================================================

/// The two kinds of shareable asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Folder,
    Note,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Folder => "folder",
            AssetKind::Note => "note",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "folder" => Ok(AssetKind::Folder),
            "note" => Ok(AssetKind::Note),
            _ => Err(ParseEnumError::new("asset kind", s)),
        }
    }
}

// ============================================================================
// ROLES
// ============================================================================

/// Role of a user inside one team's roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TeamRole {
    #[default]
    Member,
    Manager,
}

impl TeamRole {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TeamRole::Member => "MEMBER",
            TeamRole::Manager => "MANAGER",
        }
    }

    pub fn is_manager(&self) -> bool {
        matches!(self, TeamRole::Manager)
    }
}

impl fmt::Display for TeamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for TeamRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MEMBER" => Ok(TeamRole::Member),
            "MANAGER" | "MAIN_MANAGER" => Ok(TeamRole::Manager),
            _ => Err(ParseEnumError::new("team role", s)),
        }
    }
}

/// Global role of an authenticated user, issued by the identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    #[default]
    Member,
    Manager,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Member => "MEMBER",
            UserRole::Manager => "MANAGER",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MEMBER" => Ok(UserRole::Member),
            "MANAGER" => Ok(UserRole::Manager),
            _ => Err(ParseEnumError::new("user role", s)),
        }
    }
}

// ============================================================================
// ENTITY KIND
// ============================================================================

/// Entity discriminator used in store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Team,
    RosterEntry,
    Folder,
    Note,
    Share,
}

impl From<AssetKind> for EntityKind {
    fn from(kind: AssetKind) -> Self {
        match kind {
            AssetKind::Folder => EntityKind::Folder,
            AssetKind::Note => EntityKind::Note,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            EntityKind::Team => "Team",
            EntityKind::RosterEntry => "RosterEntry",
            EntityKind::Folder => "Folder",
            EntityKind::Note => "Note",
            EntityKind::Share => "Share",
        };
        f.write_str(value)
    }
}

/// Error when parsing an invalid enum string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}
