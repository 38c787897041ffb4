//! Error types for FOLIO operations

use crate::{AccessLevel, AssetId, AssetKind, EntityKind, TeamId};
use thiserror::Error;

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache command {operation} failed on {key}: {reason}")]
    Command {
        operation: &'static str,
        key: String,
        reason: String,
    },

    #[error("Cached value under {key} could not be decoded: {reason}")]
    Codec { key: String, reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Event log errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventLogError {
    #[error("Event log backend error: {reason}")]
    Backend { reason: String },

    #[error("Event log transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Unknown topic: {topic}")]
    UnknownTopic { topic: String },

    #[error("Partition {partition} out of range for {topic} ({count} partitions)")]
    PartitionOutOfRange {
        topic: String,
        partition: u32,
        count: u32,
    },

    #[error("Failed to encode event: {reason}")]
    Encode { reason: String },

    #[error("Failed to decode event at {topic}/{partition}@{offset}: {reason}")]
    Decode {
        topic: String,
        partition: u32,
        offset: u64,
        reason: String,
    },

    #[error("Event log lock poisoned")]
    LockPoisoned,
}

/// Source-of-truth store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: EntityKind, id: String },

    #[error("Entity already exists: {entity} with id {id}")]
    AlreadyExists { entity: EntityKind, id: String },

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Connection pool error: {reason}")]
    Pool { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn not_found(entity: impl Into<EntityKind>, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },
}

/// Authorization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("Only the owner may perform this action on {kind} {asset_id}")]
    NotOwner { kind: AssetKind, asset_id: AssetId },

    #[error("{required} access required on {kind} {asset_id}")]
    Insufficient {
        kind: AssetKind,
        asset_id: AssetId,
        required: AccessLevel,
    },

    #[error("Only team managers may perform this action on team {team_id}")]
    NotTeamManager { team_id: TeamId },

    #[error("Role {role} required")]
    RoleRequired { role: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all FOLIO errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FolioError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl FolioError {
    /// Whether this error means the requested row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FolioError::Store(StoreError::NotFound { .. }))
    }
}

/// Result type alias for FOLIO operations.
pub type FolioResult<T> = Result<T, FolioError>;

// =============================================================================
// TESTS
// =============================================================================
