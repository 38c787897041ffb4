//! FOLIO Core - Entity Types
//!
//! Pure data structures shared by the cache, the event log and the API layer.
//! This crate contains ONLY data types - no I/O.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod entities;
pub mod enums;
pub mod error;
pub mod event;

pub use entities::*;
pub use enums::*;
pub use error::*;
pub use event::*;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// User identifier. Issued by the external identity service.
pub type UserId = Uuid;

/// Folder or note identifier (UUIDv7, timestamp-sortable).
pub type AssetId = Uuid;

/// Share row identifier.
pub type ShareId = Uuid;

/// Team identifier (serial column in the relational store).
pub type TeamId = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 asset id.
pub fn new_asset_id() -> AssetId {
    Uuid::now_v7()
}
