//! FOLIO API - Services over the Relational Store and the Cache
//!
//! This crate holds the source-of-truth store seam, the read-through and
//! write-through cache integration, and the team, folder and note services
//! that mutate the store and publish change events.
//!
//! HTTP routing and token verification live upstream; callers hand every
//! service function an [`AppState`] and a [`RequestContext`].

pub mod auth;
pub mod config;
pub mod error;
pub mod memory_store;
pub mod pg_store;
pub mod read_through;
pub mod services;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod validation;
pub mod write_through;

// Re-export commonly used types
pub use auth::RequestContext;
pub use config::FolioConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use memory_store::InMemoryStore;
pub use pg_store::{DbConfig, PgStore};
pub use read_through::{AccessGrant, GrantSource, ReadThrough};
pub use state::AppState;
pub use store::{FolderDeletion, NewTeam, NoteChanges, SourceOfTruth};
pub use telemetry::{init_tracing, MetricsConfig, TelemetryConfig, METRICS};
pub use write_through::{WriteOutcome, WriteThrough};
