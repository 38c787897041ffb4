//! Service Layer
//!
//! Team, folder and note operations. Each mutating call commits to the
//! source of truth first, then updates its own cache inline and publishes
//! the matching event through [`WriteThrough`](crate::write_through::WriteThrough).

mod folder_service;
mod note_service;
mod team_service;

pub use folder_service::*;
pub use note_service::*;
pub use team_service::*;

use folio_core::{
    AccessError, AccessLevel, AssetId, AssetKind, FolioError, FolioResult, UserId, ValidationError,
};

use crate::auth::RequestContext;
use crate::read_through::AccessGrant;

fn conflict(constraint: &str, reason: impl Into<String>) -> FolioError {
    ValidationError::ConstraintViolation {
        constraint: constraint.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn require_grant(
    grant: Option<AccessGrant>,
    kind: AssetKind,
    asset_id: AssetId,
    required: AccessLevel,
) -> FolioResult<AccessGrant> {
    match grant {
        Some(grant) if grant.allows(required) => Ok(grant),
        _ => Err(AccessError::Insufficient {
            kind,
            asset_id,
            required,
        }
        .into()),
    }
}

fn require_owner(ctx: &RequestContext, owner_id: UserId, kind: AssetKind, asset_id: AssetId) -> FolioResult<()> {
    if ctx.user_id != owner_id {
        return Err(AccessError::NotOwner { kind, asset_id }.into());
    }
    Ok(())
}

fn reject_self_share(ctx: &RequestContext, user_id: UserId) -> FolioResult<()> {
    if ctx.user_id == user_id {
        return Err(conflict("share_target", "Cannot share an asset with yourself"));
    }
    Ok(())
}
