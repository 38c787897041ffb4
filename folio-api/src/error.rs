//! Error Types for the FOLIO API layer
//!
//! `ApiError` is what a transport returns to a caller: an [`ErrorCode`]
//! that fixes the HTTP status, plus a message. It serializes to the body a
//! router would send; no router is mounted here. Every [`FolioError`] maps to
//! exactly one code; cache and event log failures never reach a caller
//! because both are degraded to log lines before they get here.

use axum::http::StatusCode;
use folio_core::{FolioError, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authorization Errors (403)
    // ========================================================================
    /// Caller lacks permission for the resource
    Forbidden,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    ValidationFailed,
    MissingField,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    EntityNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    EntityAlreadyExists,

    /// Operation conflicts with current state (e.g. removing the last manager)
    StateConflict,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    InternalError,
    DatabaseError,
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,

            ErrorCode::ValidationFailed | ErrorCode::MissingField => StatusCode::BAD_REQUEST,

            ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,

            ErrorCode::EntityAlreadyExists | ErrorCode::StateConflict => StatusCode::CONFLICT,

            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::InternalError | ErrorCode::DatabaseError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Forbidden => "Access forbidden",
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::EntityAlreadyExists => "Entity already exists",
            ErrorCode::StateConflict => "Operation conflicts with current state",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EntityNotFound, message)
    }

    pub fn state_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StateConflict, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<FolioError> for ApiError {
    fn from(err: FolioError) -> Self {
        match err {
            FolioError::Store(StoreError::NotFound { .. }) => ApiError::not_found(err.to_string()),
            FolioError::Store(StoreError::AlreadyExists { .. }) => {
                ApiError::new(ErrorCode::EntityAlreadyExists, err.to_string())
            }
            FolioError::Store(StoreError::Pool { .. }) => {
                tracing::error!(error = %err, "Connection pool error");
                ApiError::from_code(ErrorCode::ServiceUnavailable)
            }
            FolioError::Store(_) => {
                // Keep query details out of responses.
                tracing::error!(error = %err, "Database error");
                ApiError::from_code(ErrorCode::DatabaseError)
            }
            FolioError::Access(ref access) => ApiError::forbidden(access.to_string()),
            FolioError::Validation(folio_core::ValidationError::RequiredFieldMissing {
                ref field,
            }) => ApiError::new(
                ErrorCode::MissingField,
                format!("Required field '{}' is missing", field),
            ),
            FolioError::Validation(folio_core::ValidationError::ConstraintViolation {
                ref reason,
                ..
            }) => ApiError::state_conflict(reason.clone()),
            FolioError::Validation(ref v) => {
                ApiError::new(ErrorCode::ValidationFailed, v.to_string())
            }
            FolioError::Cache(_) | FolioError::EventLog(_) | FolioError::Config(_) => {
                tracing::error!(error = %err, "Internal error");
                ApiError::from_code(ErrorCode::InternalError)
            }
        }
    }
}

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{AccessError, AssetKind, EntityKind, ValidationError};
    use uuid::Uuid;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::ValidationFailed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::EntityNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::StateConflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::DatabaseError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_from_folio_error() {
        let err: ApiError = FolioError::from(StoreError::not_found(EntityKind::Team, 7)).into();
        assert_eq!(err.code, ErrorCode::EntityNotFound);

        let err: ApiError = FolioError::from(AccessError::NotOwner {
            kind: AssetKind::Folder,
            asset_id: Uuid::nil(),
        })
        .into();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let err: ApiError = FolioError::from(ValidationError::ConstraintViolation {
            constraint: "last_manager".to_string(),
            reason: "team must keep a manager".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::StateConflict);

        let err: ApiError = FolioError::from(StoreError::QueryFailed {
            reason: "syntax error at SELECT".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert!(!err.message.contains("SELECT"));
    }

    #[test]
    fn test_pool_error_body_is_transport_neutral() -> Result<(), serde_json::Error> {
        let err: ApiError = FolioError::from(StoreError::Pool {
            reason: "timed out waiting for connection to db-primary:5432".to_string(),
        })
        .into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let body = serde_json::to_value(&err)?;
        assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
        assert_eq!(body["message"], "Service temporarily unavailable");
        Ok(())
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::forbidden("Only the owner may share");
        let json = serde_json::to_string(&err)?;
        assert!(json.contains("FORBIDDEN"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }
}
