//! Validation Traits
//!
//! Common input checks shared by the services.

use folio_core::ValidationError;

/// Maximum length of a team or folder name.
pub const MAX_NAME_LEN: usize = 150;

/// Maximum length of a note title.
pub const MAX_TITLE_LEN: usize = 255;

/// Trait for validating non-empty strings.
///
/// # Example
/// ```ignore
/// use folio_api::validation::ValidateNonEmpty;
///
/// fn rename(name: &str) -> Result<(), ValidationError> {
///     name.validate_non_empty("folderName")?;
///     Ok(())
/// }
/// ```
pub trait ValidateNonEmpty {
    /// Returns `RequiredFieldMissing` if the value is empty or whitespace-only.
    fn validate_non_empty(&self, field_name: &str) -> Result<(), ValidationError>;
}

impl ValidateNonEmpty for str {
    fn validate_non_empty(&self, field_name: &str) -> Result<(), ValidationError> {
        if self.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: field_name.to_string(),
            });
        }
        Ok(())
    }
}

impl ValidateNonEmpty for String {
    fn validate_non_empty(&self, field_name: &str) -> Result<(), ValidationError> {
        self.as_str().validate_non_empty(field_name)
    }
}

impl<T: ValidateNonEmpty> ValidateNonEmpty for Option<T> {
    fn validate_non_empty(&self, field_name: &str) -> Result<(), ValidationError> {
        match self {
            Some(value) => value.validate_non_empty(field_name),
            None => Err(ValidationError::RequiredFieldMissing {
                field: field_name.to_string(),
            }),
        }
    }
}

/// Trait for validating string length in characters.
pub trait ValidateLength {
    fn validate_max_len(&self, field_name: &str, max: usize) -> Result<(), ValidationError>;
}

impl ValidateLength for str {
    fn validate_max_len(&self, field_name: &str, max: usize) -> Result<(), ValidationError> {
        let len = self.chars().count();
        if len > max {
            return Err(ValidationError::InvalidValue {
                field: field_name.to_string(),
                reason: format!("must be at most {} characters, got {}", max, len),
            });
        }
        Ok(())
    }
}

/// Trim and check a required name field.
pub fn required_name(field_name: &str, value: &str, max: usize) -> Result<String, ValidationError> {
    value.validate_non_empty(field_name)?;
    let trimmed = value.trim();
    trimmed.validate_max_len(field_name, max)?;
    Ok(trimmed.to_string())
}

// =============================================================================
// TESTS
// =============================================================================
