//! Field policies
//!
//! Rejects Extensions the reconciler could never act on: an empty or
//! over-long extension name, a blank version, or no way of naming the
//! target database.

use super::{ValidationContext, ValidationResult};
use crate::controller::validation::validate_spec;

/// Validate the fields of the incoming Extension
pub fn validate_fields(ctx: &ValidationContext) -> ValidationResult {
    // Let objects that are being deleted through
    if ctx.extension.metadata.deletion_timestamp.is_some() {
        return ValidationResult::allowed();
    }

    match validate_spec(ctx.extension) {
        Ok(()) => ValidationResult::allowed(),
        Err(e) => ValidationResult::denied("InvalidSpec", &e.to_string()),
    }
}
