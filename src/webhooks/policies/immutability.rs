//! Immutability policies
//!
//! - `version` cannot be changed after creation
//! - `databaseRef` and `databaseSelector` cannot be changed or removed once set
//!
//! Setting a previously empty `databaseRef` is allowed because the controller
//! records resolved references that way.

use super::{ValidationContext, ValidationResult};
use crate::controller::validation::SpecDiff;

/// Validate immutable fields on UPDATE
pub fn validate_immutability(ctx: &ValidationContext) -> ValidationResult {
    // Only apply immutability checks on UPDATE, not CREATE
    let Some(old) = ctx.old_extension else {
        return ValidationResult::allowed();
    };

    let old_params = &old.spec.for_provider;
    let new_params = &ctx.extension.spec.for_provider;
    let diff = SpecDiff::between(old_params, new_params);

    if diff.version_changed {
        return ValidationResult::denied(
            "VersionImmutable",
            &format!(
                "version cannot be changed after creation. Current: {}, requested: {}. Delete and recreate the Extension to change versions.",
                old_params.version.as_deref().unwrap_or("<default>"),
                new_params.version.as_deref().unwrap_or("<default>")
            ),
        );
    }

    if diff.database_ref_changed {
        return ValidationResult::denied(
            "DatabaseRefImmutable",
            "databaseRef cannot be changed or removed once set",
        );
    }

    if diff.database_selector_changed {
        return ValidationResult::denied(
            "DatabaseSelectorImmutable",
            "databaseSelector cannot be changed or removed once set",
        );
    }

    ValidationResult::allowed()
}
