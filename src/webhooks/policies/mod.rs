//! Admission webhook policies
//!
//! Each policy module exports a `validate` function that checks specific rules.

pub mod immutability;
pub mod spec;

pub use immutability::validate_immutability;
pub use spec::validate_fields;

use crate::crd::Extension;

/// Result of a policy validation
#[derive(Debug)]
pub struct ValidationResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

/// Context for validation including old object for UPDATE operations
pub struct ValidationContext<'a> {
    pub extension: &'a Extension,
    pub old_extension: Option<&'a Extension>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(extension: &'a Extension, old_extension: Option<&'a Extension>) -> Self {
        Self {
            extension,
            old_extension,
        }
    }
}

/// Run all validation policies and return the first failure
pub fn validate_all(ctx: &ValidationContext) -> ValidationResult {
    let policies: [fn(&ValidationContext) -> ValidationResult; 2] =
        [validate_fields, validate_immutability];

    for policy in policies {
        let result = policy(ctx);
        if !result.allowed {
            return result;
        }
    }

    ValidationResult::allowed()
}
