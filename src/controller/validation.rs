//! Validation logic for Extension specs
//!
//! `validate_spec` runs at the start of every reconcile pass, before any
//! lookup or database call. [`SpecDiff`] finds changes to immutable fields for
//! the admission webhook.

use crate::controller::error::{Error, Result};
use crate::crd::{Extension, ExtensionParameters};
use crate::postgres::sql::{MAX_IDENTIFIER_LEN, is_valid_extension_name};

/// Validate the Extension spec
pub fn validate_spec(ext: &Extension) -> Result<()> {
    let params = &ext.spec.for_provider;
    validate_extension_name(&params.extension)?;
    validate_version(params.version.as_deref())?;
    validate_target(params)?;
    Ok(())
}

fn validate_extension_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::ValidationError(
            "extension name must not be empty".to_string(),
        ));
    }
    if !is_valid_extension_name(name) {
        return Err(Error::ValidationError(format!(
            "invalid extension name {:?}: must be at most {} bytes without NUL characters",
            name, MAX_IDENTIFIER_LEN
        )));
    }
    Ok(())
}

fn validate_version(version: Option<&str>) -> Result<()> {
    match version {
        Some(v) if v.trim().is_empty() => Err(Error::ValidationError(
            "version must not be empty when set".to_string(),
        )),
        Some(v) if v.contains('\0') => Err(Error::ValidationError(format!(
            "invalid version {:?}",
            v
        ))),
        _ => Ok(()),
    }
}

/// At least one way of naming the database must be present and usable
fn validate_target(params: &ExtensionParameters) -> Result<()> {
    if !params.has_database_target() {
        return Err(Error::ValidationError(
            "one of database, databaseRef or databaseSelector must be set".to_string(),
        ));
    }

    if let Some(database) = &params.database
        && (database.is_empty() || database.len() > MAX_IDENTIFIER_LEN || database.contains('\0'))
    {
        return Err(Error::ValidationError(format!(
            "invalid database name {:?}",
            database
        )));
    }

    if let Some(reference) = &params.database_ref
        && reference.name.is_empty()
    {
        return Err(Error::ValidationError(
            "databaseRef.name must not be empty".to_string(),
        ));
    }

    Ok(())
}

/// Fields that changed between two versions of an Extension spec
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecDiff {
    pub version_changed: bool,
    /// An existing databaseRef was changed or removed
    pub database_ref_changed: bool,
    /// An existing databaseSelector was changed or removed
    pub database_selector_changed: bool,
}

impl SpecDiff {
    /// Compare two parameter sets
    ///
    /// Setting a reference that was previously unset is not a change: the
    /// controller does exactly that when it records a resolved reference.
    pub fn between(old: &ExtensionParameters, new: &ExtensionParameters) -> Self {
        Self {
            version_changed: old.version != new.version,
            database_ref_changed: old.database_ref.is_some()
                && old.database_ref != new.database_ref,
            database_selector_changed: old.database_selector.is_some()
                && old.database_selector != new.database_selector,
        }
    }

    pub fn has_immutable_changes(&self) -> bool {
        self.version_changed
            || self.database_ref_changed
            || self.database_selector_changed
    }
}
