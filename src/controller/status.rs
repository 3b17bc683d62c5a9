//! Status and conditions management for Extension resources
//!
//! Each pass ends by deriving the `Ready` and `Synced` conditions from its
//! [`PassOutcome`]. A condition keeps its `lastTransitionTime` until its
//! status value changes, and the status subresource is only patched when a
//! condition actually differs from what is stored.

use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde_json::json;

use crate::controller::error::{Error, ResolutionFailure, Result};
use crate::controller::pass::{ExtensionState, PassOutcome};
use crate::crd::{Condition, Conditioned, Extension};

/// Condition types maintained on every managed resource
pub mod condition_types {
    /// The extension is installed at the requested version
    pub const READY: &str = "Ready";
    /// The last reconcile pass completed without error
    pub const SYNCED: &str = "Synced";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Condition reasons
pub mod condition_reasons {
    pub const AVAILABLE: &str = "Available";
    pub const CREATING: &str = "Creating";
    pub const DRIFTED: &str = "Drifted";
    pub const UNAVAILABLE: &str = "Unavailable";
    pub const DELETING: &str = "Deleting";
    pub const REFERENCE_NOT_FOUND: &str = "ReferenceNotFound";
    pub const VALIDATION_ERROR: &str = "ValidationError";
    pub const RECONCILE_SUCCESS: &str = "ReconcileSuccess";
}

use condition_reasons as reasons;

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    /// Create from existing conditions
    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't
    pub fn set_condition(
        mut self,
        type_: &str,
        status: &str,
        reason: &str,
        message: Option<String>,
    ) -> Self {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            // Transition time only moves when the status value changes
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = Utc::now().to_rfc3339();
            }
            existing.reason = reason.to_string();
            existing.message = message;
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message,
                last_transition_time: Utc::now().to_rfc3339(),
                observed_generation: self.generation,
            });
        }
        self
    }

    /// Set the Ready condition
    pub fn ready(self, status: &str, reason: &str, message: Option<String>) -> Self {
        self.set_condition(condition_types::READY, status, reason, message)
    }

    /// Set the Synced condition from the pass error, if any
    pub fn synced(self, error: Option<&Error>) -> Self {
        match error {
            None => self.set_condition(
                condition_types::SYNCED,
                condition_status::TRUE,
                reasons::RECONCILE_SUCCESS,
                None,
            ),
            Some(e) => self.set_condition(
                condition_types::SYNCED,
                condition_status::FALSE,
                e.reason(),
                Some(e.to_string()),
            ),
        }
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Status, reason and message of the Ready condition for a pass
pub fn ready_condition(outcome: &PassOutcome) -> (&'static str, &'static str, Option<String>) {
    use condition_status::{FALSE, TRUE, UNKNOWN};

    if outcome.state == Some(ExtensionState::Deleting) {
        return (FALSE, reasons::DELETING, None);
    }

    match &outcome.error {
        Some(e @ Error::ValidationError(_)) => {
            return (FALSE, reasons::VALIDATION_ERROR, Some(e.to_string()));
        }
        Some(
            e @ Error::ReferenceResolutionError {
                failure: ResolutionFailure::NotFound,
                ..
            },
        ) => return (FALSE, reasons::REFERENCE_NOT_FOUND, Some(e.to_string())),
        _ => {}
    }

    match &outcome.observation {
        Some(o) if o.exists && o.up_to_date => (TRUE, reasons::AVAILABLE, None),
        Some(o) if o.exists => (
            FALSE,
            reasons::DRIFTED,
            o.version
                .as_ref()
                .map(|v| format!("installed version {} differs from the requested one", v)),
        ),
        Some(_) => (FALSE, reasons::CREATING, None),
        None => match &outcome.error {
            Some(e @ Error::NotFoundError(_)) => {
                (FALSE, reasons::UNAVAILABLE, Some(e.to_string()))
            }
            Some(e) => (UNKNOWN, reasons::UNAVAILABLE, Some(e.to_string())),
            None => (UNKNOWN, reasons::UNAVAILABLE, None),
        },
    }
}

/// Derive the full condition set for an Extension after a pass
pub fn conditions_for(ext: &Extension, outcome: &PassOutcome) -> Vec<Condition> {
    let (status, reason, message) = ready_condition(outcome);
    ConditionBuilder::from_existing(ext.conditions().to_vec(), ext.metadata.generation)
        .ready(status, reason, message)
        .synced(outcome.error.as_ref())
        .build()
}

/// Whether two condition sets differ in anything but ordering
pub fn conditions_changed(current: &[Condition], desired: &[Condition]) -> bool {
    current.len() != desired.len()
        || desired
            .iter()
            .any(|d| !current.iter().any(|c| c == d))
}

/// Patch the status subresource when the conditions changed
///
/// Returns whether a patch was sent.
pub async fn update_status(
    api: &Api<Extension>,
    ext: &Extension,
    conditions: Vec<Condition>,
) -> Result<bool> {
    if !conditions_changed(ext.conditions(), &conditions) {
        return Ok(false);
    }

    let patch = json!({
        "status": {
            "conditions": conditions
        }
    });
    api.patch_status(
        &ext.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(true)
}
