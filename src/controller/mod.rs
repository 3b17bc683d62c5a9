pub mod context;
pub mod error;
pub mod extension_reconciler;
pub mod pass;
pub mod resolver;
pub mod status;
pub mod validation;

pub use context::Context;
pub use error::{BackoffConfig, Error, ResolutionFailure, Result, RetryTracker};
pub use extension_reconciler::{FINALIZER, error_policy, reconcile};
pub use pass::{ExtensionState, PassAction, PassOutcome, ReconcilePass};
pub use resolver::{
    DatabaseLookup, KubeDatabaseLookup, ResolvedTarget, TargetSource, resolve_database,
};
pub use status::{ConditionBuilder, conditions_changed, conditions_for, ready_condition};
pub use validation::{SpecDiff, validate_spec};
