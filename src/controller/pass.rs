//! One reconcile pass for an Extension
//!
//! A pass validates the Extension spec, resolves the target database, builds a client
//! from the ProviderConfig, observes the extension, takes at most one
//! corrective action and observes again after a mutation. It never touches
//! the Extension object itself: the result is a [`PassOutcome`] that the
//! caller turns into a spec write-back, conditions and a finalizer decision.
//!
//! ```text
//! Missing ──create──► PresentSynced ◄──update── PresentDrifted
//!    │                     │                          │
//!    └─────────────────────┴──────► Deleting ◄────────┘
//!                                      │ drop (unless Orphan)
//!                                      ▼
//!                               finalizer removed
//! ```

use std::time::Duration;

use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::error::Error;
use crate::controller::resolver::{DatabaseLookup, ResolvedTarget, resolve_database};
use crate::controller::validation::validate_spec;
use crate::crd::{DeletionPolicy, Extension, Managed};
use crate::postgres::{ClientFactory, Observation};

/// Where an extension stands relative to its spec
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtensionState {
    Missing,
    PresentDrifted,
    PresentSynced,
    Deleting,
}

impl ExtensionState {
    pub fn from_observation(observation: &Observation) -> Self {
        match (observation.exists, observation.up_to_date) {
            (false, _) => ExtensionState::Missing,
            (true, false) => ExtensionState::PresentDrifted,
            (true, true) => ExtensionState::PresentSynced,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionState::Missing => "Missing",
            ExtensionState::PresentDrifted => "PresentDrifted",
            ExtensionState::PresentSynced => "PresentSynced",
            ExtensionState::Deleting => "Deleting",
        }
    }
}

impl std::fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mutation a pass performed, if any
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PassAction {
    #[default]
    None,
    Created,
    Updated,
    Dropped,
    /// Deletion left the extension in place
    Orphaned,
}

impl PassAction {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            PassAction::Created | PassAction::Updated | PassAction::Dropped
        )
    }
}

/// Everything a pass learned and did
#[derive(Debug, Default)]
pub struct PassOutcome {
    /// State derived from the last successful observation
    pub state: Option<ExtensionState>,
    pub target: Option<ResolvedTarget>,
    /// Last successful observation, post-action when a mutation happened
    pub observation: Option<Observation>,
    pub action: PassAction,
    pub error: Option<Error>,
    /// The finalizer may be removed
    pub release_finalizer: bool,
}

impl PassOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the extension is installed at the requested version
    pub fn is_available(&self) -> bool {
        self.observation
            .as_ref()
            .is_some_and(|o| o.exists && o.up_to_date)
    }

    fn failed(mut self, error: Error) -> Self {
        self.error = Some(error);
        self
    }
}

/// Runs passes against a Database lookup and a client factory
pub struct ReconcilePass<'a> {
    lookup: &'a dyn DatabaseLookup,
    factory: &'a dyn ClientFactory,
}

impl<'a> ReconcilePass<'a> {
    pub fn new(lookup: &'a dyn DatabaseLookup, factory: &'a dyn ClientFactory) -> Self {
        Self { lookup, factory }
    }

    /// Run one pass; errors are captured in the outcome
    pub async fn run(&self, ext: &Extension) -> PassOutcome {
        if ext.metadata.deletion_timestamp.is_some() {
            self.run_deletion(ext).await
        } else {
            self.run_sync(ext).await
        }
    }

    /// Run one pass, abandoning it once `deadline` elapses
    ///
    /// An abandoned pass reports [`Error::Timeout`], which is retried.
    pub async fn run_with_deadline(&self, ext: &Extension, deadline: Duration) -> PassOutcome {
        match tokio::time::timeout(deadline, self.run(ext)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(timeout = ?deadline, "Reconcile pass timed out");
                PassOutcome {
                    state: ext
                        .metadata
                        .deletion_timestamp
                        .as_ref()
                        .map(|_| ExtensionState::Deleting),
                    error: Some(Error::Timeout(deadline)),
                    ..Default::default()
                }
            }
        }
    }

    async fn run_sync(&self, ext: &Extension) -> PassOutcome {
        let mut outcome = PassOutcome::default();

        if let Err(e) = validate_spec(ext) {
            return outcome.failed(e);
        }

        let target = match resolve_database(ext, self.lookup).await {
            Ok(target) => target,
            Err(e) => return outcome.failed(e),
        };
        let database = target.database.clone();
        outcome.target = Some(target);

        let client = match self.factory.connect(ext.provider_config_name()).await {
            Ok(client) => client,
            Err(e) => return outcome.failed(e),
        };

        let params = &ext.spec.for_provider;
        let extension = params.extension.as_str();
        let version = params.version.as_deref();

        let observation = match client.observe(&database, extension, version).await {
            Ok(observation) => observation,
            Err(e) => return outcome.failed(e),
        };
        let state = ExtensionState::from_observation(&observation);
        outcome.state = Some(state);
        outcome.observation = Some(observation);
        debug!(
            name = %ext.name_any(),
            database = %database,
            state = %state,
            "Observed extension"
        );

        let applied = match state {
            ExtensionState::Missing => client
                .create(&database, extension, version)
                .await
                .map(|_| PassAction::Created),
            ExtensionState::PresentDrifted => client
                .update(&database, extension, version)
                .await
                .map(|_| PassAction::Updated),
            ExtensionState::PresentSynced | ExtensionState::Deleting => Ok(PassAction::None),
        };
        outcome.action = match applied {
            Ok(action) => action,
            Err(e) => return outcome.failed(e),
        };

        if outcome.action.is_mutation() {
            info!(
                name = %ext.name_any(),
                database = %database,
                extension = %extension,
                action = ?outcome.action,
                "Applied extension change"
            );
            match client.observe(&database, extension, version).await {
                Ok(observation) => {
                    outcome.state = Some(ExtensionState::from_observation(&observation));
                    outcome.observation = Some(observation);
                }
                Err(e) => return outcome.failed(e),
            }
        }

        outcome
    }

    async fn run_deletion(&self, ext: &Extension) -> PassOutcome {
        let mut outcome = PassOutcome {
            state: Some(ExtensionState::Deleting),
            ..Default::default()
        };
        let name = ext.name_any();

        if ext.deletion_policy() == DeletionPolicy::Orphan {
            info!(name = %name, "Deletion policy is Orphan, leaving extension in place");
            outcome.action = PassAction::Orphaned;
            outcome.release_finalizer = true;
            return outcome;
        }

        // An Extension that never resolved a database cannot have installed anything
        let target = match validate_spec(ext) {
            Ok(()) => resolve_database(ext, self.lookup).await,
            Err(e) => Err(e),
        };
        let target = match target {
            Ok(target) => target,
            Err(e) if e.is_persistent() => {
                warn!(name = %name, error = %e, "Cannot resolve database during deletion, skipping drop");
                outcome.release_finalizer = true;
                return outcome;
            }
            Err(e) => return outcome.failed(e),
        };
        let database = target.database.clone();
        outcome.target = Some(target);

        let client = match self.factory.connect(ext.provider_config_name()).await {
            Ok(client) => client,
            Err(e) => return outcome.failed(e),
        };

        match client.delete(&database, &ext.spec.for_provider.extension).await {
            Ok(()) => {
                outcome.action = PassAction::Dropped;
                outcome.release_finalizer = true;
            }
            Err(Error::NotFoundError(msg)) => {
                warn!(name = %name, database = %database, reason = %msg, "Database is gone, nothing to drop");
                outcome.release_finalizer = true;
            }
            Err(e) => return outcome.failed(e),
        }

        outcome
    }
}
