//! Test fixtures for Extension and Database resources plus in-memory
//! stand-ins for the API server lookup and the PostgreSQL client
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let ext = ExtensionBuilder::new("pgcrypto-orders", "pgcrypto")
//!     .with_version("1.3")
//!     .with_database_ref("db-a")
//!     .build();
//!
//! let client = Arc::new(FakeClient::new());
//! let factory = FakeFactory::new(client.clone());
//! let lookup = FakeLookup::new(vec![database("db-a", &[])]);
//! let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use kube::core::ObjectMeta;
use postgres_extension_operator::controller::{DatabaseLookup, Error, ResolutionFailure, Result};
use postgres_extension_operator::crd::{
    Condition, Database, DatabaseSpec, DeletionPolicy, Extension, ExtensionParameters,
    ExtensionSpec, ExtensionStatus, Reference, ReferencePolicy, ResolutionPolicy, ResolvePolicy,
    ResourceSpec, ResourceStatus, Selector,
};
use postgres_extension_operator::postgres::{ClientFactory, ExtensionClient, Observation};

/// Version a fake extension gets when created without an explicit one
pub const DEFAULT_EXTENSION_VERSION: &str = "1.0";

// =============================================================================
// Resource builders
// =============================================================================

/// Builder for Extension resources
pub struct ExtensionBuilder {
    ext: Extension,
}

impl ExtensionBuilder {
    pub fn new(name: &str, extension: &str) -> Self {
        let mut ext = Extension::new(
            name,
            ExtensionSpec {
                resource: ResourceSpec::default(),
                for_provider: ExtensionParameters {
                    extension: extension.to_string(),
                    ..Default::default()
                },
            },
        );
        ext.metadata.uid = Some(format!("{}-uid", name));
        ext.metadata.generation = Some(1);
        Self { ext }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.ext.spec.for_provider.version = Some(version.to_string());
        self
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.ext.spec.for_provider.database = Some(database.to_string());
        self
    }

    pub fn with_database_ref(mut self, name: &str) -> Self {
        self.ext.spec.for_provider.database_ref = Some(Reference::new(name));
        self
    }

    /// Reference that must be confirmed against the API server on every pass
    pub fn with_database_ref_always(mut self, name: &str) -> Self {
        self.ext.spec.for_provider.database_ref = Some(Reference {
            name: name.to_string(),
            policy: Some(ReferencePolicy {
                resolution: ResolutionPolicy::Required,
                resolve: ResolvePolicy::Always,
            }),
        });
        self
    }

    /// Reference checked on every pass that falls back to `database` when missing
    pub fn with_optional_database_ref_always(mut self, name: &str) -> Self {
        self.ext.spec.for_provider.database_ref = Some(Reference {
            name: name.to_string(),
            policy: Some(ReferencePolicy {
                resolution: ResolutionPolicy::Optional,
                resolve: ResolvePolicy::Always,
            }),
        });
        self
    }

    pub fn with_selector(mut self, labels: &[(&str, &str)]) -> Self {
        self.ext.spec.for_provider.database_selector = Some(Selector {
            match_labels: labels_map(labels),
            ..Default::default()
        });
        self
    }

    /// Mark the selector optional; requires `with_selector` first
    pub fn optional_selector(mut self) -> Self {
        if let Some(selector) = self.ext.spec.for_provider.database_selector.as_mut() {
            selector.policy = Some(ReferencePolicy {
                resolution: ResolutionPolicy::Optional,
                resolve: ResolvePolicy::IfNotPresent,
            });
        }
        self
    }

    /// Restrict the selector to Databases sharing this Extension's controller
    pub fn matching_controller_ref(mut self) -> Self {
        if let Some(selector) = self.ext.spec.for_provider.database_selector.as_mut() {
            selector.match_controller_ref = Some(true);
        }
        self
    }

    pub fn controlled_by(mut self, uid: &str) -> Self {
        self.ext.metadata.owner_references = Some(vec![controller_ref(uid)]);
        self
    }

    pub fn with_provider_config(mut self, name: &str) -> Self {
        self.ext.spec.resource.provider_config_ref = Reference::new(name);
        self
    }

    pub fn orphan_on_delete(mut self) -> Self {
        self.ext.spec.resource.deletion_policy = DeletionPolicy::Orphan;
        self
    }

    pub fn deleting(mut self) -> Self {
        self.ext.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        self
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.ext.metadata.generation = Some(generation);
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.ext.status = Some(ExtensionStatus {
            resource: ResourceStatus { conditions },
        });
        self
    }

    pub fn build(self) -> Extension {
        self.ext
    }
}

/// A Database resource with the given labels
pub fn database(name: &str, labels: &[(&str, &str)]) -> Database {
    Database {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(format!("{}-uid", name)),
            labels: Some(labels_map(labels)),
            ..Default::default()
        },
        spec: DatabaseSpec::default(),
        status: None,
    }
}

/// A Database resource controlled by the owner with `uid`
pub fn database_controlled_by(name: &str, labels: &[(&str, &str)], uid: &str) -> Database {
    let mut db = database(name, labels);
    db.metadata.owner_references = Some(vec![controller_ref(uid)]);
    db
}

fn controller_ref(uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: "postgres-operator.smoketurner.com/v1alpha1".to_string(),
        kind: "Composite".to_string(),
        name: format!("owner-{}", uid),
        uid: uid.to_string(),
        controller: Some(true),
        block_owner_deletion: None,
    }
}

fn labels_map(labels: &[(&str, &str)]) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// =============================================================================
// Database lookup
// =============================================================================

/// In-memory Database store that counts lookups
pub struct FakeLookup {
    databases: Vec<Database>,
    fail_with: Option<String>,
    gets: AtomicUsize,
    lists: AtomicUsize,
}

impl FakeLookup {
    pub fn new(databases: Vec<Database>) -> Self {
        Self {
            databases,
            fail_with: None,
            gets: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Every lookup fails as if the API server were unreachable
    pub fn unreachable(message: &str) -> Self {
        let mut lookup = Self::empty();
        lookup.fail_with = Some(message.to_string());
        lookup
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.gets() + self.lists()
    }

    fn check_reachable(&self) -> Result<()> {
        match &self.fail_with {
            Some(message) => Err(Error::ReferenceResolutionError {
                failure: ResolutionFailure::Lookup,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DatabaseLookup for FakeLookup {
    async fn get(&self, name: &str) -> Result<Option<Database>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        Ok(self
            .databases
            .iter()
            .find(|db| db.metadata.name.as_deref() == Some(name))
            .cloned())
    }

    async fn list(&self, label_selector: &str) -> Result<Vec<Database>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        let wanted: Vec<(&str, &str)> = label_selector
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|pair| pair.split_once('='))
            .collect();

        Ok(self
            .databases
            .iter()
            .filter(|db| {
                let labels = db.metadata.labels.clone().unwrap_or_default();
                wanted
                    .iter()
                    .all(|(k, v)| labels.get(*k).map(String::as_str) == Some(*v))
            })
            .cloned()
            .collect())
    }
}

// =============================================================================
// PostgreSQL client
// =============================================================================

/// In-memory PostgreSQL cluster tracking installed extensions per database
///
/// Mirrors the idempotent SQL the real client issues: create is
/// `IF NOT EXISTS`, drop is `IF EXISTS`.
#[derive(Default)]
pub struct FakeClient {
    /// (database, extension) -> installed version
    installed: Mutex<HashMap<(String, String), String>>,
    missing_databases: HashSet<String>,
    fail_create: Option<String>,
    unresponsive: bool,
    creates: Mutex<Vec<(String, String, Option<String>)>>,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    observes: AtomicUsize,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-install an extension
    pub fn with_installed(self, database: &str, extension: &str, version: &str) -> Self {
        self.installed.lock().unwrap().insert(
            (database.to_string(), extension.to_string()),
            version.to_string(),
        );
        self
    }

    /// Any operation against `database` fails with `NotFoundError`
    pub fn without_database(mut self, database: &str) -> Self {
        self.missing_databases.insert(database.to_string());
        self
    }

    pub fn failing_create(mut self, message: &str) -> Self {
        self.fail_create = Some(message.to_string());
        self
    }

    /// No call ever completes, as with a server that stopped answering
    pub fn unresponsive(mut self) -> Self {
        self.unresponsive = true;
        self
    }

    pub fn installed_version(&self, database: &str, extension: &str) -> Option<String> {
        self.installed
            .lock()
            .unwrap()
            .get(&(database.to_string(), extension.to_string()))
            .cloned()
    }

    /// Create calls as (database, extension, version)
    pub fn create_calls(&self) -> Vec<(String, String, Option<String>)> {
        self.creates.lock().unwrap().clone()
    }

    pub fn creates(&self) -> usize {
        self.creates.lock().unwrap().len()
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn observes(&self) -> usize {
        self.observes.load(Ordering::SeqCst)
    }

    pub fn mutations(&self) -> usize {
        self.creates() + self.updates() + self.deletes()
    }

    pub fn total_calls(&self) -> usize {
        self.mutations() + self.observes()
    }

    async fn stall(&self) {
        if self.unresponsive {
            std::future::pending::<()>().await;
        }
    }

    fn check_database(&self, database: &str) -> Result<()> {
        if self.missing_databases.contains(database) {
            return Err(Error::NotFoundError(format!(
                "database \"{}\" does not exist",
                database
            )));
        }
        Ok(())
    }

    fn key(database: &str, extension: &str) -> (String, String) {
        (database.to_string(), extension.to_string())
    }
}

#[async_trait]
impl ExtensionClient for FakeClient {
    async fn observe(
        &self,
        database: &str,
        extension: &str,
        desired_version: Option<&str>,
    ) -> Result<Observation> {
        self.observes.fetch_add(1, Ordering::SeqCst);
        self.stall().await;
        self.check_database(database)?;
        Ok(match self.installed_version(database, extension) {
            Some(installed) => Observation::present(installed, desired_version),
            None => Observation::absent(),
        })
    }

    async fn create(&self, database: &str, extension: &str, version: Option<&str>) -> Result<()> {
        self.creates.lock().unwrap().push((
            database.to_string(),
            extension.to_string(),
            version.map(String::from),
        ));
        self.stall().await;
        self.check_database(database)?;
        if let Some(message) = &self.fail_create {
            return Err(Error::ExtensionCreateError(message.clone()));
        }
        self.installed
            .lock()
            .unwrap()
            .entry(Self::key(database, extension))
            .or_insert_with(|| version.unwrap_or(DEFAULT_EXTENSION_VERSION).to_string());
        Ok(())
    }

    async fn update(&self, database: &str, extension: &str, version: Option<&str>) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.stall().await;
        self.check_database(database)?;
        if let Some(version) = version
            && let Some(installed) = self
                .installed
                .lock()
                .unwrap()
                .get_mut(&Self::key(database, extension))
        {
            *installed = version.to_string();
        }
        Ok(())
    }

    async fn delete(&self, database: &str, extension: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.stall().await;
        self.check_database(database)?;
        self.installed
            .lock()
            .unwrap()
            .remove(&Self::key(database, extension));
        Ok(())
    }
}

/// Hands out a shared [`FakeClient`] for known ProviderConfigs
pub struct FakeFactory {
    client: Arc<FakeClient>,
    provider_configs: Vec<String>,
    connects: AtomicUsize,
}

impl FakeFactory {
    /// Factory that knows only the `default` ProviderConfig
    pub fn new(client: Arc<FakeClient>) -> Self {
        Self::with_provider_configs(client, &["default"])
    }

    pub fn with_provider_configs(client: Arc<FakeClient>, names: &[&str]) -> Self {
        Self {
            client,
            provider_configs: names.iter().map(|n| n.to_string()).collect(),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn connect(&self, provider_config: &str) -> Result<Arc<dyn ExtensionClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.provider_configs.iter().any(|n| n == provider_config) {
            return Err(Error::ProviderConfigError(format!(
                "ProviderConfig {} not found",
                provider_config
            )));
        }
        let client: Arc<dyn ExtensionClient> = self.client.clone();
        Ok(client)
    }
}
