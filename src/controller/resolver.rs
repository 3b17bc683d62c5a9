//! Database reference resolution
//!
//! An Extension names its target database in one of three ways. In order of
//! precedence:
//!
//! 1. `databaseRef`: the name of a Database resource. Taken as-is unless its
//!    policy asks for the Database to be confirmed on every pass.
//! 2. `databaseSelector`: labels matching Database resources. The first match
//!    by name wins.
//! 3. `database`: a literal database name.
//!
//! A successful ref or selector resolution is written back into `databaseRef`
//! and `database`, so the selector is evaluated at most once per Extension.

use async_trait::async_trait;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use crate::controller::error::{Error, ResolutionFailure, Result};
use crate::crd::{Database, Extension, Reference, Selector};

/// Read access to Database resources
#[async_trait]
pub trait DatabaseLookup: Send + Sync {
    /// Get a Database by name, `None` when it does not exist
    async fn get(&self, name: &str) -> Result<Option<Database>>;

    /// List Databases matching a label selector (`k=v,k2=v2`)
    async fn list(&self, label_selector: &str) -> Result<Vec<Database>>;
}

/// [`DatabaseLookup`] against the API server
pub struct KubeDatabaseLookup {
    api: Api<Database>,
}

impl KubeDatabaseLookup {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

fn lookup_failed(e: kube::Error) -> Error {
    Error::ReferenceResolutionError {
        failure: ResolutionFailure::Lookup,
        message: format!("cannot look up Database: {}", e),
    }
}

#[async_trait]
impl DatabaseLookup for KubeDatabaseLookup {
    async fn get(&self, name: &str) -> Result<Option<Database>> {
        self.api.get_opt(name).await.map_err(lookup_failed)
    }

    async fn list(&self, label_selector: &str) -> Result<Vec<Database>> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.api.list(&params).await.map_err(lookup_failed)?.items)
    }
}

/// How the target database was determined
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetSource {
    Reference,
    Selector,
    Literal,
}

/// The database a pass operates on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub database: String,
    pub source: TargetSource,
    /// Whether `databaseRef`/`database` must be written back to `spec.forProvider`
    pub write_back: bool,
}

impl ResolvedTarget {
    fn literal(database: &str) -> Self {
        Self {
            database: database.to_string(),
            source: TargetSource::Literal,
            write_back: false,
        }
    }

    /// Merge patch recording the resolved reference in `spec.forProvider`
    ///
    /// Only meaningful for reference and selector resolutions.
    pub fn write_back_patch(&self) -> serde_json::Value {
        json!({
            "spec": {
                "forProvider": {
                    "databaseRef": Reference::new(self.database.clone()),
                    "database": self.database,
                }
            }
        })
    }
}

/// Resolve the database an Extension targets
///
/// Fails with `ValidationError` when no targeting field is set and with a
/// not-found `ReferenceResolutionError` when a reference or selector matches
/// nothing. An optional reference or selector falls back to `database`.
pub async fn resolve_database(ext: &Extension, lookup: &dyn DatabaseLookup) -> Result<ResolvedTarget> {
    let params = &ext.spec.for_provider;

    if let Some(reference) = &params.database_ref {
        return resolve_reference(reference, params.database.as_deref(), lookup).await;
    }

    if let Some(selector) = &params.database_selector {
        if let Some(name) = select_database(ext, selector, lookup).await? {
            debug!(extension = %ext.name_any(), database = %name, "Selector matched Database");
            return Ok(ResolvedTarget {
                database: name,
                source: TargetSource::Selector,
                write_back: true,
            });
        }
        return match params.database.as_deref() {
            Some(literal) if selector.is_optional() => Ok(ResolvedTarget::literal(literal)),
            _ => Err(Error::reference_not_found(format!(
                "no Database matches selector {{{}}}",
                selector.label_selector()
            ))),
        };
    }

    match params.database.as_deref() {
        Some(literal) => Ok(ResolvedTarget::literal(literal)),
        None => Err(Error::ValidationError(
            "one of database, databaseRef or databaseSelector must be set".to_string(),
        )),
    }
}

async fn resolve_reference(
    reference: &Reference,
    literal: Option<&str>,
    lookup: &dyn DatabaseLookup,
) -> Result<ResolvedTarget> {
    if reference.resolve_always() && lookup.get(&reference.name).await?.is_none() {
        return match literal {
            Some(literal) if reference.is_optional() => {
                debug!(reference = %reference.name, database = %literal, "Optional Database reference missing, using database");
                Ok(ResolvedTarget::literal(literal))
            }
            _ => Err(Error::reference_not_found(format!(
                "Database {} not found",
                reference.name
            ))),
        };
    }

    Ok(ResolvedTarget {
        database: reference.name.clone(),
        source: TargetSource::Reference,
        write_back: literal != Some(reference.name.as_str()),
    })
}

/// Pick the lexicographically first Database matching the selector
async fn select_database(
    ext: &Extension,
    selector: &Selector,
    lookup: &dyn DatabaseLookup,
) -> Result<Option<String>> {
    let candidates = lookup.list(&selector.label_selector()).await?;
    let owner_uid = controller_uid(ext);

    Ok(candidates
        .iter()
        .filter(|db| {
            if selector.match_controller_ref != Some(true) {
                return true;
            }
            // Both sides must share a controller
            owner_uid.is_some() && owner_uid == controller_uid(*db)
        })
        .map(|db| db.name_any())
        .min())
}

fn controller_uid(obj: &impl ResourceExt) -> Option<String> {
    obj.owner_references()
        .iter()
        .find(|o| o.controller == Some(true))
        .map(|o| o.uid.clone())
}
