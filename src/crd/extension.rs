//! Extension CRD definition
//!
//! An Extension declares a PostgreSQL extension that must be installed into
//! one database of the cluster described by its ProviderConfig. The target
//! database is named directly, through a reference to a Database resource,
//! or through a label selector matching Database resources.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Conditioned, Condition, Managed, Reference, ResourceSpec, ResourceStatus, Selector};

/// Extension is the Schema for the extensions API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "postgres-operator.smoketurner.com",
    version = "v1alpha1",
    kind = "Extension",
    plural = "extensions",
    status = "ExtensionStatus",
    category = "managed",
    category = "sql",
    printcolumn = r#"{"name":"READY", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"SYNCED", "type":"string", "jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"AGE", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,

    /// Desired state of the extension
    pub for_provider: ExtensionParameters,
}

/// Configurable fields of an Extension
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionParameters {
    /// Name of the extension to install
    pub extension: String,

    /// Version to install. Immutable; when unset the default version is installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Database to install the extension into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Reference to the Database this extension is for. Immutable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_ref: Option<Reference>,

    /// Selects the Database this extension is for. Immutable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_selector: Option<Selector>,
}

impl ExtensionParameters {
    /// Whether any of the three database targeting fields is set
    pub fn has_database_target(&self) -> bool {
        self.database.is_some() || self.database_ref.is_some() || self.database_selector.is_some()
    }
}

/// Observed state of an Extension
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    #[serde(flatten)]
    pub resource: ResourceStatus,
}

impl Managed for Extension {
    fn resource_spec(&self) -> &ResourceSpec {
        &self.spec.resource
    }
}

impl Conditioned for Extension {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.resource.conditions.as_slice())
            .unwrap_or_default()
    }
}
