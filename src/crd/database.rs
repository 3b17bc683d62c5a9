//! Database CRD definition
//!
//! Extensions target a Database by name or by label selector. This operator
//! only reads Database objects; their identity is the object name, which is
//! also the name of the PostgreSQL database.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Conditioned, Condition, Managed, ResourceSpec, ResourceStatus};

/// Database is the Schema for the databases API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "postgres-operator.smoketurner.com",
    version = "v1alpha1",
    kind = "Database",
    plural = "databases",
    status = "DatabaseStatus",
    category = "managed",
    category = "sql",
    printcolumn = r#"{"name":"READY", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"AGE", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
    #[serde(flatten)]
    pub resource: ResourceStatus,
}

impl Managed for Database {
    fn resource_spec(&self) -> &ResourceSpec {
        &self.spec.resource
    }
}

impl Conditioned for Database {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.resource.conditions.as_slice())
            .unwrap_or_default()
    }
}
