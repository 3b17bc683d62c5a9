//! Shared managed-resource envelope
//!
//! Every managed kind embeds the same spec and status fragments: a deletion
//! policy, a reference to the ProviderConfig that supplies connection
//! details, and a list of conditions. The fragments are flattened into each
//! CRD rather than modelled as a base type, and the `Managed` and
//! `Conditioned` traits give the controller uniform access to them.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the ProviderConfig used when a resource does not specify one
pub const DEFAULT_PROVIDER_CONFIG: &str = "default";

/// What happens to the external object when the managed resource is deleted
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Drop the external object
    #[default]
    Delete,
    /// Leave the external object in place
    Orphan,
}

impl std::fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeletionPolicy::Delete => write!(f, "Delete"),
            DeletionPolicy::Orphan => write!(f, "Orphan"),
        }
    }
}

/// Spec fields common to all managed resources
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// Whether the external object is dropped or orphaned on deletion
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// ProviderConfig holding the connection credentials
    #[serde(default = "default_provider_config_ref")]
    pub provider_config_ref: Reference,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            deletion_policy: DeletionPolicy::default(),
            provider_config_ref: default_provider_config_ref(),
        }
    }
}

fn default_provider_config_ref() -> Reference {
    Reference::new(DEFAULT_PROVIDER_CONFIG)
}

/// Status fields common to all managed resources
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// Observed conditions (Ready, Synced)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// A status condition following Kubernetes conventions
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Machine-readable reason for the condition's last update
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition status changed
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Direct reference to another cluster-scoped resource by name
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    /// Name of the referenced object
    pub name: String,

    /// How the reference is resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ReferencePolicy>,
}

impl Reference {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: None,
        }
    }

    /// Whether the referenced object must be looked up on every pass
    pub fn resolve_always(&self) -> bool {
        self.policy
            .as_ref()
            .is_some_and(|p| p.resolve == ResolvePolicy::Always)
    }

    pub fn is_optional(&self) -> bool {
        self.policy
            .as_ref()
            .is_some_and(|p| p.resolution == ResolutionPolicy::Optional)
    }
}

/// Label query selecting another resource
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    /// Labels a candidate must carry
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Only select candidates controlled by the same owner as the selecting resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_controller_ref: Option<bool>,

    /// How the selector is resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ReferencePolicy>,
}

impl Selector {
    /// Render the match labels as a Kubernetes label selector string
    pub fn label_selector(&self) -> String {
        self.match_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn is_optional(&self) -> bool {
        self.policy
            .as_ref()
            .is_some_and(|p| p.resolution == ResolutionPolicy::Optional)
    }
}

/// Resolution behaviour shared by references and selectors
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReferencePolicy {
    /// Whether an unresolvable reference is an error
    #[serde(default)]
    pub resolution: ResolutionPolicy,

    /// When the reference is (re)resolved
    #[serde(default)]
    pub resolve: ResolvePolicy,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum ResolutionPolicy {
    #[default]
    Required,
    Optional,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum ResolvePolicy {
    /// Resolve only while the target field is unset
    #[default]
    IfNotPresent,
    /// Resolve on every pass
    Always,
}

/// Access to the shared spec envelope of a managed resource
pub trait Managed {
    fn resource_spec(&self) -> &ResourceSpec;

    fn deletion_policy(&self) -> DeletionPolicy {
        self.resource_spec().deletion_policy
    }

    fn provider_config_name(&self) -> &str {
        &self.resource_spec().provider_config_ref.name
    }
}

/// Access to the condition list of a managed resource's status
pub trait Conditioned {
    fn conditions(&self) -> &[Condition];

    fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }
}

impl Conditioned for ResourceStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}
