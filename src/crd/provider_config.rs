//! ProviderConfig CRD definition
//!
//! A ProviderConfig points at the Secret holding the endpoint and superuser
//! credentials of a PostgreSQL cluster. Managed resources select one through
//! `spec.providerConfigRef`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ProviderConfig is the Schema for the providerconfigs API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "postgres-operator.smoketurner.com",
    version = "v1alpha1",
    kind = "ProviderConfig",
    plural = "providerconfigs",
    category = "provider",
    printcolumn = r#"{"name":"SECRET-NAME", "type":"string", "jsonPath":".spec.credentials.connectionSecretRef.name"}"#,
    printcolumn = r#"{"name":"AGE", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigSpec {
    /// Where the connection credentials come from
    pub credentials: ProviderCredentials,

    /// TLS mode for connections to the cluster
    #[serde(default)]
    pub ssl_mode: SslMode,
}

/// Connection credentials source
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    /// Credentials source; only Secret is supported
    #[serde(default)]
    pub source: CredentialsSource,

    /// Secret with `endpoint`, `port`, `username` and `password` keys
    pub connection_secret_ref: SecretReference,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum CredentialsSource {
    #[default]
    Secret,
}

/// Namespaced reference to a Secret
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
    pub namespace: String,
}

/// TLS mode for PostgreSQL connections
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// Plain TCP
    Disable,
    /// TLS without certificate verification
    #[default]
    Require,
    /// TLS verified against the `ca.crt` key of the connection secret
    VerifyFull,
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SslMode::Disable => write!(f, "disable"),
            SslMode::Require => write!(f, "require"),
            SslMode::VerifyFull => write!(f, "verify-full"),
        }
    }
}
