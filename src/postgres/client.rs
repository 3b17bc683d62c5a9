//! Extension client seam between the reconciler and PostgreSQL
//!
//! The reconciler only talks to PostgreSQL through [`ExtensionClient`], and
//! obtains one per pass from a [`ClientFactory`]. The production
//! implementations live in [`super::connection`]; tests substitute in-memory
//! fakes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::controller::error::Result;

/// What an extension looks like in a database right now
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Observation {
    /// Whether the extension is installed
    pub exists: bool,
    /// Installed version, when installed
    pub version: Option<String>,
    /// Installed and matching the desired version (any version when none is desired)
    pub up_to_date: bool,
}

impl Observation {
    pub fn absent() -> Self {
        Self::default()
    }

    /// An installed extension, compared against the desired version
    pub fn present(installed: impl Into<String>, desired: Option<&str>) -> Self {
        let installed = installed.into();
        let up_to_date = desired.is_none_or(|d| d == installed);
        Self {
            exists: true,
            version: Some(installed),
            up_to_date,
        }
    }
}

/// Operations on one extension inside one database
///
/// Every operation is idempotent: creating an installed extension, updating to
/// the installed version and dropping an absent extension all succeed.
#[async_trait]
pub trait ExtensionClient: Send + Sync {
    async fn observe(
        &self,
        database: &str,
        extension: &str,
        desired_version: Option<&str>,
    ) -> Result<Observation>;

    async fn create(&self, database: &str, extension: &str, version: Option<&str>) -> Result<()>;

    async fn update(&self, database: &str, extension: &str, version: Option<&str>) -> Result<()>;

    async fn delete(&self, database: &str, extension: &str) -> Result<()>;
}

/// Builds an [`ExtensionClient`] from a named ProviderConfig
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Failures are reported as `ProviderConfigError`
    async fn connect(&self, provider_config: &str) -> Result<Arc<dyn ExtensionClient>>;
}
