use std::sync::Arc;

use kube::Client;

use crate::config::OperatorConfig;
use crate::controller::error::RetryTracker;
use crate::controller::resolver::{DatabaseLookup, KubeDatabaseLookup};
use crate::health::HealthState;
use crate::postgres::{ClientFactory, KubeClientFactory, PoolCache};

/// Shared context for the Extension controller
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    pub lookup: Arc<dyn DatabaseLookup>,
    pub factory: Arc<dyn ClientFactory>,
    pub config: OperatorConfig,
    pub health_state: Option<Arc<HealthState>>,
    pub retries: RetryTracker,
}

impl Context {
    /// Context wired to the API server and a shared PostgreSQL pool cache
    pub fn new(
        client: Client,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let pools = Arc::new(PoolCache::new(config.pool_size));
        Self::with_collaborators(
            client.clone(),
            Arc::new(KubeDatabaseLookup::new(client.clone())),
            Arc::new(KubeClientFactory::new(client, pools)),
            config,
            health_state,
        )
    }

    pub fn with_collaborators(
        client: Client,
        lookup: Arc<dyn DatabaseLookup>,
        factory: Arc<dyn ClientFactory>,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            client,
            lookup,
            factory,
            config,
            health_state,
            retries: RetryTracker::default(),
        }
    }
}
