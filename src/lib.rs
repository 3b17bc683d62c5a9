pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod postgres;
pub mod webhooks;

pub use config::{LeaderElectionConfig, OperatorConfig};
pub use controller::{
    BackoffConfig, Context, Error, FINALIZER, PassOutcome, ReconcilePass, Result, error_policy,
    reconcile,
};
pub use crd::{Database, Extension, ProviderConfig};
pub use health::{HealthState, Metrics};
pub use webhooks::{WebhookError, run_webhook_server};

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::Controller;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// The Extension controller as an explicitly owned value
///
/// Holds the work queue configuration and the shared reconcile context.
/// Nothing runs until [`ExtensionOperator::start`] is called.
pub struct ExtensionOperator {
    client: Client,
    ctx: Arc<Context>,
}

impl ExtensionOperator {
    /// Operator reading Databases, ProviderConfigs and Secrets from the API server
    pub fn new(
        client: Client,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let ctx = Arc::new(Context::new(client.clone(), config, health_state));
        Self { client, ctx }
    }

    /// Start watching Extensions
    ///
    /// Up to `concurrency` Extensions are reconciled at once; the runtime
    /// never runs two passes for the same Extension concurrently.
    pub fn start(self) -> OperatorHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let ctx = self.ctx.clone();
        let extensions: Api<Extension> = Api::all(self.client.clone());
        let controller_config = ControllerConfig::default().concurrency(ctx.config.concurrency);

        tracing::info!(
            concurrency = ctx.config.concurrency,
            pass_timeout = ?ctx.config.pass_timeout,
            "Starting controller for Extension resources"
        );

        let task = tokio::spawn(async move {
            if let Some(state) = &ctx.health_state {
                state.set_ready(true).await;
            }

            Controller::new(extensions, WatcherConfig::default().any_semantic())
                .with_config(controller_config)
                .graceful_shutdown_on(async move {
                    let _ = shutdown_rx.await;
                })
                .run(reconcile, error_policy, ctx.clone())
                .for_each(|result| async move {
                    match result {
                        Ok((obj, _action)) => {
                            tracing::debug!("Reconciled: {}", obj.name);
                        }
                        Err(e) => {
                            // Events for deleted objects can race their removal
                            let is_not_found = matches!(
                                &e,
                                kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                            );
                            if is_not_found {
                                tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                            } else {
                                tracing::warn!("Reconciliation error: {}", e);
                            }
                        }
                    }
                })
                .await;

            if let Some(state) = &ctx.health_state {
                state.set_ready(false).await;
            }
            tracing::info!("Extension controller stopped");
        });

        OperatorHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Handle to a running [`ExtensionOperator`]
pub struct OperatorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl OperatorHandle {
    /// Wait until the controller exits on its own
    pub async fn stopped(&mut self) {
        if let Some(task) = self.task.as_mut() {
            if let Err(e) = task.await {
                tracing::error!("Extension controller task failed: {}", e);
            }
            self.task = None;
        }
    }

    /// Stop taking new work and wait for in-flight passes to finish
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.stopped().await;
    }
}
