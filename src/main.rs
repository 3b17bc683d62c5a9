use std::path::Path;
use std::sync::Arc;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};

use postgres_extension_operator::health::{HealthState, run_health_server};
use postgres_extension_operator::{ExtensionOperator, OperatorConfig, run_webhook_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the TLS crypto provider before any TLS operations
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider and no provider is available".into());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("postgres_extension_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    info!("Starting postgres-extension-operator");
    let config = OperatorConfig::from_env();

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately (probes should work even as non-leader)
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // The webhook answers admission requests regardless of leadership
    let webhook_handle = if Path::new(&config.webhook_cert_path).exists()
        && Path::new(&config.webhook_key_path).exists()
    {
        info!("TLS certificates found, starting webhook server");
        let (cert, key, port) = (
            config.webhook_cert_path.clone(),
            config.webhook_key_path.clone(),
            config.webhook_port,
        );
        Some(tokio::spawn(async move {
            if let Err(e) = run_webhook_server(&cert, &key, port).await {
                error!("Webhook server error: {}", e);
            }
        }))
    } else {
        info!(
            "TLS certificates not found at {} and {}, webhook server disabled",
            config.webhook_cert_path, config.webhook_key_path
        );
        None
    };

    let lease_renewal_handle = if config.leader_election.enabled {
        Some(acquire_leadership(&client, &config).await)
    } else {
        warn!("Leader election disabled, running as the only instance");
        None
    };

    info!("Watching Extension resources (apiVersion: postgres-operator.smoketurner.com/v1alpha1)");
    let grace_period = config.pass_timeout;
    let mut operator =
        ExtensionOperator::new(client.clone(), config, Some(health_state.clone())).start();

    // Create a future that monitors the webhook handle (if it exists)
    let webhook_future = async {
        if let Some(handle) = webhook_handle {
            if let Err(e) = handle.await {
                error!("Webhook server task panicked: {}", e);
            }
        } else {
            std::future::pending::<()>().await;
        }
    };

    let lease_future = async {
        match lease_renewal_handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!("Lease renewal task panicked: {}", e);
                }
            }
            None => std::future::pending::<()>().await,
        }
    };

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        _ = operator.stopped() => {
            error!("Extension controller exited unexpectedly");
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        _ = webhook_future => {}
        // Lease renewal only exits via process::exit() or panic
        _ = lease_future => {}
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
            health_state.set_ready(false).await;

            // In-flight passes finish within their own deadline
            if tokio::time::timeout(grace_period, operator.stop()).await.is_err() {
                warn!("In-flight reconciliations did not finish within {:?}", grace_period);
            }
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Block until this instance holds the lease, then keep renewing it
///
/// Losing the lease exits the process so Kubernetes restarts it into a
/// fresh election.
async fn acquire_leadership(
    client: &Client,
    config: &OperatorConfig,
) -> tokio::task::JoinHandle<()> {
    let election = &config.leader_election;

    // Get pod identity for leader election
    let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
        warn!("POD_NAMESPACE not set, using 'default'");
        "default".to_string()
    });

    info!(
        holder_id = %pod_name,
        namespace = %namespace,
        lease_name = %election.lease_name,
        "Initializing leader election"
    );

    let lease_lock = LeaseLock::new(
        client.clone(),
        &namespace,
        LeaseLockParams {
            holder_id: pod_name,
            lease_name: election.lease_name.clone(),
            lease_ttl: election.lease_ttl,
        },
    );

    info!("Waiting to acquire leadership...");
    loop {
        match lease_lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                break;
            }
            Ok(_) => info!("Another instance is leader, waiting..."),
            Err(e) => warn!("Failed to acquire lease: {}, retrying...", e),
        }
        tokio::time::sleep(election.renew_interval).await;
    }

    let renew_interval = election.renew_interval;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(renew_interval).await;

            match lease_lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {}
                Ok(_) => {
                    error!("Lost leadership! Shutting down...");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!("Failed to renew lease: {}. Shutting down...", e);
                    std::process::exit(1);
                }
            }
        }
    })
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
