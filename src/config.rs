//! Operator configuration
//!
//! Everything is read from environment variables with defaults suitable for
//! an in-cluster deployment. Unparseable values fall back to the default with
//! a warning rather than aborting start-up.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::controller::BackoffConfig;
use crate::postgres::connection::DEFAULT_POOL_SIZE;

/// Floor for the pass deadline and the first retry delay
const MIN_DELAY: Duration = Duration::from_secs(1);

/// Runtime settings for the operator
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Maximum number of Extensions reconciled at the same time
    pub concurrency: u16,
    /// Deadline for one reconcile pass
    pub pass_timeout: Duration,
    /// Requeue interval after a successful pass, used to detect drift
    pub poll_interval: Duration,
    /// Retry backoff for failed passes
    pub backoff: BackoffConfig,
    /// Connections per PostgreSQL pool
    pub pool_size: usize,
    pub health_port: u16,
    pub webhook_port: u16,
    pub webhook_cert_path: String,
    pub webhook_key_path: String,
    pub leader_election: LeaderElectionConfig,
}

/// Lease settings
#[derive(Clone, Debug)]
pub struct LeaderElectionConfig {
    pub enabled: bool,
    pub lease_name: String,
    pub lease_ttl: Duration,
    pub renew_interval: Duration,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lease_name: "postgres-extension-operator-leader".to_string(),
            lease_ttl: Duration::from_secs(15),
            renew_interval: Duration::from_secs(5),
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            pass_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
            pool_size: DEFAULT_POOL_SIZE,
            health_port: 8080,
            webhook_port: 8443,
            webhook_cert_path: "/etc/webhook/certs/tls.crt".to_string(),
            webhook_key_path: "/etc/webhook/certs/tls.key".to_string(),
            leader_election: LeaderElectionConfig::default(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            Duration::from_secs(parse_or(&lookup, key, default.as_secs()))
        };

        let backoff = BackoffConfig {
            initial_delay: secs("BACKOFF_INITIAL_SECS", defaults.backoff.initial_delay)
                .max(MIN_DELAY),
            max_delay: secs("BACKOFF_MAX_SECS", defaults.backoff.max_delay),
            credentials_max_delay: secs(
                "BACKOFF_CREDENTIALS_MAX_SECS",
                defaults.backoff.credentials_max_delay,
            ),
            ..defaults.backoff
        };

        let leader_election = LeaderElectionConfig {
            enabled: parse_or(&lookup, "LEADER_ELECTION", defaults.leader_election.enabled),
            lease_name: lookup("LEASE_NAME").unwrap_or(defaults.leader_election.lease_name),
            lease_ttl: secs("LEASE_TTL_SECS", defaults.leader_election.lease_ttl),
            renew_interval: secs(
                "LEASE_RENEW_INTERVAL_SECS",
                defaults.leader_election.renew_interval,
            ),
        };

        Self {
            concurrency: parse_or(&lookup, "RECONCILE_CONCURRENCY", defaults.concurrency).max(1),
            pass_timeout: secs("RECONCILE_TIMEOUT_SECS", defaults.pass_timeout).max(MIN_DELAY),
            poll_interval: secs("POLL_INTERVAL_SECS", defaults.poll_interval),
            backoff,
            pool_size: parse_or(&lookup, "DB_POOL_SIZE", defaults.pool_size).max(1),
            health_port: parse_or(&lookup, "HEALTH_PORT", defaults.health_port),
            webhook_port: parse_or(&lookup, "WEBHOOK_PORT", defaults.webhook_port),
            webhook_cert_path: lookup("WEBHOOK_CERT_PATH").unwrap_or(defaults.webhook_cert_path),
            webhook_key_path: lookup("WEBHOOK_KEY_PATH").unwrap_or(defaults.webhook_key_path),
            leader_election,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key = %key, value = %raw, "Ignoring unparseable setting");
            default
        }),
        None => default,
    }
}
