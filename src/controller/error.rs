//! Error types for the Extension controller

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

/// Why a database reference could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionFailure {
    /// No Database matched the reference or selector
    NotFound,
    /// The lookup itself failed (API server unreachable, RBAC, ...)
    Lookup,
}

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `ValidationError`).
/// This is idiomatic for error enums and improves readability at call sites.
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Reference resolution error: {message}")]
    ReferenceResolutionError {
        failure: ResolutionFailure,
        message: String,
    },

    #[error("Cannot build PostgreSQL client: {0}")]
    ProviderConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Database not found: {0}")]
    NotFoundError(String),

    #[error("Cannot create extension: {0}")]
    ExtensionCreateError(String),

    #[error("Cannot update extension: {0}")]
    ExtensionUpdateError(String),

    #[error("Cannot drop extension: {0}")]
    ExtensionDeleteError(String),

    #[error("Reconcile pass exceeded its deadline of {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub(crate) fn reference_not_found(message: impl Into<String>) -> Self {
        Error::ReferenceResolutionError {
            failure: ResolutionFailure::NotFound,
            message: message.into(),
        }
    }

    /// Stable, machine-readable kind used as the Synced condition reason
    pub fn reason(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "KubeError",
            Error::ValidationError(_) => "ValidationError",
            Error::ReferenceResolutionError { .. } => "ReferenceResolutionError",
            Error::ProviderConfigError(_) => "ProviderConfigError",
            Error::ConnectionError(_) => "ConnectionError",
            Error::NotFoundError(_) => "NotFoundError",
            Error::ExtensionCreateError(_) => "ExtensionCreateError",
            Error::ExtensionUpdateError(_) => "ExtensionUpdateError",
            Error::ExtensionDeleteError(_) => "ExtensionDeleteError",
            Error::Timeout(_) => "Timeout",
        }
    }

    /// Whether the failure is a problem with the declared spec rather than the environment
    ///
    /// Persistent failures leave `Ready=False`; transient ones leave `Ready=Unknown`.
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            Error::ValidationError(_)
                | Error::ReferenceResolutionError {
                    failure: ResolutionFailure::NotFound,
                    ..
                }
        )
    }

    /// Check if this error indicates a resource was not found
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(e) => matches!(e, kube::Error::Api(api_err) if api_err.code == 404),
            _ => false,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            // Kubernetes API errors are often retryable
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            Error::ConnectionError(_) => true,
            Error::Timeout(_) => true,
            // The database or referenced object might appear later
            Error::NotFoundError(_) => true,
            Error::ReferenceResolutionError { .. } => true,
            // SQL failures are often privilege or catalog races
            Error::ExtensionCreateError(_) => true,
            Error::ExtensionUpdateError(_) => true,
            Error::ExtensionDeleteError(_) => true,
            Error::ValidationError(_) => false,
            Error::ProviderConfigError(_) => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Ceiling used when the PostgreSQL client cannot be built at all
    pub credentials_max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300), // 5 minutes
            credentials_max_delay: Duration::from_secs(900),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt.min(32) as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error, with different handling for retryable vs non-retryable
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        match error {
            // Bad credentials rarely fix themselves; back off further than usual
            Error::ProviderConfigError(_) => self.credentials_max_delay,
            e if e.is_retryable() => self.delay_for_attempt(attempt),
            _ => self.max_delay,
        }
    }
}

/// Consecutive failures per Extension, cleared on success or deletion
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    /// Count a failure and return its zero-based attempt number with the delay
    /// before the next pass
    pub fn next_delay(
        &self,
        name: &str,
        error: &Error,
        backoff: &BackoffConfig,
    ) -> (u32, Duration) {
        let attempt = match self.attempts.lock() {
            Ok(mut attempts) => {
                let count = attempts.entry(name.to_string()).or_insert(0);
                let attempt = *count;
                *count = count.saturating_add(1);
                attempt
            }
            Err(_) => 0,
        };
        (attempt, backoff.delay_for_error(error, attempt))
    }

    pub fn reset(&self, name: &str) {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.remove(name);
        }
    }
}
