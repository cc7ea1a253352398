//! Error types for the PostgresBootstrap controller

use std::time::Duration;

use thiserror::Error;

use crate::postgres::PostgresError;
use crate::resources::secret::SecretConflict;

/// How the reconcile loop reacts to a failed pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Infrastructure hiccup, retried with backoff
    Transient,
    /// Live state contradicts the desired state, needs an operator
    Conflict,
    /// Spec or referenced configuration is malformed, needs an operator
    Validation,
}

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `ValidationError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("PostgreSQL error: {0}")]
    PostgresError(#[from] PostgresError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    ConflictError(String),

    #[error("Conflict: {0}")]
    SecretConflict(#[from] SecretConflict),

    #[error("Admin credentials unavailable: {0}")]
    AdminCredentialsError(String),

    #[error("Admin credentials secret {0} not found")]
    AdminSecretNotFound(String),

    #[error("Timed out after {timeout:?} waiting for {operation}")]
    TimeoutError {
        operation: &'static str,
        timeout: Duration,
    },
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) will not fix themselves
                    let code = api_err.code;
                    if (400..500).contains(&code) && code != 409 && code != 429 {
                        ErrorKind::Validation
                    } else {
                        ErrorKind::Transient
                    }
                }
                _ => ErrorKind::Transient,
            },
            Error::PostgresError(e) if e.is_conflict() => ErrorKind::Conflict,
            Error::PostgresError(_) => ErrorKind::Transient,
            Error::ConflictError(_) | Error::SecretConflict(_) => ErrorKind::Conflict,
            Error::ValidationError(_) | Error::AdminCredentialsError(_) => ErrorKind::Validation,
            // The admin secret may be created after the object
            Error::AdminSecretNotFound(_) => ErrorKind::Transient,
            Error::TimeoutError { .. } => ErrorKind::Transient,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300), // 5 minutes
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.min(64)).unwrap_or(64);
        let max_delay_secs = self.max_delay.as_secs_f64();
        let base_delay_secs =
            (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent)).min(max_delay_secs);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).clamp(0.0, max_delay_secs);

        // f64 rounding can land just past Duration::MAX for huge caps
        Duration::try_from_secs_f64(delay_with_jitter).unwrap_or(self.max_delay)
    }
}

/// Fatal errors that stop the process before any reconciliation happens
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("cannot watch PostgresBootstrap resources: {0}")]
    Watch(#[source] kube::Error),

    #[error("watch stream for {0} ended unexpectedly")]
    WatchEnded(&'static str),

    #[error("health server error: {0}")]
    Health(#[from] std::io::Error),
}
