//! Controller configuration
//!
//! Process-wide settings are read once at startup into [`ControllerConfig`] and
//! handed to every component. Nothing else in the crate reads the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::controller::error::BackoffConfig;
use crate::postgres::TlsMode;

/// Errors raised while loading configuration. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read {key} file {path}: {source}")]
    ReadFile {
        key: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Administrative PostgreSQL credentials
#[derive(Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Default PostgreSQL host for objects without `pgHost`
    pub default_pg_host: Option<String>,
    /// Default PostgreSQL port for objects without `pgPort`
    pub default_pg_port: u16,
    /// Default admin credentials for objects without `adminSecretRef`
    pub default_admin: Option<AdminCredentials>,
    /// Maintenance database the admin session connects to
    pub admin_database: String,
    /// TLS mode for PostgreSQL connections
    pub tls_mode: TlsMode,
    /// Namespace to watch, `None` for all namespaces
    pub watch_namespace: Option<String>,
    /// Number of concurrent reconcile workers
    pub workers: usize,
    /// Deadline for establishing a PostgreSQL connection
    pub pg_connect_timeout: Duration,
    /// Deadline for each PostgreSQL statement
    pub pg_operation_timeout: Duration,
    /// Deadline for each Kubernetes API call
    pub kube_api_timeout: Duration,
    /// Backoff for transient failures
    pub backoff: BackoffConfig,
    /// Periodic re-check of Ready objects, `None` to disable
    pub resync_interval: Option<Duration>,
    /// Bind address of the health/metrics server
    pub health_addr: SocketAddr,
    /// Whether to take a lease before reconciling
    pub leader_election: bool,
    /// Lease holder identity, the hostname when unset
    pub pod_name: Option<String>,
    /// Namespace of the lease
    pub pod_namespace: Option<String>,
    /// Time granted to in-flight passes on shutdown
    pub shutdown_grace_period: Duration,
}

pub const DEFAULT_PG_PORT: u16 = 5432;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;
/// Longest accepted retry backoff cap, one day
pub const MAX_BACKOFF_SECS: u64 = 86_400;

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_pg_host: None,
            default_pg_port: DEFAULT_PG_PORT,
            default_admin: None,
            admin_database: "postgres".to_string(),
            tls_mode: TlsMode::Disabled,
            watch_namespace: None,
            workers: DEFAULT_WORKERS,
            pg_connect_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            pg_operation_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            kube_api_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            backoff: BackoffConfig::default(),
            resync_interval: Some(Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS)),
            health_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            leader_election: true,
            pod_name: None,
            pod_namespace: None,
            shutdown_grace_period: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let default_admin = match (get("DB_USERNAME"), get("DB_PASSWORD")) {
            (Some(username), Some(password)) => Some(AdminCredentials { username, password }),
            (Some(_), None) => {
                return Err(ConfigError::InvalidValue {
                    key: "DB_PASSWORD",
                    value: String::new(),
                    reason: "required when DB_USERNAME is set".to_string(),
                });
            }
            _ => None,
        };

        let tls_mode = match get("DB_SSLMODE").as_deref() {
            None | Some("disable") => TlsMode::Disabled,
            Some("require") => TlsMode::RequireUnverified,
            Some("verify-full") => {
                let path = get("DB_SSL_ROOT_CERT").ok_or_else(|| ConfigError::InvalidValue {
                    key: "DB_SSL_ROOT_CERT",
                    value: String::new(),
                    reason: "required when DB_SSLMODE=verify-full".to_string(),
                })?;
                let ca_cert_pem =
                    std::fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
                        key: "DB_SSL_ROOT_CERT",
                        path: path.clone(),
                        source,
                    })?;
                TlsMode::RequireVerified { ca_cert_pem }
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "DB_SSLMODE",
                    value: other.to_string(),
                    reason: "expected disable, require or verify-full".to_string(),
                });
            }
        };

        let workers: usize = parse_or(&get, "WORKER_COUNT", DEFAULT_WORKERS)?;
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WORKER_COUNT",
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }

        let resync_secs: u64 = parse_or(&get, "RESYNC_INTERVAL_SECS", DEFAULT_RESYNC_INTERVAL_SECS)?;
        let defaults = BackoffConfig::default();
        let base_ms: u64 = parse_or(
            &get,
            "BACKOFF_BASE_MS",
            u64::try_from(defaults.initial_delay.as_millis()).unwrap_or(u64::MAX),
        )?;
        if base_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "BACKOFF_BASE_MS",
                value: "0".to_string(),
                reason: "backoff must start above zero".to_string(),
            });
        }
        let max_secs: u64 = parse_or(&get, "BACKOFF_MAX_SECS", defaults.max_delay.as_secs())?;
        if max_secs > MAX_BACKOFF_SECS || max_secs.saturating_mul(1000) < base_ms {
            return Err(ConfigError::InvalidValue {
                key: "BACKOFF_MAX_SECS",
                value: max_secs.to_string(),
                reason: format!(
                    "expected between BACKOFF_BASE_MS and {} seconds",
                    MAX_BACKOFF_SECS
                ),
            });
        }
        let backoff = BackoffConfig {
            initial_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(max_secs),
            ..defaults
        };

        Ok(Self {
            default_pg_host: get("DB_HOST"),
            default_pg_port: parse_or(&get, "DB_PORT", DEFAULT_PG_PORT)?,
            default_admin,
            admin_database: get("DB_ADMIN_DATABASE").unwrap_or_else(|| "postgres".to_string()),
            tls_mode,
            watch_namespace: get("WATCH_NAMESPACE"),
            workers,
            pg_connect_timeout: secs(parse_or(&get, "PG_CONNECT_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?),
            pg_operation_timeout: secs(parse_or(
                &get,
                "PG_OPERATION_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?),
            kube_api_timeout: secs(parse_or(&get, "KUBE_API_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?),
            backoff,
            resync_interval: (resync_secs > 0).then(|| secs(resync_secs)),
            health_addr: parse_or(
                &get,
                "HEALTH_ADDR",
                SocketAddr::from(([0, 0, 0, 0], 8080)),
            )?,
            leader_election: parse_bool(&get, "LEADER_ELECTION", true)?,
            pod_name: get("POD_NAME"),
            pod_namespace: get("POD_NAMESPACE"),
            shutdown_grace_period: secs(parse_or(
                &get,
                "SHUTDOWN_GRACE_PERIOD_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?),
        })
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_bool<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue {
            key,
            value: v,
            reason: "expected a boolean".to_string(),
        }),
    }
}
