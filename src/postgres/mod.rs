//! PostgreSQL side of provisioning
//!
//! [`PostgresAdmin`] is the narrow set of idempotence checks and statements a
//! reconcile pass needs. [`provisioner`] orders them into the role, database,
//! grants sequence; [`client`] implements them over `tokio-postgres`.

pub mod client;
pub mod provisioner;
pub mod sql;
pub mod tls;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::AdminCredentials;
use crate::crd::DatabasePrivilege;

pub use client::{AdminConnection, TokioPostgresConnector};
pub use provisioner::{PasswordMode, ProvisionPlan, ProvisionReport, provision};
pub use tls::TlsMode;

/// Errors that can occur during PostgreSQL operations
#[derive(Error, Debug)]
pub enum PostgresError {
    #[error("connection to {host}:{port} failed: {message}")]
    Connection {
        host: String,
        port: u16,
        message: String,
    },

    #[error("{operation} failed: {message}")]
    Query {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("invalid CA certificate: {0}")]
    InvalidCertificate(String),

    #[error(
        "database {database} is owned by {actual_owner}, not {desired_owner}; ownership is never reassigned automatically"
    )]
    OwnershipConflict {
        database: String,
        actual_owner: String,
        desired_owner: String,
    },
}

impl PostgresError {
    /// Whether retrying the same pass would hit the same wall
    pub fn is_conflict(&self) -> bool {
        matches!(self, PostgresError::OwnershipConflict { .. })
    }

    /// Build a query error from a driver error without echoing statement text
    pub(crate) fn query(operation: &'static str, err: &tokio_postgres::Error) -> Self {
        let message = match err.as_db_error() {
            Some(db) => format!("{} ({})", db.message(), db.code().code()),
            None => err.to_string(),
        };
        PostgresError::Query { operation, message }
    }
}

/// Result type for PostgreSQL operations
pub type PostgresResult<T> = Result<T, PostgresError>;

/// Where and as whom to connect for a reconcile pass
#[derive(Debug, Clone)]
pub struct PostgresTarget {
    pub host: String,
    pub port: u16,
    pub admin_database: String,
    pub admin: AdminCredentials,
}

/// Administrative operations on one PostgreSQL server session
#[async_trait]
pub trait PostgresAdmin: Send {
    async fn role_exists(&mut self, role: &str) -> PostgresResult<bool>;

    async fn create_role(&mut self, role: &str, password: &str) -> PostgresResult<()>;

    async fn set_role_password(&mut self, role: &str, password: &str) -> PostgresResult<()>;

    /// Owner of `database`, `None` when it does not exist
    async fn database_owner(&mut self, database: &str) -> PostgresResult<Option<String>>;

    /// Create `database`, owned by `owner` or by the admin role when `None`
    async fn create_database(&mut self, database: &str, owner: Option<&str>)
    -> PostgresResult<()>;

    /// Grant database-level privileges; never revokes anything
    async fn grant_database_privileges(
        &mut self,
        database: &str,
        role: &str,
        privileges: &[DatabasePrivilege],
    ) -> PostgresResult<()>;
}

/// Opens an admin session for one reconcile pass
///
/// The session is released when the returned box is dropped.
#[async_trait]
pub trait PostgresConnector: Send + Sync {
    async fn connect(&self, target: &PostgresTarget) -> PostgresResult<Box<dyn PostgresAdmin>>;
}
