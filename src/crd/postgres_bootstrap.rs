//! PostgresBootstrap CRD definition
//!
//! A PostgresBootstrap declares that a role and a database should exist on a
//! PostgreSQL server. The controller provisions them and publishes the generated
//! credentials as a Secret next to the object.

use std::fmt;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// PostgresBootstrap is the Schema for the postgresbootstraps API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "pgbootstrap.io",
    version = "v1alpha1",
    kind = "PostgresBootstrap",
    plural = "postgresbootstraps",
    shortname = "pgbs",
    namespaced,
    status = "PostgresBootstrapStatus",
    printcolumn = r#"{"name":"Database", "type":"string", "jsonPath":".spec.database"}"#,
    printcolumn = r#"{"name":"Role", "type":"string", "jsonPath":".spec.role"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresBootstrapSpec {
    /// Name of the database to provision
    pub database: String,

    /// Name of the login role that receives access to the database
    pub role: String,

    /// Privileges the role holds on the database (default: OWNER)
    #[serde(default = "default_privileges")]
    pub privileges: Vec<DatabasePrivilege>,

    /// Further databases the role receives the same privileges on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_databases: Vec<String>,

    /// PostgreSQL host (defaults to the controller's DB_HOST)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pg_host: Option<String>,

    /// PostgreSQL port (defaults to the controller's DB_PORT)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pg_port: Option<i32>,

    /// Secret holding administrative credentials for the server
    /// (defaults to the controller's DB_USERNAME/DB_PASSWORD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_secret_ref: Option<AdminSecretRef>,

    /// Name of the Secret to write credentials to
    /// (default: `<metadata.name>-db-credentials`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

pub(crate) fn default_privileges() -> Vec<DatabasePrivilege> {
    vec![DatabasePrivilege::Owner]
}

/// Reference to a Secret with administrative PostgreSQL credentials
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdminSecretRef {
    /// Name of the Secret
    pub name: String,

    /// Namespace of the Secret (defaults to the PostgresBootstrap namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Key holding the admin username
    #[serde(default = "default_username_key")]
    pub username_key: String,

    /// Key holding the admin password
    #[serde(default = "default_password_key")]
    pub password_key: String,
}

fn default_username_key() -> String {
    "username".to_string()
}

fn default_password_key() -> String {
    "password".to_string()
}

/// Database-level privileges
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatabasePrivilege {
    /// The role owns the database
    Owner,
    /// ALL PRIVILEGES on the database
    All,
    /// CONNECT
    Connect,
    /// CREATE (schemas)
    Create,
    /// TEMPORARY tables
    Temporary,
}

impl DatabasePrivilege {
    /// Returns the SQL keyword for grantable privileges, `None` for ownership
    pub fn as_sql(&self) -> Option<&'static str> {
        match self {
            DatabasePrivilege::Owner => None,
            DatabasePrivilege::All => Some("ALL PRIVILEGES"),
            DatabasePrivilege::Connect => Some("CONNECT"),
            DatabasePrivilege::Create => Some("CREATE"),
            DatabasePrivilege::Temporary => Some("TEMPORARY"),
        }
    }
}

impl PostgresBootstrapSpec {
    /// Whether the role is expected to own its databases
    pub fn wants_ownership(&self) -> bool {
        self.privileges.contains(&DatabasePrivilege::Owner)
    }

    /// The primary database followed by any additional ones, without duplicates
    pub fn all_databases(&self) -> Vec<&str> {
        let mut databases = vec![self.database.as_str()];
        for db in &self.additional_databases {
            if !databases.contains(&db.as_str()) {
                databases.push(db.as_str());
            }
        }
        databases
    }
}

impl PostgresBootstrap {
    /// Identity of this object
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace().unwrap_or_default(), self.name_any())
    }

    /// Name of the Secret that carries this object's credentials
    pub fn secret_name(&self) -> String {
        self.spec
            .secret_name
            .clone()
            .unwrap_or_else(|| format!("{}-db-credentials", self.name_any()))
    }
}

/// Stable identity of a PostgresBootstrap (namespace + name)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Status of the PostgresBootstrap resource
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostgresBootstrapStatus {
    /// Current provisioning phase
    #[serde(default)]
    pub phase: BootstrapPhase,

    /// When the last reconcile pass finished (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled_at: Option<String>,

    /// Human-readable detail, the sanitized error for Failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation observed by the last pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Secret holding the credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

/// Phase of provisioning
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum BootstrapPhase {
    /// Not yet processed
    #[default]
    Pending,
    /// First-time provisioning in progress
    Provisioning,
    /// Role, database and secret are in place
    Ready,
    /// Last pass failed - see message
    Failed,
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapPhase::Pending => write!(f, "Pending"),
            BootstrapPhase::Provisioning => write!(f, "Provisioning"),
            BootstrapPhase::Ready => write!(f, "Ready"),
            BootstrapPhase::Failed => write!(f, "Failed"),
        }
    }
}
