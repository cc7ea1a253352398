//! Test fixtures and builders for PostgresBootstrap resources
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let bootstrap = create_test_bootstrap("orders", "apps");
//!
//! let bootstrap = PostgresBootstrapBuilder::new("orders", "apps")
//!     .with_privileges(vec![DatabasePrivilege::Connect])
//!     .with_additional_databases(&["orders_archive"])
//!     .build();
//! ```

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ObjectMeta;

use kube_postgres_bootstrap::config::{AdminCredentials, ControllerConfig};
use kube_postgres_bootstrap::controller::BackoffConfig;
use kube_postgres_bootstrap::crd::{
    AdminSecretRef, DatabasePrivilege, PostgresBootstrap, PostgresBootstrapSpec,
};

pub const TEST_NAMESPACE: &str = "apps";
pub const TEST_UID: &str = "test-uid-12345";
pub const TEST_HOST: &str = "db.internal";
pub const ADMIN_USER: &str = "bootstrap_admin";
pub const ADMIN_PASSWORD: &str = "admin-Secr3t-value";

/// Create a PostgresBootstrap with database `orders` and role `orders_app`
pub fn create_test_bootstrap(name: &str, namespace: &str) -> PostgresBootstrap {
    PostgresBootstrapBuilder::new(name, namespace).build()
}

/// Controller configuration pointing at [`TEST_HOST`] with default admin credentials
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        default_pg_host: Some(TEST_HOST.to_string()),
        default_admin: Some(AdminCredentials {
            username: ADMIN_USER.to_string(),
            password: ADMIN_PASSWORD.to_string(),
        }),
        backoff: BackoffConfig {
            jitter: 0.0,
            ..BackoffConfig::default()
        },
        ..ControllerConfig::default()
    }
}

/// An Opaque Secret with the given string data
pub fn opaque_secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

/// String value stored under `key`
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()?
        .get(key)
        .map(|v| String::from_utf8(v.0.clone()).unwrap())
}

/// Builder for PostgresBootstrap test fixtures
#[derive(Clone, Debug)]
pub struct PostgresBootstrapBuilder {
    name: String,
    namespace: String,
    uid: Option<String>,
    generation: i64,
    deleting: bool,
    spec: PostgresBootstrapSpec,
}

impl PostgresBootstrapBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid: Some(TEST_UID.to_string()),
            generation: 1,
            deleting: false,
            spec: PostgresBootstrapSpec {
                database: "orders".to_string(),
                role: "orders_app".to_string(),
                privileges: vec![DatabasePrivilege::Owner],
                additional_databases: vec![],
                pg_host: None,
                pg_port: None,
                admin_secret_ref: None,
                secret_name: None,
            },
        }
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.spec.database = database.to_string();
        self
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.spec.role = role.to_string();
        self
    }

    pub fn with_privileges(mut self, privileges: Vec<DatabasePrivilege>) -> Self {
        self.spec.privileges = privileges;
        self
    }

    pub fn with_additional_databases(mut self, databases: &[&str]) -> Self {
        self.spec.additional_databases = databases.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.spec.pg_host = Some(host.to_string());
        self
    }

    pub fn with_port(mut self, port: i32) -> Self {
        self.spec.pg_port = Some(port);
        self
    }

    pub fn with_admin_secret_ref(mut self, name: &str, namespace: Option<&str>) -> Self {
        self.spec.admin_secret_ref = Some(AdminSecretRef {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            username_key: "username".to_string(),
            password_key: "password".to_string(),
        });
        self
    }

    pub fn with_secret_name(mut self, name: &str) -> Self {
        self.spec.secret_name = Some(name.to_string());
        self
    }

    pub fn with_uid(mut self, uid: &str) -> Self {
        self.uid = Some(uid.to_string());
        self
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = generation;
        self
    }

    /// Mark the object as being deleted
    pub fn deleting(mut self) -> Self {
        self.deleting = true;
        self
    }

    pub fn build(self) -> PostgresBootstrap {
        let deletion_timestamp = self.deleting.then(|| {
            serde_json::from_value::<Time>(serde_json::json!("2026-01-01T00:00:00Z")).unwrap()
        });

        PostgresBootstrap {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                uid: self.uid,
                generation: Some(self.generation),
                deletion_timestamp,
                ..Default::default()
            },
            spec: self.spec,
            status: None,
        }
    }
}
