//! In-memory stand-ins for the Kubernetes API and a PostgreSQL server
//!
//! [`FakeStore`] and [`FakePostgres`] implement the traits the reconciler talks
//! through, record what was done to them, and can be told to fail.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

use kube_postgres_bootstrap::config::ControllerConfig;
use kube_postgres_bootstrap::controller::{Context, Error, Result};
use kube_postgres_bootstrap::crd::{
    DatabasePrivilege, ObjectKey, PostgresBootstrap, PostgresBootstrapStatus,
};
use kube_postgres_bootstrap::postgres::{
    PostgresAdmin, PostgresConnector, PostgresError, PostgresResult, PostgresTarget,
};
use kube_postgres_bootstrap::resources::ClusterStore;
use kube_postgres_bootstrap::resources::common::{FIELD_MANAGER, MANAGED_BY_LABEL};

fn transient(operation: &'static str) -> Error {
    Error::TimeoutError {
        operation,
        timeout: Duration::from_secs(1),
    }
}

#[derive(Default)]
pub struct StoreState {
    pub bootstraps: BTreeMap<ObjectKey, PostgresBootstrap>,
    pub secrets: BTreeMap<(String, String), Secret>,
    /// Every status written, oldest first
    pub statuses: Vec<(ObjectKey, PostgresBootstrapStatus)>,
    /// Number of upcoming `create_secret` calls that fail
    pub fail_create_secret: u32,
    pub fail_status: bool,
    pub secret_creates: u32,
    pub secret_patches: u32,
}

/// [`ClusterStore`] over in-memory maps
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    pub fn put_bootstrap(&self, bootstrap: PostgresBootstrap) {
        self.state().bootstraps.insert(bootstrap.key(), bootstrap);
    }

    pub fn remove_bootstrap(&self, key: &ObjectKey) {
        self.state().bootstraps.remove(key);
    }

    pub fn put_secret(&self, secret: Secret) {
        let key = (secret.namespace().unwrap(), secret.name_any());
        self.state().secrets.insert(key, secret);
    }

    pub fn remove_secret(&self, namespace: &str, name: &str) {
        self.state()
            .secrets
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn last_status(&self, key: &ObjectKey) -> Option<PostgresBootstrapStatus> {
        self.state()
            .statuses
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, status)| status.clone())
    }
}

#[async_trait]
impl ClusterStore for FakeStore {
    async fn get_bootstrap(&self, key: &ObjectKey) -> Result<Option<PostgresBootstrap>> {
        Ok(self.state().bootstraps.get(key).cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let mut state = self.state();
        if state.fail_create_secret > 0 {
            state.fail_create_secret -= 1;
            return Err(transient("create Secret"));
        }
        let key = (namespace.to_string(), secret.name_any());
        if state.secrets.contains_key(&key) {
            return Err(Error::KubeError(kube::Error::Api(
                kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "secret already exists".to_string(),
                    reason: "AlreadyExists".to_string(),
                    code: 409,
                },
            )));
        }
        let mut stored = secret.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        state.secrets.insert(key, stored);
        state.secret_creates += 1;
        Ok(())
    }

    async fn patch_secret(&self, namespace: &str, name: &str, secret: &Secret) -> Result<()> {
        let mut state = self.state();
        let Some(existing) = state
            .secrets
            .get_mut(&(namespace.to_string(), name.to_string()))
        else {
            return Err(transient("patch Secret"));
        };

        if let Some(data) = &secret.data {
            existing
                .data
                .get_or_insert_with(BTreeMap::new)
                .extend(data.clone());
        }
        if let Some(labels) = &secret.metadata.labels {
            existing
                .metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .extend(labels.clone());
        }
        if secret.metadata.owner_references.is_some() {
            existing.metadata.owner_references = secret.metadata.owner_references.clone();
        }
        state.secret_patches += 1;
        Ok(())
    }

    async fn patch_status(&self, key: &ObjectKey, status: &PostgresBootstrapStatus) -> Result<()> {
        let mut state = self.state();
        if state.fail_status {
            return Err(transient("patch PostgresBootstrap status"));
        }
        state.statuses.push((key.clone(), status.clone()));
        Ok(())
    }

    async fn list_managed_secrets(&self) -> Result<Vec<Secret>> {
        Ok(self
            .state()
            .secrets
            .values()
            .filter(|secret| {
                secret.labels().get(MANAGED_BY_LABEL).map(String::as_str) == Some(FIELD_MANAGER)
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct ServerState {
    /// Role name to current password
    pub roles: BTreeMap<String, String>,
    /// Database name to owner
    pub databases: BTreeMap<String, String>,
    /// Privileges granted per (database, role)
    pub grants: HashMap<(String, String), Vec<DatabasePrivilege>>,
    /// Statements that changed the server, in order
    pub ddl: Vec<String>,
    pub connects: u32,
    pub last_target: Option<PostgresTarget>,
    /// Message of the next connection failure, consumed when used
    pub connect_error: Option<String>,
    /// Operation that fails once, e.g. `"create_database"`
    pub fail_once: Option<&'static str>,
}

/// A PostgreSQL server held in memory, shared between sessions
#[derive(Clone, Default)]
pub struct FakePostgres {
    state: Arc<Mutex<ServerState>>,
}

impl FakePostgres {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn add_role(&self, role: &str, password: &str) {
        self.state()
            .roles
            .insert(role.to_string(), password.to_string());
    }

    pub fn add_database(&self, database: &str, owner: &str) {
        self.state()
            .databases
            .insert(database.to_string(), owner.to_string());
    }

    pub fn password_of(&self, role: &str) -> Option<String> {
        self.state().roles.get(role).cloned()
    }

    pub fn owner_of(&self, database: &str) -> Option<String> {
        self.state().databases.get(database).cloned()
    }

    pub fn grants_of(&self, database: &str, role: &str) -> Vec<DatabasePrivilege> {
        self.state()
            .grants
            .get(&(database.to_string(), role.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn ddl(&self) -> Vec<String> {
        self.state().ddl.clone()
    }

    pub fn connects(&self) -> u32 {
        self.state().connects
    }
}

#[async_trait]
impl PostgresConnector for FakePostgres {
    async fn connect(&self, target: &PostgresTarget) -> PostgresResult<Box<dyn PostgresAdmin>> {
        let mut state = self.state();
        state.connects += 1;
        state.last_target = Some(target.clone());
        if let Some(message) = state.connect_error.take() {
            return Err(PostgresError::Connection {
                host: target.host.clone(),
                port: target.port,
                message,
            });
        }
        Ok(Box::new(FakeSession {
            server: self.clone(),
            admin_user: target.admin.username.clone(),
        }))
    }
}

struct FakeSession {
    server: FakePostgres,
    admin_user: String,
}

impl FakeSession {
    fn check(&self, operation: &'static str) -> PostgresResult<MutexGuard<'_, ServerState>> {
        let mut state = self.server.state();
        if state.fail_once == Some(operation) {
            state.fail_once = None;
            return Err(PostgresError::Query {
                operation,
                message: "server closed the connection unexpectedly".to_string(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl PostgresAdmin for FakeSession {
    async fn role_exists(&mut self, role: &str) -> PostgresResult<bool> {
        Ok(self.check("role_exists")?.roles.contains_key(role))
    }

    async fn create_role(&mut self, role: &str, password: &str) -> PostgresResult<()> {
        let mut state = self.check("create_role")?;
        state.roles.insert(role.to_string(), password.to_string());
        state.ddl.push(format!("CREATE ROLE {}", role));
        Ok(())
    }

    async fn set_role_password(&mut self, role: &str, password: &str) -> PostgresResult<()> {
        let mut state = self.check("set_role_password")?;
        state.roles.insert(role.to_string(), password.to_string());
        state.ddl.push(format!("ALTER ROLE {}", role));
        Ok(())
    }

    async fn database_owner(&mut self, database: &str) -> PostgresResult<Option<String>> {
        Ok(self.check("database_owner")?.databases.get(database).cloned())
    }

    async fn create_database(
        &mut self,
        database: &str,
        owner: Option<&str>,
    ) -> PostgresResult<()> {
        let admin = self.admin_user.clone();
        let mut state = self.check("create_database")?;
        let owner = owner.map(str::to_string).unwrap_or(admin);
        state.databases.insert(database.to_string(), owner);
        state.ddl.push(format!("CREATE DATABASE {}", database));
        Ok(())
    }

    async fn grant_database_privileges(
        &mut self,
        database: &str,
        role: &str,
        privileges: &[DatabasePrivilege],
    ) -> PostgresResult<()> {
        let mut state = self.check("grant_database_privileges")?;
        let held = state
            .grants
            .entry((database.to_string(), role.to_string()))
            .or_default();
        for privilege in privileges {
            if *privilege != DatabasePrivilege::Owner && !held.contains(privilege) {
                held.push(*privilege);
            }
        }
        Ok(())
    }
}

/// A reconcile [`Context`] wired to fresh fakes
pub struct Harness {
    pub store: Arc<FakeStore>,
    pub postgres: FakePostgres,
    pub ctx: Context,
}

impl Harness {
    pub fn new(config: ControllerConfig) -> Self {
        let store = Arc::new(FakeStore::new());
        let postgres = FakePostgres::new();
        let ctx = Context::new(
            store.clone(),
            Arc::new(postgres.clone()),
            Arc::new(config),
            None,
        );
        Self {
            store,
            postgres,
            ctx,
        }
    }

    /// Harness with `bootstrap` already stored
    pub fn with_bootstrap(config: ControllerConfig, bootstrap: PostgresBootstrap) -> Self {
        let harness = Self::new(config);
        harness.store.put_bootstrap(bootstrap);
        harness
    }
}
