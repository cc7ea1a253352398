use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::ControllerConfig;
use crate::controller::validation::Endpoint;
use crate::crd::ObjectKey;
use crate::health::HealthState;
use crate::postgres::PostgresConnector;
use crate::resources::credentials::{GeneratedCredential, generate_password};
use crate::resources::store::ClusterStore;

/// A password generated for a role whose Secret is not written yet
struct PendingPassword {
    role: String,
    password: String,
}

/// Shared context for reconcile passes
pub struct Context {
    /// Kubernetes reads and writes
    pub store: Arc<dyn ClusterStore>,
    /// Opens PostgreSQL admin sessions
    pub connector: Arc<dyn PostgresConnector>,
    pub config: Arc<ControllerConfig>,
    /// Health state for recording metrics
    pub health_state: Option<Arc<HealthState>>,
    pending: Mutex<HashMap<ObjectKey, PendingPassword>>,
    /// Consecutive transient failures per identity, drives the retry delay
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl Context {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        connector: Arc<dyn PostgresConnector>,
        config: Arc<ControllerConfig>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            store,
            connector,
            config,
            health_state,
            pending: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<ObjectKey, PendingPassword>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Credentials for a first-creation pass
    ///
    /// Reuses the password from an earlier unfinished pass for the same role so
    /// a retry does not rotate it again. Returns whether a new password was drawn.
    pub fn pending_or_generate(
        &self,
        key: &ObjectKey,
        role: &str,
        database: &str,
        endpoint: &Endpoint,
    ) -> (GeneratedCredential, bool) {
        let mut pending = self.pending();

        let (password, fresh) = match pending.get(key) {
            Some(entry) if entry.role == role => (entry.password.clone(), false),
            _ => {
                let password = generate_password();
                pending.insert(
                    key.clone(),
                    PendingPassword {
                        role: role.to_string(),
                        password: password.clone(),
                    },
                );
                (password, true)
            }
        };

        let credential = GeneratedCredential {
            role: role.to_string(),
            password,
            database: database.to_string(),
            host: endpoint.host.clone(),
            port: endpoint.port,
        };
        (credential, fresh)
    }

    /// Drop the pending password for `key`
    pub fn forget_pending(&self, key: &ObjectKey) {
        self.pending().remove(key);
    }

    pub fn has_pending(&self, key: &ObjectKey) -> bool {
        self.pending().contains_key(key)
    }

    /// Another identity holding an unwritten password for `role`
    pub fn pending_holder_of(&self, role: &str, except: &ObjectKey) -> Option<ObjectKey> {
        self.pending()
            .iter()
            .find(|(key, entry)| *key != except && entry.role == role)
            .map(|(key, _)| key.clone())
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<ObjectKey, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a transient failure, returning how many preceded it
    pub fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut failures = self.failures();
        let count = failures.entry(key.clone()).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        previous
    }

    pub fn reset_failures(&self, key: &ObjectKey) {
        self.failures().remove(key);
    }

    pub fn failure_count(&self, key: &ObjectKey) -> u32 {
        self.failures().get(key).copied().unwrap_or(0)
    }
}
