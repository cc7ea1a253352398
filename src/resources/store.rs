//! Kubernetes reads and writes used by a reconcile pass
//!
//! [`ClusterStore`] keeps the reconciler independent of a live API server.
//! [`KubeStore`] is the real implementation; every call carries the configured
//! deadline.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};

use crate::controller::error::{Error, Result};
use crate::crd::{ObjectKey, PostgresBootstrap, PostgresBootstrapStatus};
use crate::resources::common::{FIELD_MANAGER, managed_selector};

#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Current state of a PostgresBootstrap, `None` once it is gone
    async fn get_bootstrap(&self, key: &ObjectKey) -> Result<Option<PostgresBootstrap>>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Fails when the Secret already exists
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()>;

    /// Merge `secret` into the existing Secret named `name`
    async fn patch_secret(&self, namespace: &str, name: &str, secret: &Secret) -> Result<()>;

    async fn patch_status(&self, key: &ObjectKey, status: &PostgresBootstrapStatus) -> Result<()>;

    /// Every credentials Secret this controller manages in its watch scope
    async fn list_managed_secrets(&self) -> Result<Vec<Secret>>;
}

/// [`ClusterStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    timeout: Duration,
    namespace: Option<String>,
}

impl KubeStore {
    /// `namespace` limits listing to one namespace, `None` lists cluster-wide
    pub fn new(client: Client, timeout: Duration, namespace: Option<String>) -> Self {
        Self {
            client,
            timeout,
            namespace,
        }
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, kube::Error>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| Error::TimeoutError {
                operation,
                timeout: self.timeout,
            })?
            .map_err(Error::from)
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_bootstrap(&self, key: &ObjectKey) -> Result<Option<PostgresBootstrap>> {
        let api: Api<PostgresBootstrap> = Api::namespaced(self.client.clone(), &key.namespace);
        self.timed("get PostgresBootstrap", api.get_opt(&key.name))
            .await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        self.timed("get Secret", api.get_opt(name)).await
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.timed("create Secret", api.create(&params, secret))
            .await
            .map(|_| ())
    }

    async fn patch_secret(&self, namespace: &str, name: &str, secret: &Secret) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        self.timed(
            "patch Secret",
            api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(secret)),
        )
        .await
        .map(|_| ())
    }

    async fn patch_status(&self, key: &ObjectKey, status: &PostgresBootstrapStatus) -> Result<()> {
        let api: Api<PostgresBootstrap> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = serde_json::json!({ "status": status });
        self.timed(
            "patch PostgresBootstrap status",
            api.patch_status(&key.name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch)),
        )
        .await
        .map(|_| ())
    }

    async fn list_managed_secrets(&self) -> Result<Vec<Secret>> {
        let api: Api<Secret> = match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let params = ListParams::default().labels(&managed_selector());
        self.timed("list Secrets", api.list(&params))
            .await
            .map(|list| list.items)
    }
}
