pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod postgres;
pub mod resources;

pub use config::{AdminCredentials, ConfigError, ControllerConfig};
pub use controller::{BootstrapError, Context, Error, Outcome, Result, error_policy, reconcile};
pub use crd::{ObjectKey, PostgresBootstrap, PostgresBootstrapSpec, PostgresBootstrapStatus};
pub use health::{HealthState, Metrics};

use std::future::Future;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::api::ListParams;
use kube::runtime::controller::{self as runtime_controller, Controller};
use kube::runtime::reflector::{self, Store};
use kube::runtime::{WatchStreamExt, predicates, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

use crate::postgres::TokioPostgresConnector;
use crate::resources::{KubeStore, managed_selector};

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Check that PostgresBootstrap objects can be listed at all
pub async fn verify_access(
    api: &Api<PostgresBootstrap>,
) -> std::result::Result<(), kube::Error> {
    api.list(&ListParams::default().limit(1)).await.map(|_| ())
}

/// Drop objects whose `metadata.generation` has not moved since they were last seen
///
/// Status writes leave the generation alone, so they never trigger a pass.
pub fn spec_changes<S>(
    objects: S,
) -> impl Stream<Item = std::result::Result<PostgresBootstrap, watcher::Error>> + Send + 'static
where
    S: Stream<Item = std::result::Result<PostgresBootstrap, watcher::Error>> + Send + 'static,
{
    objects.predicate_filter(predicates::generation)
}

/// Run the bootstrap controller until `shutdown` resolves.
///
/// Checks that PostgresBootstrap objects can be listed, then runs a kube-runtime
/// [`Controller`] over them and the Secrets it manages. Only spec changes
/// (a new `metadata.generation`) trigger a pass; status writes do not. On
/// shutdown no new passes start and in-flight ones get `shutdown_grace_period`
/// to finish.
///
/// If health_state is provided, readiness and metrics are recorded.
pub async fn run_controller<S>(
    client: Client,
    config: Arc<ControllerConfig>,
    health_state: Option<Arc<HealthState>>,
    shutdown: S,
) -> std::result::Result<(), BootstrapError>
where
    S: Future<Output = ()>,
{
    let namespace = config.watch_namespace.as_deref();
    tracing::info!(
        scope = namespace.unwrap_or("cluster-wide"),
        workers = config.workers,
        "Starting controller for PostgresBootstrap resources"
    );

    let bootstraps: Api<PostgresBootstrap> = scoped_api(client.clone(), namespace);
    let secrets: Api<Secret> = scoped_api(client.clone(), namespace);

    verify_access(&bootstraps)
        .await
        .map_err(BootstrapError::Watch)?;

    let ctx = Arc::new(Context::new(
        Arc::new(KubeStore::new(
            client.clone(),
            config.kube_api_timeout,
            config.watch_namespace.clone(),
        )),
        Arc::new(TokioPostgresConnector::new(
            config.tls_mode.clone(),
            config.pg_connect_timeout,
            config.pg_operation_timeout,
        )),
        Arc::clone(&config),
        health_state.clone(),
    ));

    let (reader, writer) = reflector::store();
    let changes = spec_changes(
        watcher(bootstraps, watcher::Config::default())
            .default_backoff()
            .reflect(writer)
            .applied_objects(),
    );

    let readiness = tokio::spawn(mark_ready_when_synced(reader.clone(), health_state.clone()));

    let concurrency = u16::try_from(config.workers).unwrap_or(u16::MAX);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let controller = Controller::for_stream(changes, reader)
        .owns(secrets, watcher::Config::default().labels(&managed_selector()))
        .with_config(runtime_controller::Config::default().concurrency(concurrency))
        .graceful_shutdown_on(async move {
            let _ = stop_rx.await;
        })
        .run(reconcile, error_policy, Arc::clone(&ctx))
        .for_each(|result| {
            let ctx = Arc::clone(&ctx);
            async move {
                match result {
                    Ok((obj, _action)) => {
                        tracing::debug!(namespace = ?obj.namespace, name = %obj.name, "Reconciled");
                    }
                    // Scheduled again after the object went away
                    Err(runtime_controller::Error::ObjectNotFound(obj)) => {
                        tracing::debug!(namespace = ?obj.namespace, name = %obj.name, "Object no longer exists");
                        let key = ObjectKey::new(obj.namespace.unwrap_or_default(), obj.name);
                        ctx.forget_pending(&key);
                        ctx.reset_failures(&key);
                    }
                    // Logged by error_policy
                    Err(runtime_controller::Error::ReconcilerFailed(..)) => {}
                    Err(e) => tracing::warn!(error = %e, "Controller error"),
                }
            }
        });
    tokio::pin!(controller);

    let result = tokio::select! {
        () = shutdown => {
            tracing::info!("Shutdown requested, draining in-flight passes");
            Ok(())
        }
        () = &mut controller => Err(BootstrapError::WatchEnded("PostgresBootstrap")),
    };

    if let Some(state) = &health_state {
        state.set_ready(false);
    }
    readiness.abort();

    if result.is_ok() {
        let _ = stop_tx.send(());
        if tokio::time::timeout(config.shutdown_grace_period, &mut controller)
            .await
            .is_err()
        {
            tracing::warn!("Grace period elapsed with passes still running, abandoning them");
        }
    }

    tracing::info!("Controller stopped");
    result
}

/// Mark the controller ready once the first PostgresBootstrap list is cached
async fn mark_ready_when_synced(
    reader: Store<PostgresBootstrap>,
    health_state: Option<Arc<HealthState>>,
) {
    if reader.wait_until_ready().await.is_err() {
        return;
    }
    tracing::info!(objects = reader.state().len(), "Initial PostgresBootstrap list processed");
    if let Some(state) = health_state {
        state.set_ready(true);
    }
}
