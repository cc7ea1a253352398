use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use kube_postgres_bootstrap::health::{HealthState, run_health_server};
use kube_postgres_bootstrap::{BootstrapError, ControllerConfig, run_controller};

const LEASE_NAME: &str = "kube-postgres-bootstrap-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RETRY: Duration = Duration::from_secs(5);

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    install_crypto_provider()?;
    init_tracing()?;

    let config = match ControllerConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "Refusing to start with invalid configuration");
            return Err(BootstrapError::from(e).into());
        }
    };
    info!(
        workers = config.workers,
        namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        "Starting kube-postgres-bootstrap"
    );
    if config.default_admin.is_none() {
        warn!("No default admin credentials, every PostgresBootstrap needs an adminSecretRef");
    }

    let client = Client::try_default().await?;
    let health_state = Arc::new(HealthState::new());

    // Probes answer on every replica, leader or not
    let mut health_server = tokio::spawn(run_health_server(
        Arc::clone(&health_state),
        config.health_addr,
    ));

    let lease = if config.leader_election {
        let lock = lease_lock(client.clone(), &config);
        if !acquire_leadership(&lock).await {
            info!("Shutdown requested while standing by");
            return Ok(());
        }
        Some(tokio::spawn(hold_leadership(lock)))
    } else {
        info!("Leader election disabled, reconciling immediately");
        None
    };

    let controller = run_controller(
        client,
        Arc::clone(&config),
        Some(Arc::clone(&health_state)),
        shutdown_signal(),
    );

    let result: Result<(), BoxError> = tokio::select! {
        result = controller => result.map_err(Into::into),
        joined = &mut health_server => match joined {
            Ok(Ok(())) => Err("health server exited".into()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(e.into()),
        },
        () = lease_lost(lease) => Err("leadership lost".into()),
    };

    match &result {
        Ok(()) => info!("Controller stopped"),
        Err(e) => error!(error = %e, "Controller exiting with an error"),
    }
    result
}

fn install_crypto_provider() -> Result<(), BoxError> {
    let installed = rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_ok();
    if installed || rustls::crypto::CryptoProvider::get_default().is_some() {
        Ok(())
    } else {
        Err("no rustls crypto provider available".into())
    }
}

fn init_tracing() -> Result<(), BoxError> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("kube_postgres_bootstrap=info".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("kube_leader_election=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn lease_lock(client: Client, config: &ControllerConfig) -> LeaseLock {
    let holder_id = config.pod_name.clone().unwrap_or_else(|| {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "kube-postgres-bootstrap".to_string())
    });
    let namespace = config
        .pod_namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());

    info!(%holder_id, %namespace, lease = LEASE_NAME, "Using lease for leader election");
    LeaseLock::new(
        client,
        &namespace,
        LeaseLockParams {
            holder_id,
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: LEASE_TTL,
        },
    )
}

/// Block until this replica holds the lease, false if shutdown came first
async fn acquire_leadership(lock: &LeaseLock) -> bool {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        match lock.try_acquire_or_renew().await {
            Ok(lease) if lease.acquired_lease => {
                info!("Leadership acquired");
                return true;
            }
            Ok(_) => info!("Standing by, lease held by another replica"),
            Err(e) => warn!(error = %e, "Lease acquisition failed"),
        }
        tokio::select! {
            () = tokio::time::sleep(LEASE_RETRY) => {}
            () = &mut shutdown => return false,
        }
    }
}

/// Renew the lease until a renewal fails or another replica takes it
async fn hold_leadership(lock: LeaseLock) {
    let mut ticker = tokio::time::interval(LEASE_RETRY);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match lock.try_acquire_or_renew().await {
            Ok(lease) if lease.acquired_lease => {}
            Ok(_) => {
                error!("Lease taken over by another replica");
                return;
            }
            Err(e) => {
                error!(error = %e, "Lease renewal failed");
                return;
            }
        }
    }
}

/// Resolves when the renewal task ends, never without leader election
async fn lease_lost(lease: Option<JoinHandle<()>>) {
    match lease {
        Some(handle) => {
            if let Err(e) = handle.await {
                error!(error = %e, "Lease renewal task failed");
            }
        }
        None => std::future::pending().await,
    }
}

/// SIGINT or SIGTERM
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}
