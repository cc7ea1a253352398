//! `tokio-postgres` implementation of [`PostgresAdmin`]
//!
//! One [`AdminConnection`] is opened per reconcile pass. Dropping it aborts the
//! background connection task, so the session never outlives the pass.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::NoTls;
use tokio_postgres_rustls_improved::MakeRustlsConnect;

use super::tls::{self, TlsMode};
use super::{PostgresAdmin, PostgresConnector, PostgresError, PostgresResult, PostgresTarget, sql};
use crate::crd::DatabasePrivilege;

const APPLICATION_NAME: &str = "kube-postgres-bootstrap";

/// Connector producing [`AdminConnection`]s
#[derive(Debug, Clone)]
pub struct TokioPostgresConnector {
    tls_mode: TlsMode,
    connect_timeout: Duration,
    operation_timeout: Duration,
}

impl TokioPostgresConnector {
    pub fn new(tls_mode: TlsMode, connect_timeout: Duration, operation_timeout: Duration) -> Self {
        Self {
            tls_mode,
            connect_timeout,
            operation_timeout,
        }
    }
}

#[async_trait]
impl PostgresConnector for TokioPostgresConnector {
    async fn connect(&self, target: &PostgresTarget) -> PostgresResult<Box<dyn PostgresAdmin>> {
        let session = tokio::time::timeout(
            self.connect_timeout,
            AdminConnection::open(target, &self.tls_mode, self.connect_timeout),
        )
        .await
        .map_err(|_| PostgresError::Timeout {
            operation: "connect",
        })??;

        tracing::debug!(
            host = %target.host,
            port = target.port,
            database = %target.admin_database,
            "Admin session open"
        );

        let (client, driver) = session;
        Ok(Box::new(AdminConnection {
            client,
            driver,
            operation_timeout: self.operation_timeout,
        }))
    }
}

/// A single administrative session
pub struct AdminConnection {
    client: tokio_postgres::Client,
    driver: JoinHandle<()>,
    operation_timeout: Duration,
}

impl AdminConnection {
    /// Credentials go through the typed config builder and never appear in a
    /// connection string.
    async fn open(
        target: &PostgresTarget,
        tls_mode: &TlsMode,
        connect_timeout: Duration,
    ) -> PostgresResult<(tokio_postgres::Client, JoinHandle<()>)> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&target.host)
            .port(target.port)
            .user(&target.admin.username)
            .password(&target.admin.password)
            .dbname(&target.admin_database)
            .application_name(APPLICATION_NAME)
            .connect_timeout(connect_timeout);

        let unreachable = |e: tokio_postgres::Error| PostgresError::Connection {
            host: target.host.clone(),
            port: target.port,
            message: e.to_string(),
        };

        match tls::client_config(tls_mode)? {
            None => {
                let (client, connection) = config.connect(NoTls).await.map_err(unreachable)?;
                Ok((client, drive(connection)))
            }
            Some(tls) => {
                let (client, connection) = config
                    .connect(MakeRustlsConnect::new(tls))
                    .await
                    .map_err(unreachable)?;
                Ok((client, drive(connection)))
            }
        }
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> PostgresResult<T>
    where
        F: Future<Output = Result<T, tokio_postgres::Error>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result.map_err(|e| PostgresError::query(operation, &e)),
            Err(_) => Err(PostgresError::Timeout { operation }),
        }
    }

    async fn execute(&self, operation: &'static str, statement: &str) -> PostgresResult<()> {
        self.timed(operation, self.client.batch_execute(statement))
            .await
    }
}

/// Poll the connection half until the session closes
fn drive<C>(connection: C) -> JoinHandle<()>
where
    C: Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::trace!(error = %e, "Admin session closed");
        }
    })
}

impl Drop for AdminConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl PostgresAdmin for AdminConnection {
    async fn role_exists(&mut self, role: &str) -> PostgresResult<bool> {
        let row = self
            .timed(
                "role lookup",
                self.client.query_opt(sql::ROLE_EXISTS_QUERY, &[&role]),
            )
            .await?;
        Ok(row.is_some())
    }

    async fn create_role(&mut self, role: &str, password: &str) -> PostgresResult<()> {
        self.execute("create role", &sql::create_role(role, password))
            .await
    }

    async fn set_role_password(&mut self, role: &str, password: &str) -> PostgresResult<()> {
        self.execute("set role password", &sql::set_role_password(role, password))
            .await
    }

    async fn database_owner(&mut self, database: &str) -> PostgresResult<Option<String>> {
        let row = self
            .timed(
                "database lookup",
                self.client.query_opt(sql::DATABASE_OWNER_QUERY, &[&database]),
            )
            .await?;
        Ok(row.map(|r| r.get::<_, String>("owner")))
    }

    async fn create_database(
        &mut self,
        database: &str,
        owner: Option<&str>,
    ) -> PostgresResult<()> {
        // Not allowed inside a transaction block
        self.execute("create database", &sql::create_database(database, owner))
            .await
    }

    async fn grant_database_privileges(
        &mut self,
        database: &str,
        role: &str,
        privileges: &[DatabasePrivilege],
    ) -> PostgresResult<()> {
        let Some(statement) = sql::grant_database_privileges(database, role, privileges) else {
            return Ok(());
        };

        let client = &mut self.client;
        let grant = async move {
            let tx = client.transaction().await?;
            tx.batch_execute(&statement).await?;
            tx.commit().await
        };

        match tokio::time::timeout(self.operation_timeout, grant).await {
            Ok(result) => result.map_err(|e| PostgresError::query("grant privileges", &e)),
            Err(_) => Err(PostgresError::Timeout {
                operation: "grant privileges",
            }),
        }
    }
}
