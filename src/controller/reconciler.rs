//! Reconciliation logic for PostgresBootstrap resources
//!
//! One pass brings PostgreSQL and the credentials Secret in line with a single
//! PostgresBootstrap:
//!
//! 1. fetch the object, stop if it is gone
//! 2. validate it without touching PostgreSQL
//! 3. read the existing Secret, or draw a password if there is none
//! 4. converge role, databases and grants
//! 5. write the Secret, then the status
//!
//! Credentials are generated only when no Secret exists. Once a Secret is
//! written, its password is never changed by the controller.

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AdminCredentials;
use crate::controller::context::Context;
use crate::controller::error::{Error, ErrorKind, Result};
use crate::controller::status::{failed_status, provisioning_status, ready_status};
use crate::controller::validation::{Endpoint, resolve_endpoint, validate_spec};
use crate::crd::{ObjectKey, PostgresBootstrap};
use crate::postgres::{PasswordMode, PostgresTarget, ProvisionPlan, provision};
use crate::resources::secret::{
    HOST_KEY, PORT_KEY, SecretAction, build_credentials_secret, check_ownership,
    credentials_from_secret, plan_upsert, read_role,
};

/// Result of a successful pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The object no longer exists, nothing was done
    Deleted,
    /// Role, databases and Secret are in place
    Ready {
        /// Whether this pass distributed new credentials
        credentials_generated: bool,
    },
}

/// Reconcile entry point for the kube-runtime controller
///
/// Runs one pass and decides when the object comes back: after the resync
/// interval, or on its next change when resync is off.
pub async fn reconcile(bootstrap: Arc<PostgresBootstrap>, ctx: Arc<Context>) -> Result<Action> {
    let key = bootstrap.key();
    let _in_flight = ctx
        .health_state
        .as_ref()
        .map(|state| state.metrics.track_pass());
    let start = Instant::now();

    let outcome = run_pass(&key, &ctx).await?;
    ctx.reset_failures(&key);

    match outcome {
        Outcome::Deleted => Ok(Action::await_change()),
        Outcome::Ready {
            credentials_generated,
        } => {
            if let Some(state) = &ctx.health_state {
                state
                    .metrics
                    .record_success(&key, start.elapsed(), credentials_generated);
                state.mark_success();
            }
            Ok(match ctx.config.resync_interval {
                Some(interval) => Action::requeue(interval),
                None => Action::await_change(),
            })
        }
    }
}

/// Retry transient failures with backoff; leave the rest until the object changes
pub fn error_policy(bootstrap: Arc<PostgresBootstrap>, err: &Error, ctx: Arc<Context>) -> Action {
    let key = bootstrap.key();
    let kind = err.kind();
    if let Some(state) = &ctx.health_state {
        state.metrics.record_failure(&key, kind);
    }

    match kind {
        ErrorKind::Transient => {
            let attempt = ctx.record_failure(&key);
            let delay = ctx.config.backoff.delay_for_attempt(attempt);
            warn!(
                namespace = %key.namespace,
                name = %key.name,
                error = %err,
                attempt = attempt + 1,
                retry_in = ?delay,
                "Reconciliation failed, retrying"
            );
            Action::requeue(delay)
        }
        ErrorKind::Conflict | ErrorKind::Validation => {
            ctx.reset_failures(&key);
            error!(
                namespace = %key.namespace,
                name = %key.name,
                error = %err,
                kind = ?kind,
                "Reconciliation failed, waiting for the object to change"
            );
            Action::await_change()
        }
    }
}

/// One reconcile pass for the object identified by `key`
#[instrument(skip_all, fields(namespace = %key.namespace, name = %key.name))]
pub async fn run_pass(key: &ObjectKey, ctx: &Context) -> Result<Outcome> {
    let Some(bootstrap) = ctx.store.get_bootstrap(key).await? else {
        debug!("PostgresBootstrap no longer exists");
        ctx.forget_pending(key);
        return Ok(Outcome::Deleted);
    };

    if bootstrap.metadata.deletion_timestamp.is_some() {
        debug!("PostgresBootstrap is being deleted");
        ctx.forget_pending(key);
        return Ok(Outcome::Deleted);
    }

    // Passwords seen during the pass, scrubbed from any status message
    let mut known_secrets: Vec<String> = Vec::new();

    match reconcile_bootstrap(key, &bootstrap, ctx, &mut known_secrets).await {
        Ok(outcome) => {
            ctx.store
                .patch_status(key, &ready_status(&bootstrap))
                .await?;
            info!(role = %bootstrap.spec.role, "Reconciliation completed successfully");
            Ok(outcome)
        }
        Err(e) => {
            let secrets: Vec<&str> = known_secrets.iter().map(String::as_str).collect();
            let status = failed_status(&bootstrap, &e.to_string(), &secrets);
            if let Err(status_err) = ctx.store.patch_status(key, &status).await {
                warn!(error = %status_err, "Failed to record failure in status");
            }
            Err(e)
        }
    }
}

async fn reconcile_bootstrap(
    key: &ObjectKey,
    bootstrap: &PostgresBootstrap,
    ctx: &Context,
    known_secrets: &mut Vec<String>,
) -> Result<Outcome> {
    let spec = &bootstrap.spec;

    validate_spec(bootstrap)?;
    let endpoint = resolve_endpoint(spec, &ctx.config)?;

    let secret_name = bootstrap.secret_name();
    let existing = ctx.store.get_secret(&key.namespace, &secret_name).await?;

    let (credential, mode) = match &existing {
        Some(secret) => {
            check_ownership(secret, bootstrap)?;
            let credential = credentials_from_secret(secret, &endpoint.host, endpoint.port)?;
            known_secrets.push(credential.password.clone());

            if credential.role != spec.role || credential.database != spec.database {
                return Err(Error::ConflictError(format!(
                    "secret {} holds credentials for role {} on database {}, spec asks for role {} on database {}",
                    secret_name, credential.role, credential.database, spec.role, spec.database
                )));
            }

            // A Secret exists, so any unfinished first-creation attempt is moot
            ctx.forget_pending(key);
            (credential, PasswordMode::PreserveExisting)
        }
        None => {
            ensure_role_unclaimed(key, bootstrap, &secret_name, &endpoint, ctx).await?;
            let (credential, fresh) =
                ctx.pending_or_generate(key, &spec.role, &spec.database, &endpoint);
            known_secrets.push(credential.password.clone());

            if fresh {
                info!(role = %spec.role, "No credentials secret found, generated new credentials");
            } else {
                info!(role = %spec.role, "Retrying with previously generated credentials");
            }

            ctx.store
                .patch_status(key, &provisioning_status(bootstrap))
                .await?;
            (credential, PasswordMode::Reset)
        }
    };

    let admin = resolve_admin_credentials(bootstrap, ctx).await?;
    known_secrets.push(admin.password.clone());

    if admin.username == spec.role {
        return Err(Error::ValidationError(format!(
            "role {} is the administrative role used by the controller",
            spec.role
        )));
    }

    let target = PostgresTarget {
        host: endpoint.host.clone(),
        port: endpoint.port,
        admin_database: ctx.config.admin_database.clone(),
        admin,
    };

    let plan = ProvisionPlan::from_spec(spec);
    let report = {
        let mut session = ctx.connector.connect(&target).await?;
        provision(session.as_mut(), &plan, &credential.password, mode).await?
    };

    debug!(
        role_created = report.role_created,
        password_reset = report.password_reset,
        databases_created = ?report.databases_created,
        "PostgreSQL state converged"
    );

    let desired = build_credentials_secret(bootstrap, &credential);
    write_secret(key, &secret_name, existing.as_ref(), desired, bootstrap, ctx).await?;

    let credentials_generated = mode == PasswordMode::Reset;
    if credentials_generated {
        ctx.forget_pending(key);
        info!(secret = %secret_name, role = %spec.role, "Created credentials secret");
    }

    Ok(Outcome::Ready {
        credentials_generated,
    })
}

/// Refuse a role whose credentials another identity already handed out
///
/// Setting a new password on such a role would break the other identity's
/// Secret, so the first-creation path stops here instead.
async fn ensure_role_unclaimed(
    key: &ObjectKey,
    bootstrap: &PostgresBootstrap,
    secret_name: &str,
    endpoint: &Endpoint,
    ctx: &Context,
) -> Result<()> {
    let role = &bootstrap.spec.role;

    if let Some(holder) = ctx.pending_holder_of(role, key) {
        return Err(Error::ConflictError(format!(
            "role {} is being provisioned for {}",
            role, holder
        )));
    }

    let port = endpoint.port.to_string();
    let claimed = ctx.store.list_managed_secrets().await?.into_iter().find(|secret| {
        let same_secret = secret.namespace().as_deref() == Some(key.namespace.as_str())
            && secret.name_any() == secret_name;
        let same_owner = secret
            .owner_references()
            .iter()
            .any(|owner| Some(owner.uid.as_str()) == bootstrap.metadata.uid.as_deref());
        let field = |k: &str| {
            secret
                .data
                .as_ref()
                .and_then(|data| data.get(k))
                .map(|v| v.0.as_slice())
        };
        let same_server = field(HOST_KEY).is_none_or(|h| h == endpoint.host.as_bytes())
            && field(PORT_KEY).is_none_or(|p| p == port.as_bytes());

        let same_role = read_role(secret).as_deref() == Some(role.as_str());

        !same_secret && !same_owner && same_server && same_role
    });

    match claimed {
        Some(secret) => Err(Error::ConflictError(format!(
            "role {} already belongs to credentials secret {}/{}",
            role,
            secret.namespace().unwrap_or_default(),
            secret.name_any()
        ))),
        None => Ok(()),
    }
}

async fn write_secret(
    key: &ObjectKey,
    secret_name: &str,
    existing: Option<&Secret>,
    desired: Secret,
    bootstrap: &PostgresBootstrap,
    ctx: &Context,
) -> Result<()> {
    match plan_upsert(existing, desired, bootstrap)? {
        SecretAction::Create(secret) => {
            ctx.store.create_secret(&key.namespace, &secret).await?;
        }
        SecretAction::Patch(secret) => {
            info!(secret = %secret_name, "Refreshing credentials secret metadata");
            ctx.store
                .patch_secret(&key.namespace, secret_name, &secret)
                .await?;
        }
        SecretAction::Unchanged => {
            debug!(secret = %secret_name, "Credentials secret up to date");
        }
    }
    Ok(())
}

/// Administrative credentials for the object's server
///
/// Taken from `adminSecretRef` when set, otherwise from the controller defaults.
async fn resolve_admin_credentials(
    bootstrap: &PostgresBootstrap,
    ctx: &Context,
) -> Result<AdminCredentials> {
    let Some(reference) = &bootstrap.spec.admin_secret_ref else {
        return ctx.config.default_admin.clone().ok_or_else(|| {
            Error::AdminCredentialsError(
                "no adminSecretRef set and no DB_USERNAME/DB_PASSWORD configured".to_string(),
            )
        });
    };

    let namespace = reference
        .namespace
        .clone()
        .or_else(|| bootstrap.namespace())
        .unwrap_or_default();
    let location = format!("{}/{}", namespace, reference.name);

    let secret = ctx
        .store
        .get_secret(&namespace, &reference.name)
        .await?
        .ok_or_else(|| Error::AdminSecretNotFound(location.clone()))?;

    let read = |field: &str| -> Result<String> {
        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(field))
            .ok_or_else(|| {
                Error::AdminCredentialsError(format!("secret {} has no key {}", location, field))
            })?;
        String::from_utf8(raw.0.clone())
            .ok()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                Error::AdminCredentialsError(format!(
                    "secret {} key {} is empty or not UTF-8",
                    location, field
                ))
            })
    };

    Ok(AdminCredentials {
        username: read(&reference.username_key)?,
        password: read(&reference.password_key)?,
    })
}
