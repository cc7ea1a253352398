//! Status construction for PostgresBootstrap
//!
//! Status is the only place an error is shown to users, so every message passes
//! through [`sanitize_message`] first.

use chrono::{SecondsFormat, Utc};

use crate::crd::{BootstrapPhase, PostgresBootstrap, PostgresBootstrapStatus};

/// Replacement for secrets found in messages
pub const REDACTED: &str = "<redacted>";

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn status(
    bootstrap: &PostgresBootstrap,
    phase: BootstrapPhase,
    message: Option<String>,
) -> PostgresBootstrapStatus {
    PostgresBootstrapStatus {
        phase,
        last_reconciled_at: Some(now()),
        message,
        observed_generation: bootstrap.metadata.generation,
        secret_name: Some(bootstrap.secret_name()),
    }
}

/// First-creation pass in progress
pub fn provisioning_status(bootstrap: &PostgresBootstrap) -> PostgresBootstrapStatus {
    status(
        bootstrap,
        BootstrapPhase::Provisioning,
        Some("Provisioning role and database".to_string()),
    )
}

/// Role, databases and Secret are in place
pub fn ready_status(bootstrap: &PostgresBootstrap) -> PostgresBootstrapStatus {
    status(
        bootstrap,
        BootstrapPhase::Ready,
        Some(format!(
            "Role {} provisioned on {}",
            bootstrap.spec.role,
            bootstrap.spec.all_databases().join(", ")
        )),
    )
}

/// The last pass failed with `message`
///
/// `secrets` are scrubbed from the message before it is stored.
pub fn failed_status(
    bootstrap: &PostgresBootstrap,
    message: &str,
    secrets: &[&str],
) -> PostgresBootstrapStatus {
    status(
        bootstrap,
        BootstrapPhase::Failed,
        Some(sanitize_message(message, secrets)),
    )
}

/// Replace every occurrence of any non-empty secret with [`REDACTED`]
pub fn sanitize_message(message: &str, secrets: &[&str]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_empty())
        .fold(message.to_string(), |acc, secret| acc.replace(secret, REDACTED))
}
