//! Validation of PostgresBootstrap specs
//!
//! Everything here runs before PostgreSQL is contacted. A failure is a
//! validation error and waits for the object to change.

use crate::config::ControllerConfig;
use crate::controller::error::{Error, Result};
use crate::crd::{PostgresBootstrap, PostgresBootstrapSpec};
use crate::postgres::sql::is_valid_identifier;

/// Prefix PostgreSQL reserves for built-in roles
pub const RESERVED_ROLE_PREFIX: &str = "pg_";

/// Maximum length of a Kubernetes object name (DNS subdomain)
pub const MAX_SECRET_NAME_LEN: usize = 253;

/// Where the role's credentials point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Validate a PostgresBootstrap
pub fn validate_spec(bootstrap: &PostgresBootstrap) -> Result<()> {
    let spec = &bootstrap.spec;

    validate_role(&spec.role)?;
    for database in spec.all_databases() {
        validate_database(database)?;
    }
    validate_privileges(spec)?;
    validate_secret_name(&bootstrap.secret_name())?;

    if let Some(admin) = &spec.admin_secret_ref {
        if admin.name.trim().is_empty() {
            return Err(Error::ValidationError(
                "adminSecretRef.name must not be empty".to_string(),
            ));
        }
        if admin.username_key.is_empty() || admin.password_key.is_empty() {
            return Err(Error::ValidationError(
                "adminSecretRef keys must not be empty".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_role(role: &str) -> Result<()> {
    if !is_valid_identifier(role) {
        return Err(Error::ValidationError(format!(
            "role {:?} is not a valid identifier (lowercase letters, digits and underscores, at most 63 characters)",
            role
        )));
    }
    if role.starts_with(RESERVED_ROLE_PREFIX) {
        return Err(Error::ValidationError(format!(
            "role {:?} uses the reserved prefix {:?}",
            role, RESERVED_ROLE_PREFIX
        )));
    }
    Ok(())
}

fn validate_database(database: &str) -> Result<()> {
    if !is_valid_identifier(database) {
        return Err(Error::ValidationError(format!(
            "database {:?} is not a valid identifier (lowercase letters, digits and underscores, at most 63 characters)",
            database
        )));
    }
    Ok(())
}

fn validate_privileges(spec: &PostgresBootstrapSpec) -> Result<()> {
    if spec.privileges.is_empty() {
        return Err(Error::ValidationError(
            "privileges must list at least one privilege".to_string(),
        ));
    }
    Ok(())
}

fn validate_secret_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_SECRET_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric());

    if valid {
        Ok(())
    } else {
        Err(Error::ValidationError(format!(
            "secret name {:?} is not a valid Kubernetes object name",
            name
        )))
    }
}

/// Resolve host and port from `pgHost`/`pgPort`, falling back to controller defaults
pub fn resolve_endpoint(spec: &PostgresBootstrapSpec, config: &ControllerConfig) -> Result<Endpoint> {
    let host = spec
        .pg_host
        .as_deref()
        .or(config.default_pg_host.as_deref())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| {
            Error::ValidationError("no pgHost set and no DB_HOST default configured".to_string())
        })?;

    let port = match spec.pg_port {
        Some(port) => u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| Error::ValidationError(format!("pgPort {} is out of range", port)))?,
        None => config.default_pg_port,
    };

    Ok(Endpoint {
        host: host.to_string(),
        port,
    })
}
