//! Credentials Secret building and upsert planning
//!
//! The credential keys (`role`, `password`, `database`) are write-once. Endpoint
//! keys, labels and the owner reference may be refreshed at any time.
//!
//! Secrets written by the older bootstrap job carry `username` and `database.0`
//! instead of `role` and `database`. They are read through those names and
//! get the current keys patched in alongside.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::PostgresBootstrap;
use crate::resources::common::{is_bootstrap_owner, owner_reference, standard_labels};
use crate::resources::credentials::GeneratedCredential;

pub const ROLE_KEY: &str = "role";
pub const PASSWORD_KEY: &str = "password";
pub const DATABASE_KEY: &str = "database";
pub const HOST_KEY: &str = "host";
pub const PORT_KEY: &str = "port";
pub const CONNECTION_STRING_KEY: &str = "connectionString";

const LEGACY_ROLE_KEY: &str = "username";
const LEGACY_DATABASE_KEY: &str = "database.0";

/// Why an existing Secret cannot be used for an object
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretConflict {
    #[error("secret {secret} is owned by another object")]
    ForeignOwner { secret: String },

    #[error("secret {secret} is missing key {key}")]
    MissingKey { secret: String, key: &'static str },

    #[error("secret {secret} has non-UTF-8 data under key {key}")]
    InvalidUtf8 { secret: String, key: &'static str },

    #[error("secret {secret} holds different credentials ({key} differs)")]
    CredentialMismatch { secret: String, key: &'static str },
}

/// What an upsert has to do
#[derive(Debug, Clone, PartialEq)]
pub enum SecretAction {
    Create(Secret),
    Patch(Secret),
    Unchanged,
}

/// Build the credentials Secret for `bootstrap`
pub fn build_credentials_secret(
    bootstrap: &PostgresBootstrap,
    credential: &GeneratedCredential,
) -> Secret {
    let mut data = BTreeMap::from([
        (ROLE_KEY.to_string(), bytes(&credential.role)),
        (PASSWORD_KEY.to_string(), bytes(&credential.password)),
        (DATABASE_KEY.to_string(), bytes(&credential.database)),
        (HOST_KEY.to_string(), bytes(&credential.host)),
        (PORT_KEY.to_string(), bytes(&credential.port.to_string())),
        (
            CONNECTION_STRING_KEY.to_string(),
            bytes(&credential.connection_string()),
        ),
    ]);

    for database in bootstrap.spec.all_databases().into_iter().skip(1) {
        data.insert(
            format!("{}.{}", CONNECTION_STRING_KEY, database),
            bytes(&credential.connection_string_for(database)),
        );
    }

    Secret {
        metadata: ObjectMeta {
            name: Some(bootstrap.secret_name()),
            namespace: bootstrap.namespace(),
            labels: Some(standard_labels(&bootstrap.name_any())),
            owner_references: Some(vec![owner_reference(bootstrap)]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

fn bytes(value: &str) -> ByteString {
    ByteString(value.as_bytes().to_vec())
}

fn read_key(secret: &Secret, key: &'static str) -> Result<String, SecretConflict> {
    let raw = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(|| SecretConflict::MissingKey {
            secret: secret.name_any(),
            key,
        })?;

    String::from_utf8(raw.0.clone()).map_err(|_| SecretConflict::InvalidUtf8 {
        secret: secret.name_any(),
        key,
    })
}

/// `key`, falling back to the older job's `legacy` name when it is absent
fn read_key_or_legacy(
    secret: &Secret,
    key: &'static str,
    legacy: &'static str,
) -> Result<String, SecretConflict> {
    let has = |k: &str| secret.data.as_ref().is_some_and(|data| data.contains_key(k));
    if !has(key) && has(legacy) {
        return read_key(secret, legacy);
    }
    read_key(secret, key)
}

/// Role name a credentials Secret hands out, if it names one
pub fn read_role(secret: &Secret) -> Option<String> {
    read_key_or_legacy(secret, ROLE_KEY, LEGACY_ROLE_KEY).ok()
}

/// Check that `secret` is ours to manage
///
/// A Secret without owner references is adopted; one owned by a different
/// PostgresBootstrap (or anything else) is not.
pub fn check_ownership(secret: &Secret, bootstrap: &PostgresBootstrap) -> Result<(), SecretConflict> {
    let owners = secret.owner_references();
    if owners.is_empty() {
        return Ok(());
    }

    let uid = bootstrap.metadata.uid.as_deref().unwrap_or_default();
    let ours = owners
        .iter()
        .any(|owner| is_bootstrap_owner(owner) && owner.uid == uid);

    if ours {
        Ok(())
    } else {
        Err(SecretConflict::ForeignOwner {
            secret: secret.name_any(),
        })
    }
}

/// Read distributed credentials back from an existing Secret
///
/// `host` and `port` are taken from the caller since they are refreshable.
pub fn credentials_from_secret(
    secret: &Secret,
    host: &str,
    port: u16,
) -> Result<GeneratedCredential, SecretConflict> {
    Ok(GeneratedCredential {
        role: read_key_or_legacy(secret, ROLE_KEY, LEGACY_ROLE_KEY)?,
        password: read_key(secret, PASSWORD_KEY)?,
        database: read_key_or_legacy(secret, DATABASE_KEY, LEGACY_DATABASE_KEY)?,
        host: host.to_string(),
        port,
    })
}

/// Decide how to bring `existing` in line with `desired`
pub fn plan_upsert(
    existing: Option<&Secret>,
    desired: Secret,
    bootstrap: &PostgresBootstrap,
) -> Result<SecretAction, SecretConflict> {
    let Some(existing) = existing else {
        return Ok(SecretAction::Create(desired));
    };

    check_ownership(existing, bootstrap)?;

    let empty = BTreeMap::new();
    let existing_data = existing.data.as_ref().unwrap_or(&empty);
    let desired_data = desired.data.as_ref().unwrap_or(&empty);

    let have = credentials_from_secret(existing, "", 0)?;
    let want = credentials_from_secret(&desired, "", 0)?;
    let mismatch = [
        (ROLE_KEY, have.role != want.role),
        (PASSWORD_KEY, have.password != want.password),
        (DATABASE_KEY, have.database != want.database),
    ]
    .into_iter()
    .find_map(|(key, differs)| differs.then_some(key));
    if let Some(key) = mismatch {
        return Err(SecretConflict::CredentialMismatch {
            secret: existing.name_any(),
            key,
        });
    }

    let data_current = desired_data
        .iter()
        .all(|(key, value)| existing_data.get(key) == Some(value));
    let labels_current = desired
        .labels()
        .iter()
        .all(|(key, value)| existing.labels().get(key) == Some(value));
    let owner_current = desired
        .owner_references()
        .iter()
        .all(|owner| existing.owner_references().contains(owner));

    if data_current && labels_current && owner_current {
        Ok(SecretAction::Unchanged)
    } else {
        Ok(SecretAction::Patch(desired))
    }
}
