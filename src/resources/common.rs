//! Common utilities for Kubernetes resources owned by the controller

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::PostgresBootstrap;

/// Field manager name for patches
pub const FIELD_MANAGER: &str = "kube-postgres-bootstrap";

/// Label marking resources written by this controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label naming the PostgresBootstrap a resource belongs to
pub const BOOTSTRAP_LABEL: &str = "pgbootstrap.io/bootstrap";

/// Label selector matching every resource written by this controller
pub fn managed_selector() -> String {
    format!("{}={}", MANAGED_BY_LABEL, FIELD_MANAGER)
}

/// Generate an owner reference for a PostgresBootstrap
///
/// Secrets carrying it are garbage collected with the object.
pub fn owner_reference(bootstrap: &PostgresBootstrap) -> OwnerReference {
    OwnerReference {
        api_version: PostgresBootstrap::api_version(&()).to_string(),
        kind: PostgresBootstrap::kind(&()).to_string(),
        name: bootstrap.name_any(),
        uid: bootstrap.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Whether `owner` points at a PostgresBootstrap
pub fn is_bootstrap_owner(owner: &OwnerReference) -> bool {
    owner.kind == PostgresBootstrap::kind(&()) && owner.api_version == PostgresBootstrap::api_version(&())
}

/// Standard labels for resources belonging to a PostgresBootstrap
pub fn standard_labels(bootstrap_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), FIELD_MANAGER.to_string()),
        (BOOTSTRAP_LABEL.to_string(), bootstrap_name.to_string()),
    ])
}
