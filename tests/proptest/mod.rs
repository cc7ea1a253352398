// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for validation, SQL quoting and credential handling
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. Valid names always pass validation and invalid ones are always rejected
//! 2. Quoting and escaping never let input break out of its literal
//! 3. Sanitized messages never contain the secrets they were given
//! 4. Building and re-planning a credentials Secret converges

#[path = "../common/mod.rs"]
mod common;

use proptest::prelude::*;

use common::*;
use kube_postgres_bootstrap::controller::status::REDACTED;
use kube_postgres_bootstrap::controller::{ErrorKind, resolve_endpoint, sanitize_message, validate_spec};
use kube_postgres_bootstrap::crd::DatabasePrivilege;
use kube_postgres_bootstrap::postgres::sql::{
    escape_sql_string, is_valid_identifier, quote_identifier,
};
use kube_postgres_bootstrap::resources::credentials::PASSWORD_LENGTH;
use kube_postgres_bootstrap::resources::{
    GeneratedCredential, SecretAction, build_credentials_secret, generate_password, plan_upsert,
};

// =============================================================================
// Strategy generators
// =============================================================================

/// Generate a valid PostgreSQL identifier (shrinks toward short names)
fn valid_identifier() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,62}"
}

/// Generate a valid role name, avoiding the reserved prefix
fn valid_role() -> impl Strategy<Value = String> {
    valid_identifier().prop_filter("reserved prefix", |r| !r.starts_with("pg_"))
}

/// Generate an identifier that breaks at least one rule
fn invalid_identifier() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[A-Z][a-z0-9_]{0,20}",
        "[0-9][a-z0-9_]{0,20}",
        "[a-z]{1,10}[-. ;'\"][a-z]{0,10}",
        "[a-z_]{64,80}",
    ]
}

fn privileges() -> impl Strategy<Value = Vec<DatabasePrivilege>> {
    prop::collection::vec(
        prop_oneof![
            Just(DatabasePrivilege::Owner),
            Just(DatabasePrivilege::All),
            Just(DatabasePrivilege::Connect),
            Just(DatabasePrivilege::Create),
            Just(DatabasePrivilege::Temporary),
        ],
        1..5,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn prop_valid_names_pass_validation(
        role in valid_role(),
        database in valid_identifier(),
        privileges in privileges(),
    ) {
        let bootstrap = PostgresBootstrapBuilder::new("orders", TEST_NAMESPACE)
            .with_role(&role)
            .with_database(&database)
            .with_privileges(privileges)
            .build();
        prop_assert!(validate_spec(&bootstrap).is_ok());
    }

    #[test]
    fn prop_invalid_roles_rejected(role in invalid_identifier()) {
        prop_assert!(!is_valid_identifier(&role));
        let bootstrap = PostgresBootstrapBuilder::new("orders", TEST_NAMESPACE)
            .with_role(&role)
            .build();
        let err = validate_spec(&bootstrap).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn prop_invalid_databases_rejected(database in invalid_identifier()) {
        let bootstrap = PostgresBootstrapBuilder::new("orders", TEST_NAMESPACE)
            .with_additional_databases(&[database.as_str()])
            .build();
        prop_assert!(validate_spec(&bootstrap).is_err());
    }

    #[test]
    fn prop_validation_deterministic(role in ".{0,80}") {
        let bootstrap = PostgresBootstrapBuilder::new("orders", TEST_NAMESPACE)
            .with_role(&role)
            .build();
        let first = validate_spec(&bootstrap).map_err(|e| e.to_string());
        let second = validate_spec(&bootstrap).map_err(|e| e.to_string());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_port_range(port in any::<i32>()) {
        let bootstrap = PostgresBootstrapBuilder::new("orders", TEST_NAMESPACE)
            .with_port(port)
            .build();
        let result = resolve_endpoint(&bootstrap.spec, &test_config());
        prop_assert_eq!(result.is_ok(), (1..=65535).contains(&port));
    }

    // =========================================================================
    // Quoting
    // =========================================================================

    #[test]
    fn prop_quote_identifier_round_trips(name in ".{0,40}") {
        let quoted = quote_identifier(&name);
        prop_assert!(quoted.starts_with('"') && quoted.ends_with('"'));

        let inner = &quoted[1..quoted.len() - 1];
        prop_assert_eq!(inner.replace("\"\"", "\""), name);
        // Every quote inside is doubled
        prop_assert_eq!(inner.matches('"').count() % 2, 0);
    }

    #[test]
    fn prop_escape_sql_string_round_trips(value in ".{0,40}") {
        let escaped = escape_sql_string(&value);
        prop_assert_eq!(escaped.matches('\'').count(), value.matches('\'').count() * 2);
        prop_assert_eq!(escaped.replace("''", "'"), value);
    }

    #[test]
    fn prop_valid_identifiers_need_no_escaping(name in valid_identifier()) {
        prop_assert!(is_valid_identifier(&name));
        prop_assert_eq!(quote_identifier(&name), format!("\"{}\"", name));
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    #[test]
    fn prop_sanitize_removes_secret(
        prefix in ".{0,20}",
        suffix in ".{0,20}",
        secret in "[a-zA-Z0-9]{8,32}",
    ) {
        prop_assume!(!REDACTED.contains(secret.as_str()));
        let message = format!("{prefix}{secret}{suffix}{secret}");
        let sanitized = sanitize_message(&message, &[secret.as_str()]);
        prop_assert!(!sanitized.contains(secret.as_str()));
        prop_assert!(sanitized.contains(REDACTED));
    }

    #[test]
    fn prop_secret_plan_converges(
        role in valid_role(),
        database in valid_identifier(),
        port in 1..=65535u16,
    ) {
        let bootstrap = PostgresBootstrapBuilder::new("orders", TEST_NAMESPACE)
            .with_role(&role)
            .with_database(&database)
            .build();
        let credential = GeneratedCredential::generate(&role, &database, TEST_HOST, port);
        let desired = build_credentials_secret(&bootstrap, &credential);

        let planned = plan_upsert(Some(&desired), desired.clone(), &bootstrap).unwrap();
        prop_assert_eq!(planned, SecretAction::Unchanged);
    }
}

#[test]
fn test_generated_passwords() {
    let passwords: Vec<String> = (0..64).map(|_| generate_password()).collect();
    for password in &passwords {
        assert_eq!(password.len(), PASSWORD_LENGTH);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }
    let mut unique = passwords.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), passwords.len());
}
