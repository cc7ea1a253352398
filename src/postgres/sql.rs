//! SQL text for provisioning statements
//!
//! DDL cannot take bind parameters, so identifiers are double-quoted and string
//! literals escaped here. Lookups elsewhere use bind parameters.

use crate::crd::DatabasePrivilege;

/// Look up a role by name
pub const ROLE_EXISTS_QUERY: &str = "SELECT 1 FROM pg_roles WHERE rolname = $1";

/// Look up a database's owner by database name
pub const DATABASE_OWNER_QUERY: &str =
    "SELECT pg_get_userbyid(datdba) AS owner FROM pg_database WHERE datname = $1";

/// `CREATE ROLE ... WITH LOGIN PASSWORD ...`
pub fn create_role(role: &str, password: &str) -> String {
    format!(
        "CREATE ROLE {} WITH LOGIN PASSWORD '{}'",
        quote_identifier(role),
        escape_sql_string(password)
    )
}

/// `ALTER ROLE ... WITH LOGIN PASSWORD ...`
pub fn set_role_password(role: &str, password: &str) -> String {
    format!(
        "ALTER ROLE {} WITH LOGIN PASSWORD '{}'",
        quote_identifier(role),
        escape_sql_string(password)
    )
}

/// `CREATE DATABASE ...`, owned by `owner` when given
pub fn create_database(database: &str, owner: Option<&str>) -> String {
    match owner {
        Some(owner) => format!(
            "CREATE DATABASE {} OWNER {}",
            quote_identifier(database),
            quote_identifier(owner)
        ),
        None => format!("CREATE DATABASE {}", quote_identifier(database)),
    }
}

/// `GRANT ... ON DATABASE ... TO ...`, or `None` when nothing is grantable
pub fn grant_database_privileges(
    database: &str,
    role: &str,
    privileges: &[DatabasePrivilege],
) -> Option<String> {
    let mut keywords: Vec<&str> = Vec::new();
    for keyword in privileges.iter().filter_map(DatabasePrivilege::as_sql) {
        if !keywords.contains(&keyword) {
            keywords.push(keyword);
        }
    }

    if keywords.is_empty() {
        return None;
    }

    Some(format!(
        "GRANT {} ON DATABASE {} TO {}",
        keywords.join(", "),
        quote_identifier(database),
        quote_identifier(role)
    ))
}

/// Wrap `name` in double quotes, doubling any embedded quote
pub fn quote_identifier(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for c in name.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Body of a single-quoted literal, with `'` doubled
pub fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

/// NAMEDATALEN - 1
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// `[a-z_][a-z0-9_]*`, at most [`MAX_IDENTIFIER_LEN`] bytes
pub fn is_valid_identifier(name: &str) -> bool {
    let bytes = name.as_bytes();
    let Some((first, rest)) = bytes.split_first() else {
        return false;
    };
    bytes.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_lowercase() || *first == b'_')
        && rest
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'_')
}
