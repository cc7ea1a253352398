//! Generated role credentials

use std::fmt;
use std::net::Ipv6Addr;

use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of generated passwords
pub const PASSWORD_LENGTH: usize = 32;

/// Generate a random password
///
/// Alphanumeric only, so the value is safe in URLs, shells and SQL literals.
pub fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Credentials handed to workloads through the credentials Secret
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedCredential {
    pub role: String,
    pub password: String,
    pub database: String,
    pub host: String,
    pub port: u16,
}

impl GeneratedCredential {
    /// Fresh credentials for `role` with a newly generated password
    pub fn generate(
        role: impl Into<String>,
        database: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            role: role.into(),
            password: generate_password(),
            database: database.into(),
            host: host.into(),
            port,
        }
    }

    /// Connection URL for the primary database
    pub fn connection_string(&self) -> String {
        self.connection_string_for(&self.database)
    }

    /// Connection URL for any database the role has access to
    ///
    /// IPv6 literals are bracketed so the port stays unambiguous.
    pub fn connection_string_for(&self, database: &str) -> String {
        let host = if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.role, self.password, host, self.port, database
        )
    }
}

impl fmt::Debug for GeneratedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedCredential")
            .field("role", &self.role)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}
