//! Role, database and grant convergence
//!
//! Every step checks live state before acting, so running [`provision`] twice
//! with the same plan creates no role or database the second time. Grants are
//! reissued on every call, and [`PasswordMode::Reset`] rewrites the password of
//! a role that already exists.

use tracing::{debug, info};

use super::{PostgresAdmin, PostgresError, PostgresResult};
use crate::crd::{DatabasePrivilege, PostgresBootstrapSpec};

/// How to treat the password of a role that already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordMode {
    /// No credentials were distributed yet, so the role takes the new password
    Reset,
    /// Credentials are already distributed, leave the role's password alone
    PreserveExisting,
}

/// What the role should end up with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionPlan {
    pub role: String,
    pub databases: Vec<String>,
    pub privileges: Vec<DatabasePrivilege>,
}

impl ProvisionPlan {
    pub fn from_spec(spec: &PostgresBootstrapSpec) -> Self {
        Self {
            role: spec.role.clone(),
            databases: spec.all_databases().into_iter().map(String::from).collect(),
            privileges: spec.privileges.clone(),
        }
    }

    fn wants_ownership(&self) -> bool {
        self.privileges.contains(&DatabasePrivilege::Owner)
    }

    fn has_grants(&self) -> bool {
        self.privileges.iter().any(|p| p.as_sql().is_some())
    }
}

/// Side effects a [`provision`] call performed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub role_created: bool,
    pub password_reset: bool,
    pub databases_created: Vec<String>,
}

/// Converge role, databases and grants for `plan`
///
/// Steps run in order and stop at the first failure; a later call picks up
/// where this one left off.
pub async fn provision(
    admin: &mut dyn PostgresAdmin,
    plan: &ProvisionPlan,
    password: &str,
    mode: PasswordMode,
) -> PostgresResult<ProvisionReport> {
    let mut report = ProvisionReport::default();

    ensure_role(admin, &plan.role, password, mode, &mut report).await?;

    for database in &plan.databases {
        ensure_database(admin, database, plan, &mut report).await?;
    }

    if plan.has_grants() {
        for database in &plan.databases {
            admin
                .grant_database_privileges(database, &plan.role, &plan.privileges)
                .await?;
        }
    }

    Ok(report)
}

async fn ensure_role(
    admin: &mut dyn PostgresAdmin,
    role: &str,
    password: &str,
    mode: PasswordMode,
    report: &mut ProvisionReport,
) -> PostgresResult<()> {
    if !admin.role_exists(role).await? {
        admin.create_role(role, password).await?;
        info!(role, "Created role");
        report.role_created = true;
        return Ok(());
    }

    match mode {
        PasswordMode::Reset => {
            admin.set_role_password(role, password).await?;
            info!(role, "Role already existed, password reset");
            report.password_reset = true;
        }
        PasswordMode::PreserveExisting => {
            debug!(role, "Role exists");
        }
    }

    Ok(())
}

async fn ensure_database(
    admin: &mut dyn PostgresAdmin,
    database: &str,
    plan: &ProvisionPlan,
    report: &mut ProvisionReport,
) -> PostgresResult<()> {
    match admin.database_owner(database).await? {
        None => {
            let owner = plan.wants_ownership().then_some(plan.role.as_str());
            admin.create_database(database, owner).await?;
            info!(database, role = %plan.role, "Created database");
            report.databases_created.push(database.to_string());
            Ok(())
        }
        Some(owner) if plan.wants_ownership() && owner != plan.role => {
            Err(PostgresError::OwnershipConflict {
                database: database.to_string(),
                actual_owner: owner,
                desired_owner: plan.role.clone(),
            })
        }
        Some(_) => {
            debug!(database, "Database exists");
            Ok(())
        }
    }
}
