#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Kargo RBAC databases.
//!
//! A Kargo Role is persisted as three independently stored objects sharing a
//! name: a ServiceAccount, an `rbac/v1` Role, and a RoleBinding. There is no
//! cross-object transaction; creation and deletion are ordered sequences of
//! store calls, and every entry point re-checks existence and manageability
//! so that repeated calls after a partial failure converge rather than
//! corrupt state.
//!
//! ```text
//! [ ServiceAccount ] <- subjects - [ RoleBinding ] - roleRef -> [ Role ]
//! ```
//!
//! [`roles::RolesDatabase`] orchestrates the triplet; bare identities with no
//! rule/binding concept live in [`service_accounts::ServiceAccountsDatabase`].
//! Both issue API tokens as service-account token Secrets whose material the
//! cluster populates asynchronously.

pub mod roles;
pub mod service_accounts;
mod tokens;


pub use self::{roles::RolesDatabase, service_accounts::ServiceAccountsDatabase};

use kargo_rbac_core::RoleScope;

/// Configuration shared by the databases.
#[derive(Clone, Debug)]
pub struct Settings {
    /// The namespace holding global-scope roles and identities.
    pub system_namespace: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_namespace: "kargo".to_string(),
        }
    }
}

impl Settings {
    fn namespace<'s>(&'s self, scope: &'s RoleScope) -> &'s str {
        match scope {
            RoleScope::Global => &self.system_namespace,
            RoleScope::Project(project) => project,
        }
    }
}
