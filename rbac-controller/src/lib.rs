#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Runtime wiring for the Kargo RBAC controller.
//!
//! Everything interesting lives in the member crates; this crate parses the
//! CLI, builds a kube client through kubert, and hands out the two databases
//! bound to a [`store::ClusterStore`].

mod cli;

pub use self::cli::Args;
pub use kargo_rbac_core::{
    ApiToken, Claim, Error, ResourceCatalog, ResourceDetails, Role, RoleScope,
    ServiceAccountInfo, ServiceAccountRef,
};
pub use kargo_rbac_k8s_api as k8s;
pub use kargo_rbac_k8s_db as db;
pub use kargo_rbac_k8s_store as store;

use std::sync::Arc;

/// The RBAC databases, sharing one cluster-backed store.
#[derive(Clone)]
pub struct Databases {
    pub roles: db::RolesDatabase<store::ClusterStore>,
    pub service_accounts: db::ServiceAccountsDatabase<store::ClusterStore>,
}

// === impl Databases ===

impl Databases {
    pub fn new(client: kube::Client, settings: db::Settings) -> Self {
        let cluster = store::ClusterStore::new(client);
        let catalog = Arc::new(ResourceCatalog::kargo());
        Self {
            roles: db::RolesDatabase::new(cluster.clone(), catalog, settings.clone()),
            service_accounts: db::ServiceAccountsDatabase::new(cluster, settings),
        }
    }
}
