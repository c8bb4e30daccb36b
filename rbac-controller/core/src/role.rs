use kargo_rbac_k8s_api::{PolicyRule, Time};

/// Where a role or identity lives: a project namespace, or the designated
/// system namespace for global-scope objects.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RoleScope {
    Global,
    Project(String),
}

impl RoleScope {
    pub fn project(name: impl Into<String>) -> Self {
        Self::Project(name.into())
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }
}

/// The permission/claim/identity-binding bundle exposed to callers. Derived
/// from a ServiceAccount/Role/RoleBinding triplet, never stored directly.
#[derive(Clone, Debug, PartialEq)]
pub struct Role {
    pub scope: RoleScope,
    pub name: String,
    /// Whether every underlying object carries the managed annotation. Only
    /// managed roles accept mutation.
    pub kargo_managed: bool,
    pub claims: Vec<Claim>,
    pub rules: Vec<PolicyRule>,
    /// Identities bound to this role beyond its own.
    pub service_accounts: Vec<ServiceAccountRef>,
    pub description: Option<String>,
    pub creation_timestamp: Option<Time>,
}

impl Role {
    pub fn new(scope: RoleScope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
            kargo_managed: false,
            claims: Vec::new(),
            rules: Vec::new(),
            service_accounts: Vec::new(),
            description: None,
            creation_timestamp: None,
        }
    }
}

/// An external-identity attribute (e.g. an OIDC group claim) bound to a role.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Claim {
    pub name: String,
    /// Sorted, deduplicated.
    pub values: Vec<String>,
}

impl Claim {
    pub fn new(
        name: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut values: Vec<String> = values.into_iter().map(Into::into).collect();
        values.sort();
        values.dedup();
        Self {
            name: name.into(),
            values,
        }
    }
}

/// An identity bound to a role's binding object, distinct from the role's own
/// identity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServiceAccountRef {
    pub namespace: String,
    pub name: String,
}

impl ServiceAccountRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// A bare managed identity, as returned by the ServiceAccounts database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceAccountInfo {
    pub scope: RoleScope,
    pub name: String,
    pub description: Option<String>,
    pub creation_timestamp: Option<Time>,
}

/// A single permission change requested against a role: one resource type,
/// optionally narrowed to one resource name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceDetails {
    pub resource_type: String,
    pub resource_name: Option<String>,
    /// May contain the wildcard verb, expanded against the catalog.
    pub verbs: Vec<String>,
}
