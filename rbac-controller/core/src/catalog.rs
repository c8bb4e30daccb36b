//! The resource-type catalog.
//!
//! Maps each grantable resource type to its API group and any custom verbs it
//! exposes beyond the reserved CRUD set. The catalog is an immutable, injected
//! table so tests can substitute their own; [`ResourceCatalog::kargo`] builds
//! the standard table for a Kargo cluster.

use std::collections::{BTreeMap, BTreeSet};

pub const KARGO_API_GROUP: &str = "kargo.akuity.io";
pub const ARGO_ROLLOUTS_API_GROUP: &str = "argoproj.io";
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Verbs every resource type supports. A wildcard verb always expands to at
/// least this set.
pub const RESERVED_VERBS: &[&str] = &[
    "create", "delete", "get", "list", "patch", "update", "watch",
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceType {
    /// The API group owning the type. Groups on input rules are advisory and
    /// are always overwritten with this value.
    pub group: String,
    /// Non-CRUD verbs the type exposes, e.g. `promote` on `stages`.
    pub custom_verbs: BTreeSet<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ResourceCatalog {
    types: BTreeMap<String, ResourceType>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, name: &str, group: &str, custom_verbs: &[&str]) -> Self {
        self.types.insert(
            name.to_string(),
            ResourceType {
                group: group.to_string(),
                custom_verbs: custom_verbs.iter().map(|v| v.to_string()).collect(),
            },
        );
        self
    }

    /// The standard catalog of types Kargo grants permissions on.
    pub fn kargo() -> Self {
        Self::new()
            .with_type("analysisruns", ARGO_ROLLOUTS_API_GROUP, &[])
            .with_type("analysistemplates", ARGO_ROLLOUTS_API_GROUP, &[])
            .with_type("events", "", &[])
            .with_type("freights", KARGO_API_GROUP, &["approve"])
            .with_type("projects", KARGO_API_GROUP, &[])
            .with_type("promotions", KARGO_API_GROUP, &["abort"])
            .with_type("rolebindings", RBAC_API_GROUP, &[])
            .with_type("roles", RBAC_API_GROUP, &[])
            .with_type("secrets", "", &[])
            .with_type("serviceaccounts", "", &[])
            .with_type("stages", KARGO_API_GROUP, &["promote"])
            .with_type("warehouses", KARGO_API_GROUP, &["refresh"])
    }

    pub fn get(&self, resource_type: &str) -> Option<&ResourceType> {
        self.types.get(resource_type)
    }

    /// The full verb set a wildcard expands to for the given type. `None` if
    /// the type is unknown.
    pub fn verbs_for(&self, resource_type: &str, include_custom: bool) -> Option<BTreeSet<String>> {
        let spec = self.get(resource_type)?;
        let mut verbs: BTreeSet<String> = RESERVED_VERBS.iter().map(|v| v.to_string()).collect();
        if include_custom {
            verbs.extend(spec.custom_verbs.iter().cloned());
        }
        Some(verbs)
    }

    /// Finds a near-miss for an unrecognized type: first a plural of the
    /// input, then the closest known type within a small edit distance.
    pub fn suggest(&self, unknown: &str) -> Option<&str> {
        for known in self.types.keys() {
            if is_plural_of(known, unknown) {
                return Some(known);
            }
        }

        self.types
            .keys()
            .map(|known| (edit_distance(known, unknown), known))
            .filter(|(distance, _)| *distance <= 2)
            .min()
            .map(|(_, known)| known.as_str())
    }
}

fn is_plural_of(known: &str, input: &str) -> bool {
    if known == format!("{input}s") || known == format!("{input}es") {
        return true;
    }
    match input.strip_suffix('y') {
        Some(stem) => known == format!("{stem}ies"),
        None => false,
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let sub = prev[j] + usize::from(ca != cb);
            curr[j + 1] = sub.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_plural_for_singular_input() {
        let catalog = ResourceCatalog::kargo();
        assert_eq!(catalog.suggest("stage"), Some("stages"));
        assert_eq!(catalog.suggest("freight"), Some("freights"));
        assert_eq!(catalog.suggest("warehouse"), Some("warehouses"));
    }

    #[test]
    fn suggests_close_typos() {
        let catalog = ResourceCatalog::kargo();
        assert_eq!(catalog.suggest("stagges"), Some("stages"));
        assert_eq!(catalog.suggest("promotoins"), Some("promotions"));
    }

    #[test]
    fn no_suggestion_for_garbage() {
        let catalog = ResourceCatalog::kargo();
        assert_eq!(catalog.suggest("zebras"), None);
    }

    #[test]
    fn wildcard_verb_sets() {
        let catalog = ResourceCatalog::kargo();
        let reserved = catalog.verbs_for("stages", false).unwrap();
        assert!(!reserved.contains("promote"));
        assert_eq!(reserved.len(), RESERVED_VERBS.len());

        let inclusive = catalog.verbs_for("stages", true).unwrap();
        assert!(inclusive.contains("promote"));
    }
}
