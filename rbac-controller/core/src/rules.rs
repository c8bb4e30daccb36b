//! Normalization of permission rules into a canonical form.
//!
//! Raw rules may carry several resource types, several resource names, and a
//! wildcard verb. Normalization validates every type against the catalog,
//! splits each rule into single-type/single-name rules, overwrites the group
//! from the catalog, expands wildcards, merges duplicates, and sorts the
//! result by (group, resource type, resource name) so diffs are stable.

use crate::{
    catalog::{ResourceCatalog, ResourceType},
    Error,
};
use kargo_rbac_k8s_api::PolicyRule;
use std::collections::{BTreeMap, BTreeSet};

pub const VERB_WILDCARD: &str = "*";

#[derive(Clone, Copy, Debug, Default)]
pub struct NormalizeOptions {
    /// Whether a wildcard verb expands to the type's custom verbs in addition
    /// to the reserved set. Bulk role replacement uses the inclusive mode;
    /// narrow grant/revoke operations do not.
    pub include_custom_verbs: bool,
}

impl NormalizeOptions {
    pub fn inclusive() -> Self {
        Self {
            include_custom_verbs: true,
        }
    }
}

pub fn normalize(
    catalog: &ResourceCatalog,
    rules: Vec<PolicyRule>,
    options: NormalizeOptions,
) -> Result<Vec<PolicyRule>, Error> {
    let mut merged: BTreeMap<(String, String, Option<String>), BTreeSet<String>> = BTreeMap::new();

    for rule in rules {
        let PolicyRule {
            resources,
            resource_names,
            verbs,
            ..
        } = rule;

        for resource in resources.into_iter().flatten() {
            let spec = lookup(catalog, &resource)?;
            let verbs = expand(spec, &verbs, options.include_custom_verbs);
            if verbs.is_empty() {
                continue;
            }

            let names: Vec<Option<String>> = match resource_names.as_deref() {
                Some(names) if !names.is_empty() => {
                    names.iter().cloned().map(Some).collect()
                }
                _ => vec![None],
            };
            for name in names {
                merged
                    .entry((spec.group.clone(), resource.clone(), name))
                    .or_default()
                    .extend(verbs.iter().cloned());
            }
        }
    }

    Ok(merged
        .into_iter()
        .map(|((group, resource, name), verbs)| PolicyRule {
            api_groups: Some(vec![group]),
            resources: Some(vec![resource]),
            resource_names: name.map(|n| vec![n]),
            verbs: verbs.into_iter().collect(),
            non_resource_urls: None,
        })
        .collect())
}

/// Expands a wildcard in a requested verb list for a single resource type,
/// validating the type against the catalog. Unknown non-wildcard verbs pass
/// through unexamined.
pub fn expand_verbs(
    catalog: &ResourceCatalog,
    resource_type: &str,
    verbs: &[String],
    include_custom: bool,
) -> Result<BTreeSet<String>, Error> {
    let spec = lookup(catalog, resource_type)?;
    Ok(expand(spec, verbs, include_custom))
}

fn lookup<'c>(catalog: &'c ResourceCatalog, resource_type: &str) -> Result<&'c ResourceType, Error> {
    catalog.get(resource_type).ok_or_else(|| {
        Error::BadRequest(match catalog.suggest(resource_type) {
            Some(suggestion) => format!(
                "unrecognized resource type {resource_type:?}; did you mean {suggestion:?}?"
            ),
            None => format!("unrecognized resource type {resource_type:?}"),
        })
    })
}

fn expand(spec: &ResourceType, verbs: &[String], include_custom: bool) -> BTreeSet<String> {
    let mut expanded: BTreeSet<String> = verbs
        .iter()
        .filter(|v| *v != VERB_WILDCARD)
        .cloned()
        .collect();
    if verbs.iter().any(|v| v == VERB_WILDCARD) {
        expanded.extend(
            crate::catalog::RESERVED_VERBS
                .iter()
                .map(|v| v.to_string()),
        );
        if include_custom {
            expanded.extend(spec.custom_verbs.iter().cloned());
        }
    }
    expanded
}
