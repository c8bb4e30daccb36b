use crate::ObjectMeta;
use std::collections::BTreeMap;

/// Marks a triplet object as owned by the RBAC engine. Objects lacking this
/// annotation are visible on read paths but refuse all mutation.
pub const MANAGED_ANNOTATION_KEY: &str = "rbac.kargo.akuity.io/managed";

/// The same key, applied as a label to bare managed ServiceAccounts so that
/// they can be listed with a selector.
pub const MANAGED_LABEL_KEY: &str = "rbac.kargo.akuity.io/managed";

/// Marks a ServiceAccount as the identity of a Kargo Role.
pub const ROLE_LABEL_KEY: &str = "rbac.kargo.akuity.io/role";

/// Marks the identity of a global-scope role living in the system namespace.
pub const SYSTEM_ROLE_LABEL_KEY: &str = "rbac.kargo.akuity.io/system-role";

/// Marks a Secret as an API token. The value distinguishes role tokens from
/// bare service-account tokens.
pub const API_TOKEN_LABEL_KEY: &str = "rbac.kargo.akuity.io/api-token";
pub const ROLE_TOKEN_LABEL_VALUE: &str = "role";
pub const SERVICE_ACCOUNT_TOKEN_LABEL_VALUE: &str = "service-account";

/// Names the ServiceAccount that owns an API token Secret.
pub const SERVICE_ACCOUNT_ANNOTATION_KEY: &str = "rbac.kargo.akuity.io/service-account";

/// Free-text description of a role or identity.
pub const DESCRIPTION_ANNOTATION_KEY: &str = "kargo.akuity.io/description";

pub const TRUE_VALUE: &str = "true";

pub fn is_kargo_managed(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(MANAGED_ANNOTATION_KEY))
        .map(|v| v == TRUE_VALUE)
        .unwrap_or(false)
}

pub fn set_kargo_managed(meta: &mut ObjectMeta) {
    annotations_mut(meta).insert(MANAGED_ANNOTATION_KEY.to_string(), TRUE_VALUE.to_string());
}

pub fn has_label(meta: &ObjectMeta, key: &str) -> bool {
    meta.labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(|v| v == TRUE_VALUE)
        .unwrap_or(false)
}

pub fn set_label(meta: &mut ObjectMeta, key: &str, value: &str) {
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
}

pub fn label_value<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(String::as_str)
}

pub fn annotation_value<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

pub fn description(meta: &ObjectMeta) -> Option<String> {
    annotation_value(meta, DESCRIPTION_ANNOTATION_KEY).map(str::to_string)
}

/// Sets or clears the description annotation.
pub fn set_description(meta: &mut ObjectMeta, description: Option<&str>) {
    match description {
        Some(d) if !d.is_empty() => {
            annotations_mut(meta).insert(DESCRIPTION_ANNOTATION_KEY.to_string(), d.to_string());
        }
        _ => {
            if let Some(annotations) = meta.annotations.as_mut() {
                annotations.remove(DESCRIPTION_ANNOTATION_KEY);
            }
        }
    }
}

pub(crate) fn annotations_mut(meta: &mut ObjectMeta) -> &mut BTreeMap<String, String> {
    meta.annotations.get_or_insert_with(BTreeMap::new)
}
