//! OIDC claim annotations on a role's ServiceAccount.
//!
//! Claims have been stored in two encodings: a legacy scheme with one
//! annotation per claim name (`rbac.kargo.akuity.io/claim.<name>`, values
//! comma-separated) and the current scheme holding every claim in a single
//! JSON annotation. Reads merge both; writes emit only the JSON form and strip
//! any legacy keys, so objects written by older code converge to the new
//! encoding the first time they are mutated.

use crate::{metadata, ObjectMeta};
use std::collections::{BTreeMap, BTreeSet};

/// Holds all claims as a JSON object mapping claim name to a value array.
pub const CLAIMS_ANNOTATION_KEY: &str = "rbac.kargo.akuity.io/claims";

/// Prefix of the legacy one-annotation-per-claim encoding.
pub const LEGACY_CLAIM_ANNOTATION_KEY_PREFIX: &str = "rbac.kargo.akuity.io/claim.";

/// Claim name to sorted, deduplicated values.
pub type ClaimsMap = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, thiserror::Error)]
pub enum InvalidClaims {
    #[error("failed to parse claims annotation: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reads claims from both encodings, merging and deduplicating values per
/// claim name. A malformed JSON annotation is a hard error, never silently
/// dropped.
pub fn claims_from_annotations(
    annotations: Option<&BTreeMap<String, String>>,
) -> Result<ClaimsMap, InvalidClaims> {
    let mut claims = ClaimsMap::new();
    let Some(annotations) = annotations else {
        return Ok(claims);
    };

    for (key, value) in annotations {
        if let Some(name) = key.strip_prefix(LEGACY_CLAIM_ANNOTATION_KEY_PREFIX) {
            let values = claims.entry(name.to_string()).or_default();
            values.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string),
            );
        }
    }

    if let Some(blob) = annotations.get(CLAIMS_ANNOTATION_KEY) {
        let parsed: BTreeMap<String, Vec<String>> = serde_json::from_str(blob)?;
        for (name, values) in parsed {
            claims
                .entry(name)
                .or_default()
                .extend(values.into_iter().filter(|v| !v.is_empty()));
        }
    }

    claims.retain(|_, values| !values.is_empty());
    Ok(claims)
}

/// Writes claims in the current JSON encoding only, removing every legacy
/// claim key. An empty claim set removes the annotation entirely.
pub fn set_claims_annotations(meta: &mut ObjectMeta, claims: &ClaimsMap) {
    let annotations = metadata::annotations_mut(meta);
    annotations.retain(|key, _| !key.starts_with(LEGACY_CLAIM_ANNOTATION_KEY_PREFIX));
    if claims.is_empty() {
        annotations.remove(CLAIMS_ANNOTATION_KEY);
        return;
    }
    let encoded: BTreeMap<&str, Vec<&str>> = claims
        .iter()
        .map(|(name, values)| (name.as_str(), values.iter().map(String::as_str).collect()))
        .collect();
    annotations.insert(
        CLAIMS_ANNOTATION_KEY.to_string(),
        serde_json::to_string(&encoded).expect("claims map must serialize"),
    );
}

/// Adds every value of `from` into `into`.
pub fn merge_claims(into: &mut ClaimsMap, from: &ClaimsMap) {
    for (name, values) in from {
        into.entry(name.clone())
            .or_default()
            .extend(values.iter().cloned());
    }
}

/// Removes the given values; a claim whose value list becomes empty is
/// removed entirely.
pub fn remove_claims(from: &mut ClaimsMap, drop: &ClaimsMap) {
    for (name, values) in drop {
        if let Some(existing) = from.get_mut(name) {
            for value in values {
                existing.remove(value);
            }
        }
    }
    from.retain(|_, values| !values.is_empty());
}
