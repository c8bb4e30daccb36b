#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Kubernetes types and metadata vocabulary used by the Kargo RBAC engine.
//!
//! A Kargo Role is persisted as a triplet of native objects sharing a name: a
//! `ServiceAccount` (the identity, carrying claim and description
//! annotations), an `rbac/v1 Role` (the permission rules), and a `RoleBinding`
//! (tying the two together). This crate re-exports those types and owns the
//! label/annotation keys and the claim-annotation codec; it performs no I/O.

pub mod claims;
pub mod metadata;

pub use k8s_openapi::api::{
    core::v1::{Secret, ServiceAccount},
    rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject},
};
pub use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time},
    ByteString,
};
pub use kube::ResourceExt;
