#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Core types for the Kargo RBAC engine.
//!
//! A Kargo Role bundles permission rules, OIDC claim bindings, and bound
//! identities. It is derived from a triplet of Kubernetes objects and never
//! stored directly; this crate holds the derived representation, the error
//! taxonomy shared by every layer, the resource-type catalog, and the pure
//! rule-normalization algorithm. Nothing here performs I/O.

pub mod catalog;
mod error;
mod role;
pub mod rules;
mod token;

pub use self::{
    catalog::ResourceCatalog,
    error::Error,
    role::{Claim, ResourceDetails, Role, RoleScope, ServiceAccountInfo, ServiceAccountRef},
    token::{ApiToken, REDACTED_TOKEN},
};
