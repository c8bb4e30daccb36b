#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Generic resource-store abstraction over the Kubernetes API.
//!
//! The RBAC databases hold no state of their own; every read and write goes
//! through [`ObjectStore`], with [`ClusterStore`] as the kube-client-backed
//! implementation. Keeping the seam generic lets the databases run against an
//! in-memory store in tests. API errors are translated into the core taxonomy
//! here, so callers never see `kube::Error`.

use kargo_rbac_core::Error;
use kargo_rbac_k8s_api::{Secret, ServiceAccount};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    core::NamespaceResourceScope,
    ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::trace;

/// CRUD access to one namespaced object kind.
#[async_trait::async_trait]
pub trait ObjectStore<K>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>;

    async fn list(&self, namespace: &str, label_selector: Option<&str>)
        -> Result<Vec<K>, Error>;

    async fn create(&self, obj: &K) -> Result<K, Error>;

    /// Replaces the stored object. Fails with [`Error::Conflict`] when the
    /// object's revision is stale.
    async fn update(&self, obj: &K) -> Result<K, Error>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// The object kinds the RBAC engine persists.
pub trait ResourceStore:
    ObjectStore<ServiceAccount>
    + ObjectStore<kargo_rbac_k8s_api::Role>
    + ObjectStore<kargo_rbac_k8s_api::RoleBinding>
    + ObjectStore<Secret>
    + Clone
{
}

impl<T> ResourceStore for T where
    T: ObjectStore<ServiceAccount>
        + ObjectStore<kargo_rbac_k8s_api::Role>
        + ObjectStore<kargo_rbac_k8s_api::RoleBinding>
        + ObjectStore<Secret>
        + Clone
{
}

/// Kubernetes-API-server-backed store.
#[derive(Clone)]
pub struct ClusterStore {
    client: kube::Client,
}

impl ClusterStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl<K> ObjectStore<K> for ClusterStore
where
    K: kube::Resource<Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync,
    K::DynamicType: Default,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, Error> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| store_error::<K>(namespace, name, e))
    }

    async fn list(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, Error> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self
            .api::<K>(namespace)
            .list(&params)
            .await
            .map_err(|e| store_error::<K>(namespace, "", e))?;
        trace!(%namespace, items = list.items.len(), kind = %kind_of::<K>(), "listed");
        Ok(list.items)
    }

    async fn create(&self, obj: &K) -> Result<K, Error> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        self.api::<K>(&namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| store_error::<K>(&namespace, &name, e))
    }

    async fn update(&self, obj: &K) -> Result<K, Error> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        self.api::<K>(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| store_error::<K>(&namespace, &name, e))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| store_error::<K>(namespace, name, e))
    }
}

fn kind_of<K>() -> String
where
    K: kube::Resource,
    K::DynamicType: Default,
{
    K::kind(&K::DynamicType::default()).into_owned()
}

/// Maps a kube API error onto the core taxonomy, preserving the implicated
/// object's coordinates.
fn store_error<K>(namespace: &str, name: &str, error: kube::Error) -> Error
where
    K: kube::Resource,
    K::DynamicType: Default,
{
    match error {
        kube::Error::Api(response) => match response.code {
            404 => Error::not_found(kind_of::<K>(), namespace, name),
            409 if response.reason == "AlreadyExists" => {
                Error::already_exists(kind_of::<K>(), namespace, name)
            }
            409 => Error::Conflict(response.message),
            400 | 422 => Error::BadRequest(response.message),
            code => Error::Store {
                code,
                message: response.message,
            },
        },
        error => Error::Internal(anyhow::Error::new(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} ({code})"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn maps_api_codes_onto_taxonomy() {
        let err = store_error::<ServiceAccount>("payments", "deployer", api_error(404, "NotFound"));
        assert!(matches!(err, Error::NotFound { .. }), "{err:?}");

        let err =
            store_error::<Secret>("payments", "tok", api_error(409, "AlreadyExists"));
        assert!(matches!(err, Error::AlreadyExists { .. }), "{err:?}");

        let err = store_error::<Secret>("payments", "tok", api_error(409, "Conflict"));
        assert!(matches!(err, Error::Conflict(_)), "{err:?}");

        let err = store_error::<Secret>("payments", "tok", api_error(422, "Invalid"));
        assert!(matches!(err, Error::BadRequest(_)), "{err:?}");

        let err = store_error::<Secret>("payments", "tok", api_error(503, "ServiceUnavailable"));
        assert!(err.is_transient(), "{err:?}");

        let err = store_error::<Secret>("payments", "tok", api_error(403, "Forbidden"));
        assert!(!err.is_transient(), "{err:?}");
    }
}
