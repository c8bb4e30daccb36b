use crate::{tokens, Settings};
use kargo_rbac_core::{ApiToken, Error, RoleScope, ServiceAccountInfo};
use kargo_rbac_k8s_api::{self as k8s, metadata, ResourceExt};
use kargo_rbac_k8s_store::{ObjectStore, ResourceStore};
use tracing::debug;

/// CRUD and token issuance for bare managed identities.
///
/// Unlike a role, a bare identity has no rule or binding objects; rules and
/// bindings materialize only through the roles database. Identities are
/// marked with the managed label so they can be selected; ServiceAccounts
/// without the label are invisible to reads and rejected by delete.
#[derive(Clone)]
pub struct ServiceAccountsDatabase<S> {
    store: S,
    settings: Settings,
}

impl<S: ResourceStore> ServiceAccountsDatabase<S> {
    pub fn new(store: S, settings: Settings) -> Self {
        Self { store, settings }
    }

    fn namespace<'a>(&'a self, scope: &'a RoleScope) -> &'a str {
        self.settings.namespace(scope)
    }

    pub async fn create(
        &self,
        scope: &RoleScope,
        name: &str,
        description: Option<&str>,
    ) -> Result<ServiceAccountInfo, Error> {
        let namespace = self.namespace(scope);
        let existing: Option<k8s::ServiceAccount> = self.store.get(namespace, name).await?;
        if existing.is_some() {
            return Err(Error::already_exists("ServiceAccount", namespace, name));
        }

        let mut meta = k8s::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        };
        metadata::set_kargo_managed(&mut meta);
        metadata::set_label(&mut meta, metadata::MANAGED_LABEL_KEY, metadata::TRUE_VALUE);
        metadata::set_description(&mut meta, description);

        let created = self
            .store
            .create(&k8s::ServiceAccount {
                metadata: meta,
                ..Default::default()
            })
            .await?;
        debug!(%namespace, %name, "created service account");
        Ok(self.info(scope, &created))
    }

    pub async fn get(&self, scope: &RoleScope, name: &str) -> Result<ServiceAccountInfo, Error> {
        let service_account = self.managed_service_account(scope, name).await?;
        Ok(self.info(scope, &service_account))
    }

    pub async fn list(&self, scope: &RoleScope) -> Result<Vec<ServiceAccountInfo>, Error> {
        let namespace = self.namespace(scope);
        let selector = format!("{}={}", metadata::MANAGED_LABEL_KEY, metadata::TRUE_VALUE);
        let service_accounts: Vec<k8s::ServiceAccount> =
            self.store.list(namespace, Some(&selector)).await?;
        let mut infos: Vec<ServiceAccountInfo> = service_accounts
            .iter()
            .map(|sa| self.info(scope, sa))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    /// Deletes the identity. Its API tokens are owner-referenced to it, so
    /// the store cascades their deletion.
    pub async fn delete(&self, scope: &RoleScope, name: &str) -> Result<(), Error> {
        let namespace = self.namespace(scope);
        let existing: Option<k8s::ServiceAccount> = self.store.get(namespace, name).await?;
        let existing = existing
            .ok_or_else(|| Error::not_found("ServiceAccount", namespace, name))?;
        if !metadata::has_label(&existing.metadata, metadata::MANAGED_LABEL_KEY) {
            return Err(Error::BadRequest(format!(
                "ServiceAccount {namespace}/{name} is not managed by Kargo",
            )));
        }
        ObjectStore::<k8s::ServiceAccount>::delete(&self.store, namespace, name).await
    }

    pub async fn create_token(
        &self,
        scope: &RoleScope,
        name: &str,
        token_name: &str,
    ) -> Result<ApiToken, Error> {
        let service_account = self.managed_service_account(scope, name).await?;
        tokens::create_token(
            &self.store,
            &service_account,
            token_name,
            metadata::SERVICE_ACCOUNT_TOKEN_LABEL_VALUE,
            tokens::DEFAULT_MAX_ATTEMPTS,
        )
        .await
    }

    pub async fn get_token(
        &self,
        scope: &RoleScope,
        name: &str,
        token_name: &str,
    ) -> Result<ApiToken, Error> {
        tokens::get_token(
            &self.store,
            self.namespace(scope),
            name,
            token_name,
            metadata::SERVICE_ACCOUNT_TOKEN_LABEL_VALUE,
        )
        .await
    }

    pub async fn list_tokens(
        &self,
        scope: &RoleScope,
        name: &str,
    ) -> Result<Vec<ApiToken>, Error> {
        tokens::list_tokens(
            &self.store,
            self.namespace(scope),
            name,
            metadata::SERVICE_ACCOUNT_TOKEN_LABEL_VALUE,
        )
        .await
    }

    pub async fn delete_token(
        &self,
        scope: &RoleScope,
        name: &str,
        token_name: &str,
    ) -> Result<(), Error> {
        tokens::delete_token(
            &self.store,
            self.namespace(scope),
            name,
            token_name,
            metadata::SERVICE_ACCOUNT_TOKEN_LABEL_VALUE,
        )
        .await
    }

    /// An unlabeled ServiceAccount does not belong to this database; it is
    /// reported as absent rather than exposed.
    async fn managed_service_account(
        &self,
        scope: &RoleScope,
        name: &str,
    ) -> Result<k8s::ServiceAccount, Error> {
        let namespace = self.namespace(scope);
        let service_account: Option<k8s::ServiceAccount> =
            self.store.get(namespace, name).await?;
        service_account
            .filter(|sa| metadata::has_label(&sa.metadata, metadata::MANAGED_LABEL_KEY))
            .ok_or_else(|| Error::not_found("ServiceAccount", namespace, name))
    }

    fn info(&self, scope: &RoleScope, sa: &k8s::ServiceAccount) -> ServiceAccountInfo {
        ServiceAccountInfo {
            scope: scope.clone(),
            name: sa.name_any(),
            description: metadata::description(&sa.metadata),
            creation_timestamp: sa.metadata.creation_timestamp.clone(),
        }
    }
}
