use crate::{tokens, Settings};
use kargo_rbac_core::{
    catalog::RBAC_API_GROUP,
    rules::{expand_verbs, normalize, NormalizeOptions},
    ApiToken, Claim, Error, ResourceCatalog, ResourceDetails, Role, RoleScope, ServiceAccountRef,
};
use kargo_rbac_k8s_api::{self as k8s, claims, claims::ClaimsMap, metadata, ResourceExt};
use kargo_rbac_k8s_store::{ObjectStore, ResourceStore};
use std::{collections::BTreeMap, sync::Arc};
use tracing::debug;

/// Orchestrates the ServiceAccount/Role/RoleBinding triplet backing a Kargo
/// Role.
///
/// The triplet is mutated through independent, non-atomic store calls. Every
/// mutating operation first fetches the current state and verifies that all
/// present objects are Kargo-managed; a partially created or out-of-band
/// modified triplet is reported, never silently repaired. Concurrent mutation
/// relies on the store's optimistic concurrency: a stale update surfaces as
/// [`Error::Conflict`] and is not retried here.
#[derive(Clone)]
pub struct RolesDatabase<S> {
    store: S,
    catalog: Arc<ResourceCatalog>,
    settings: Settings,
}

/// The raw objects underlying a Kargo Role, as currently stored.
#[derive(Clone, Debug)]
pub struct RoleResources {
    pub service_account: k8s::ServiceAccount,
    pub role: Option<k8s::Role>,
    pub role_binding: Option<k8s::RoleBinding>,
}

impl<S: ResourceStore> RolesDatabase<S> {
    pub fn new(store: S, catalog: Arc<ResourceCatalog>, settings: Settings) -> Self {
        Self {
            store,
            catalog,
            settings,
        }
    }

    fn namespace<'a>(&'a self, scope: &'a RoleScope) -> &'a str {
        self.settings.namespace(scope)
    }

    /// Creates the full triplet. Each of the three names is checked first so
    /// the error names the specific colliding object and no partial creation
    /// is attempted; a failure partway through leaves earlier objects in
    /// place, to be reported by the next call's existence checks.
    pub async fn create(&self, role: Role) -> Result<Role, Error> {
        let namespace = self.namespace(&role.scope).to_string();
        let name = role.name.clone();

        let existing: Option<k8s::ServiceAccount> = self.store.get(&namespace, &name).await?;
        if existing.is_some() {
            return Err(Error::already_exists("ServiceAccount", &namespace, &name));
        }
        let existing: Option<k8s::Role> = self.store.get(&namespace, &name).await?;
        if existing.is_some() {
            return Err(Error::already_exists("Role", &namespace, &name));
        }
        let existing: Option<k8s::RoleBinding> = self.store.get(&namespace, &name).await?;
        if existing.is_some() {
            return Err(Error::already_exists("RoleBinding", &namespace, &name));
        }

        let rules = normalize(&self.catalog, role.rules.clone(), NormalizeOptions::inclusive())?;
        let service_account = self.build_service_account(&role, &namespace);
        let binding = build_role_binding(&namespace, &name);
        let role_object = build_role_object(&namespace, &name, rules);

        self.store.create(&service_account).await?;
        self.store.create(&binding).await?;
        self.store.create(&role_object).await?;
        debug!(%namespace, %name, "created role triplet");

        self.get(&role.scope, &name).await
    }

    pub async fn get(&self, scope: &RoleScope, name: &str) -> Result<Role, Error> {
        let resources = self.get_as_resources(scope, name).await?;
        self.compose(scope, resources)
    }

    /// Fetches the underlying objects without composing them. Non-managed
    /// objects are returned as-is for observability.
    pub async fn get_as_resources(
        &self,
        scope: &RoleScope,
        name: &str,
    ) -> Result<RoleResources, Error> {
        let namespace = self.namespace(scope);
        let service_account: Option<k8s::ServiceAccount> =
            self.store.get(namespace, name).await?;
        let service_account = service_account
            .ok_or_else(|| Error::not_found("ServiceAccount", namespace, name))?;

        let bindings: Vec<k8s::RoleBinding> = self.store.list(namespace, None).await?;
        let role_binding = find_binding(&bindings, namespace, name)?;

        let role = match role_binding.as_ref() {
            Some(rb) if rb.role_ref.kind == "Role" => {
                self.store.get(namespace, rb.role_ref.name.as_str()).await?
            }
            _ => None,
        };

        Ok(RoleResources {
            service_account,
            role,
            role_binding,
        })
    }

    pub async fn list(&self, scope: &RoleScope) -> Result<Vec<Role>, Error> {
        let namespace = self.namespace(scope);
        let selector = scope
            .is_global()
            .then(|| format!("{}={}", metadata::SYSTEM_ROLE_LABEL_KEY, metadata::TRUE_VALUE));

        let service_accounts: Vec<k8s::ServiceAccount> =
            self.store.list(namespace, selector.as_deref()).await?;
        let bindings: Vec<k8s::RoleBinding> = self.store.list(namespace, None).await?;
        let role_objects: Vec<k8s::Role> = self.store.list(namespace, None).await?;
        let roles_by_name: BTreeMap<String, k8s::Role> = role_objects
            .into_iter()
            .map(|r| (r.name_any(), r))
            .collect();

        let mut roles = Vec::with_capacity(service_accounts.len());
        for service_account in service_accounts {
            let name = service_account.name_any();
            let role_binding = find_binding(&bindings, namespace, &name)?;
            let role = role_binding
                .as_ref()
                .filter(|rb| rb.role_ref.kind == "Role")
                .and_then(|rb| roles_by_name.get(&rb.role_ref.name).cloned());
            roles.push(self.compose(
                scope,
                RoleResources {
                    service_account,
                    role,
                    role_binding,
                },
            )?);
        }
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    pub async fn list_names(&self, scope: &RoleScope) -> Result<Vec<String>, Error> {
        Ok(self.list(scope).await?.into_iter().map(|r| r.name).collect())
    }

    /// Full overwrite of claims, description, and rules. Creates the triplet
    /// if the identity does not exist; lazily re-creates a missing rule or
    /// binding object otherwise.
    pub async fn update(&self, role: Role) -> Result<Role, Error> {
        let namespace = self.namespace(&role.scope).to_string();
        let name = role.name.clone();

        let existing: Option<k8s::ServiceAccount> = self.store.get(&namespace, &name).await?;
        if existing.is_none() {
            return self.create(role).await;
        }

        // Validate the replacement rules before touching anything so a bad
        // request cannot leave the triplet partially overwritten.
        let rules = normalize(&self.catalog, role.rules.clone(), NormalizeOptions::inclusive())?;

        let resources = self.manageable_resources(&role.scope, &name).await?;
        let mut service_account = resources.service_account;
        claims::set_claims_annotations(
            &mut service_account.metadata,
            &claims_to_map(&role.claims),
        );
        metadata::set_description(&mut service_account.metadata, role.description.as_deref());
        self.store.update(&service_account).await?;

        let has_binding = resources.role_binding.is_some();
        self.put_rules(&namespace, &name, resources.role, has_binding, rules)
            .await?;

        self.get(&role.scope, &name).await
    }

    /// Deletes rule, then binding, then identity. A triplet that is not fully
    /// manageable is rejected outright; nothing is deleted.
    pub async fn delete(&self, scope: &RoleScope, name: &str) -> Result<(), Error> {
        let namespace = self.namespace(scope);
        let resources = self.manageable_resources(scope, name).await?;

        if let Some(role) = resources.role {
            ObjectStore::<k8s::Role>::delete(&self.store, namespace, &role.name_any()).await?;
        }
        if let Some(binding) = resources.role_binding {
            ObjectStore::<k8s::RoleBinding>::delete(&self.store, namespace, &binding.name_any())
                .await?;
        }
        ObjectStore::<k8s::ServiceAccount>::delete(&self.store, namespace, name).await?;
        debug!(%namespace, %name, "deleted role triplet");
        Ok(())
    }

    /// Appends a permission grant and re-normalizes the full rule set. A
    /// wildcard verb in the request expands to the reserved set only.
    pub async fn grant_permissions(
        &self,
        scope: &RoleScope,
        name: &str,
        details: &ResourceDetails,
    ) -> Result<Role, Error> {
        let namespace = self.namespace(scope).to_string();
        let resources = self.manageable_resources(scope, name).await?;

        let verbs = expand_verbs(&self.catalog, &details.resource_type, &details.verbs, false)?;
        if verbs.is_empty() {
            return Err(Error::BadRequest(format!(
                "no verbs to grant on {:?}",
                details.resource_type,
            )));
        }

        let mut rules = resources
            .role
            .as_ref()
            .and_then(|r| r.rules.clone())
            .unwrap_or_default();
        rules.push(k8s::PolicyRule {
            api_groups: None,
            resources: Some(vec![details.resource_type.clone()]),
            resource_names: details.resource_name.clone().map(|n| vec![n]),
            verbs: verbs.into_iter().collect(),
            non_resource_urls: None,
        });
        let rules = normalize(&self.catalog, rules, NormalizeOptions::default())?;

        let has_binding = resources.role_binding.is_some();
        self.put_rules(&namespace, name, resources.role, has_binding, rules)
            .await?;
        self.get(scope, name).await
    }

    /// Removes the named verbs from any rule matching the request; a rule
    /// whose verb list empties is dropped. A missing rule object is a no-op
    /// success.
    pub async fn revoke_permissions(
        &self,
        scope: &RoleScope,
        name: &str,
        details: &ResourceDetails,
    ) -> Result<Role, Error> {
        let resources = self.manageable_resources(scope, name).await?;
        let Some(mut role_object) = resources.role else {
            return self.get(scope, name).await;
        };

        let remove = expand_verbs(&self.catalog, &details.resource_type, &details.verbs, false)?;
        let group = self
            .catalog
            .get(&details.resource_type)
            .map(|spec| spec.group.clone())
            .unwrap_or_default();

        // Stored rules may predate normalization; canonicalize before
        // subtracting so matching is exact.
        let rules = normalize(
            &self.catalog,
            role_object.rules.unwrap_or_default(),
            NormalizeOptions::default(),
        )?;
        let mut kept = Vec::with_capacity(rules.len());
        for mut rule in rules {
            if rule_matches(
                &rule,
                &group,
                &details.resource_type,
                details.resource_name.as_deref(),
            ) {
                rule.verbs.retain(|v| !remove.contains(v));
                if rule.verbs.is_empty() {
                    continue;
                }
            }
            kept.push(rule);
        }
        role_object.rules = Some(kept);
        self.store.update(&role_object).await?;
        self.get(scope, name).await
    }

    /// Merges claims into the identity object.
    pub async fn grant_to_users(
        &self,
        scope: &RoleScope,
        name: &str,
        claims_to_add: &[Claim],
    ) -> Result<Role, Error> {
        self.mutate_claims(scope, name, |existing| {
            claims::merge_claims(existing, &claims_to_map(claims_to_add));
        })
        .await
    }

    /// Drops claims from the identity object.
    pub async fn revoke_from_users(
        &self,
        scope: &RoleScope,
        name: &str,
        claims_to_drop: &[Claim],
    ) -> Result<Role, Error> {
        self.mutate_claims(scope, name, |existing| {
            claims::remove_claims(existing, &claims_to_map(claims_to_drop));
        })
        .await
    }

    /// Adds identity subjects to the binding, creating it if absent. Adding
    /// an already-present subject is a no-op.
    pub async fn grant_to_service_accounts(
        &self,
        scope: &RoleScope,
        name: &str,
        refs: &[ServiceAccountRef],
    ) -> Result<Role, Error> {
        let namespace = self.namespace(scope).to_string();
        let resources = self.manageable_resources(scope, name).await?;

        let (mut binding, exists) = match resources.role_binding {
            Some(binding) => (binding, true),
            None => (build_role_binding(&namespace, name), false),
        };
        let mut subjects = binding.subjects.take().unwrap_or_default();
        for r in refs {
            if !subjects.iter().any(|s| subject_is(s, &r.namespace, &r.name)) {
                subjects.push(service_account_subject(&r.namespace, &r.name));
            }
        }
        binding.subjects = Some(subjects);

        if exists {
            self.store.update(&binding).await?;
        } else {
            self.store.create(&binding).await?;
        }
        self.get(scope, name).await
    }

    /// Removes identity subjects from the binding. Removing a non-present
    /// subject is a no-op; the role's own identity is never removed through
    /// this path.
    pub async fn revoke_from_service_accounts(
        &self,
        scope: &RoleScope,
        name: &str,
        refs: &[ServiceAccountRef],
    ) -> Result<Role, Error> {
        let namespace = self.namespace(scope).to_string();
        let resources = self.manageable_resources(scope, name).await?;

        let Some(mut binding) = resources.role_binding else {
            return self.get(scope, name).await;
        };
        if let Some(subjects) = binding.subjects.as_mut() {
            subjects.retain(|s| {
                subject_is(s, &namespace, name)
                    || !refs.iter().any(|r| subject_is(s, &r.namespace, &r.name))
            });
        }
        self.store.update(&binding).await?;
        self.get(scope, name).await
    }

    /// Issues a bearer token for the role's identity. The returned token
    /// carries the full material; every subsequent read redacts it.
    pub async fn create_api_token(
        &self,
        scope: &RoleScope,
        name: &str,
        token_name: &str,
    ) -> Result<ApiToken, Error> {
        let service_account = self.role_identity(scope, name).await?;
        tokens::create_token(
            &self.store,
            &service_account,
            token_name,
            metadata::ROLE_TOKEN_LABEL_VALUE,
            tokens::DEFAULT_MAX_ATTEMPTS,
        )
        .await
    }

    pub async fn get_api_token(
        &self,
        scope: &RoleScope,
        name: &str,
        token_name: &str,
    ) -> Result<ApiToken, Error> {
        let namespace = self.namespace(scope);
        tokens::get_token(
            &self.store,
            namespace,
            name,
            token_name,
            metadata::ROLE_TOKEN_LABEL_VALUE,
        )
        .await
    }

    pub async fn list_api_tokens(
        &self,
        scope: &RoleScope,
        name: &str,
    ) -> Result<Vec<ApiToken>, Error> {
        let namespace = self.namespace(scope);
        tokens::list_tokens(
            &self.store,
            namespace,
            name,
            metadata::ROLE_TOKEN_LABEL_VALUE,
        )
        .await
    }

    pub async fn delete_api_token(
        &self,
        scope: &RoleScope,
        name: &str,
        token_name: &str,
    ) -> Result<(), Error> {
        let namespace = self.namespace(scope);
        tokens::delete_token(
            &self.store,
            namespace,
            name,
            token_name,
            metadata::ROLE_TOKEN_LABEL_VALUE,
        )
        .await
    }

    /// Fetches the role's identity and verifies it is labeled for token
    /// issuance; global-scope roles must additionally carry the system-role
    /// label.
    async fn role_identity(
        &self,
        scope: &RoleScope,
        name: &str,
    ) -> Result<k8s::ServiceAccount, Error> {
        let namespace = self.namespace(scope);
        let service_account: Option<k8s::ServiceAccount> =
            self.store.get(namespace, name).await?;
        let service_account = service_account
            .ok_or_else(|| Error::not_found("ServiceAccount", namespace, name))?;

        if !metadata::has_label(&service_account.metadata, metadata::ROLE_LABEL_KEY) {
            return Err(Error::BadRequest(format!(
                "ServiceAccount {namespace}/{name} is not a Kargo role identity",
            )));
        }
        if scope.is_global()
            && !metadata::has_label(&service_account.metadata, metadata::SYSTEM_ROLE_LABEL_KEY)
        {
            return Err(Error::BadRequest(format!(
                "ServiceAccount {namespace}/{name} is not a system role identity",
            )));
        }
        Ok(service_account)
    }

    async fn mutate_claims(
        &self,
        scope: &RoleScope,
        name: &str,
        mutate: impl FnOnce(&mut ClaimsMap),
    ) -> Result<Role, Error> {
        let resources = self.manageable_resources(scope, name).await?;
        let mut service_account = resources.service_account;

        let mut existing = read_claims(&service_account.metadata)?;
        mutate(&mut existing);
        claims::set_claims_annotations(&mut service_account.metadata, &existing);

        self.store.update(&service_account).await?;
        self.get(scope, name).await
    }

    /// Fetches the triplet and verifies every present object is manageable.
    /// All mutating operations enter through here.
    async fn manageable_resources(
        &self,
        scope: &RoleScope,
        name: &str,
    ) -> Result<RoleResources, Error> {
        let resources = self.get_as_resources(scope, name).await?;
        ensure_managed(&resources)?;
        Ok(resources)
    }

    async fn put_rules(
        &self,
        namespace: &str,
        name: &str,
        existing: Option<k8s::Role>,
        has_binding: bool,
        rules: Vec<k8s::PolicyRule>,
    ) -> Result<(), Error> {
        match existing {
            Some(mut role) => {
                role.rules = Some(rules);
                self.store.update(&role).await?;
            }
            None => {
                self.store
                    .create(&build_role_object(namespace, name, rules))
                    .await?;
            }
        }
        if !has_binding {
            self.store
                .create(&build_role_binding(namespace, name))
                .await?;
        }
        Ok(())
    }

    fn compose(&self, scope: &RoleScope, resources: RoleResources) -> Result<Role, Error> {
        let RoleResources {
            service_account,
            role,
            role_binding,
        } = resources;
        let namespace = service_account.namespace().unwrap_or_default();
        let name = service_account.name_any();

        let managed = metadata::is_kargo_managed(&service_account.metadata)
            && role
                .as_ref()
                .map(|r| metadata::is_kargo_managed(&r.metadata))
                .unwrap_or(true)
            && role_binding
                .as_ref()
                .map(|rb| metadata::is_kargo_managed(&rb.metadata))
                .unwrap_or(true);

        let raw_rules = role.and_then(|r| r.rules).unwrap_or_default();
        // A non-managed rule object may reference groups or types that would
        // fail validation; pass its rules through verbatim.
        let rules = if managed {
            normalize(&self.catalog, raw_rules, NormalizeOptions::inclusive())?
        } else {
            raw_rules
        };

        let mut service_accounts: Vec<ServiceAccountRef> = role_binding
            .iter()
            .flat_map(|rb| rb.subjects.iter().flatten())
            .filter(|s| s.kind == "ServiceAccount" && !subject_is(s, &namespace, &name))
            .map(|s| ServiceAccountRef::new(s.namespace.clone().unwrap_or_default(), &s.name))
            .collect();
        service_accounts.sort();

        Ok(Role {
            scope: scope.clone(),
            name,
            kargo_managed: managed,
            claims: claims_from_map(read_claims(&service_account.metadata)?),
            rules,
            service_accounts,
            description: metadata::description(&service_account.metadata),
            creation_timestamp: service_account.metadata.creation_timestamp.clone(),
        })
    }

    fn build_service_account(&self, role: &Role, namespace: &str) -> k8s::ServiceAccount {
        let mut meta = k8s::ObjectMeta {
            name: Some(role.name.clone()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        };
        metadata::set_kargo_managed(&mut meta);
        metadata::set_label(&mut meta, metadata::ROLE_LABEL_KEY, metadata::TRUE_VALUE);
        if role.scope.is_global() {
            metadata::set_label(
                &mut meta,
                metadata::SYSTEM_ROLE_LABEL_KEY,
                metadata::TRUE_VALUE,
            );
        }
        claims::set_claims_annotations(&mut meta, &claims_to_map(&role.claims));
        metadata::set_description(&mut meta, role.description.as_deref());
        k8s::ServiceAccount {
            metadata: meta,
            ..Default::default()
        }
    }
}

fn ensure_managed(resources: &RoleResources) -> Result<(), Error> {
    let check = |kind: &str, meta: &k8s::ObjectMeta| {
        if metadata::is_kargo_managed(meta) {
            Ok(())
        } else {
            Err(Error::BadRequest(format!(
                "{kind} {}/{} is not Kargo-managed",
                meta.namespace.as_deref().unwrap_or_default(),
                meta.name.as_deref().unwrap_or_default(),
            )))
        }
    };
    check("ServiceAccount", &resources.service_account.metadata)?;
    if let Some(role) = &resources.role {
        check("Role", &role.metadata)?;
    }
    if let Some(binding) = &resources.role_binding {
        check("RoleBinding", &binding.metadata)?;
    }
    Ok(())
}

/// Finds the binding whose subjects reference the identity. More than one is
/// ambiguous ownership.
fn find_binding(
    bindings: &[k8s::RoleBinding],
    namespace: &str,
    name: &str,
) -> Result<Option<k8s::RoleBinding>, Error> {
    let mut matched = bindings.iter().filter(|rb| {
        rb.subjects
            .iter()
            .flatten()
            .any(|s| subject_is(s, namespace, name))
    });
    let binding = matched.next();
    if matched.next().is_some() {
        return Err(Error::BadRequest(format!(
            "multiple RoleBindings in namespace {namespace:?} reference ServiceAccount {name:?}",
        )));
    }
    Ok(binding.cloned())
}

fn subject_is(subject: &k8s::Subject, namespace: &str, name: &str) -> bool {
    subject.kind == "ServiceAccount"
        && subject.name == name
        && subject.namespace.as_deref() == Some(namespace)
}

fn service_account_subject(namespace: &str, name: &str) -> k8s::Subject {
    k8s::Subject {
        api_group: None,
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
    }
}

fn managed_meta(namespace: &str, name: &str) -> k8s::ObjectMeta {
    let mut meta = k8s::ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    };
    metadata::set_kargo_managed(&mut meta);
    meta
}

fn build_role_object(namespace: &str, name: &str, rules: Vec<k8s::PolicyRule>) -> k8s::Role {
    k8s::Role {
        metadata: managed_meta(namespace, name),
        rules: Some(rules),
    }
}

fn build_role_binding(namespace: &str, name: &str) -> k8s::RoleBinding {
    k8s::RoleBinding {
        metadata: managed_meta(namespace, name),
        role_ref: k8s::RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "Role".to_string(),
            name: name.to_string(),
        },
        subjects: Some(vec![service_account_subject(namespace, name)]),
    }
}

fn rule_matches(
    rule: &k8s::PolicyRule,
    group: &str,
    resource_type: &str,
    resource_name: Option<&str>,
) -> bool {
    let group_matches = match rule.api_groups.as_deref() {
        Some(groups) => groups.iter().any(|g| g == group),
        None => group.is_empty(),
    };
    let type_matches = rule
        .resources
        .iter()
        .flatten()
        .any(|r| r == resource_type);
    let name_matches = match resource_name {
        Some(n) => rule.resource_names.iter().flatten().any(|rn| rn == n),
        None => rule
            .resource_names
            .as_deref()
            .map(|names| names.is_empty())
            .unwrap_or(true),
    };
    group_matches && type_matches && name_matches
}

fn claims_to_map(claims: &[Claim]) -> ClaimsMap {
    claims
        .iter()
        .map(|c| (c.name.clone(), c.values.iter().cloned().collect()))
        .collect()
}

fn claims_from_map(map: ClaimsMap) -> Vec<Claim> {
    map.into_iter()
        .map(|(name, values)| Claim {
            name,
            values: values.into_iter().collect(),
        })
        .collect()
}

fn read_claims(meta: &k8s::ObjectMeta) -> Result<ClaimsMap, Error> {
    claims::claims_from_annotations(meta.annotations.as_ref())
        .map_err(|e| Error::Internal(anyhow::Error::new(e)))
}
