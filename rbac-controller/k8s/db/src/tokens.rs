//! API token issuance.
//!
//! Tokens are `kubernetes.io/service-account-token` Secrets owner-referenced
//! to their identity, so deleting the identity cascades deletion of the
//! token. The cluster's token controller populates the material field
//! asynchronously after creation; [`wait_for_token_material`] polls with
//! bounded backoff until it appears. The material is returned verbatim
//! exactly once, from the creation call; every read path substitutes
//! [`REDACTED_TOKEN`].

use anyhow::anyhow;
use kargo_rbac_core::{ApiToken, Error, REDACTED_TOKEN};
use kargo_rbac_k8s_api::{self as k8s, metadata, ResourceExt};
use kargo_rbac_k8s_store::ObjectStore;
use tokio::time::{sleep, Duration};
use tracing::debug;

pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY: Duration = Duration::from_millis(100);

pub(crate) const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";
pub(crate) const SERVICE_ACCOUNT_NAME_ANNOTATION_KEY: &str = "kubernetes.io/service-account.name";
pub(crate) const TOKEN_DATA_KEY: &str = "token";

pub(crate) async fn create_token<S>(
    store: &S,
    service_account: &k8s::ServiceAccount,
    token_name: &str,
    token_label: &str,
    max_attempts: u32,
) -> Result<ApiToken, Error>
where
    S: ObjectStore<k8s::Secret>,
{
    let namespace = service_account.namespace().unwrap_or_default();

    let existing: Option<k8s::Secret> = store.get(&namespace, token_name).await?;
    if existing.is_some() {
        return Err(Error::already_exists("Secret", &namespace, token_name));
    }

    let secret = build_token_secret(service_account, token_name, token_label)?;
    store.create(&secret).await?;

    let secret = wait_for_token_material(store, &namespace, token_name, max_attempts).await?;
    let token = token_material(&secret).ok_or_else(|| {
        Error::Internal(anyhow!(
            "Secret {namespace}/{token_name} lost its token material"
        ))
    })?;
    Ok(api_token(&secret, token))
}

pub(crate) async fn get_token<S>(
    store: &S,
    namespace: &str,
    sa_name: &str,
    token_name: &str,
    token_label: &str,
) -> Result<ApiToken, Error>
where
    S: ObjectStore<k8s::Secret>,
{
    let secret = fetch_validated(store, namespace, sa_name, token_name, token_label).await?;
    Ok(api_token(&secret, REDACTED_TOKEN.to_string()))
}

pub(crate) async fn list_tokens<S>(
    store: &S,
    namespace: &str,
    sa_name: &str,
    token_label: &str,
) -> Result<Vec<ApiToken>, Error>
where
    S: ObjectStore<k8s::Secret>,
{
    let selector = format!("{}={token_label}", metadata::API_TOKEN_LABEL_KEY);
    let secrets: Vec<k8s::Secret> = store.list(namespace, Some(&selector)).await?;
    let mut tokens: Vec<ApiToken> = secrets
        .iter()
        .filter(|s| owner_of(s) == Some(sa_name))
        .map(|s| api_token(s, REDACTED_TOKEN.to_string()))
        .collect();
    tokens.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(tokens)
}

pub(crate) async fn delete_token<S>(
    store: &S,
    namespace: &str,
    sa_name: &str,
    token_name: &str,
    token_label: &str,
) -> Result<(), Error>
where
    S: ObjectStore<k8s::Secret>,
{
    fetch_validated(store, namespace, sa_name, token_name, token_label).await?;
    store.delete(namespace, token_name).await
}

/// Polls a token Secret until the store has populated its material.
///
/// Exponential backoff between bounded attempts. Absent material and
/// transient store errors are retried; terminal errors surface immediately.
/// Dropping the returned future abandons polling, so caller cancellation and
/// deadlines are respected.
pub(crate) async fn wait_for_token_material<S>(
    store: &S,
    namespace: &str,
    name: &str,
    max_attempts: u32,
) -> Result<k8s::Secret, Error>
where
    S: ObjectStore<k8s::Secret>,
{
    let mut delay = BASE_DELAY;
    for attempt in 1..=max_attempts {
        match store.get(namespace, name).await {
            Ok(Some(secret)) if token_material(&secret).is_some() => return Ok(secret),
            Ok(_) => {
                debug!(%namespace, %name, attempt, "token material not yet populated");
            }
            Err(error) if error.is_transient() => {
                debug!(%namespace, %name, %error, attempt, "transient error polling for token material");
            }
            Err(error) => return Err(error),
        }
        if attempt < max_attempts {
            sleep(delay).await;
            delay *= 2;
        }
    }
    Err(Error::Internal(anyhow!(
        "token material for Secret {namespace}/{name} was not populated after {max_attempts} attempts"
    )))
}

fn build_token_secret(
    service_account: &k8s::ServiceAccount,
    token_name: &str,
    token_label: &str,
) -> Result<k8s::Secret, Error> {
    let namespace = service_account.namespace().unwrap_or_default();
    let sa_name = service_account.name_any();
    let uid = service_account.uid().ok_or_else(|| {
        Error::Internal(anyhow!("ServiceAccount {namespace}/{sa_name} has no UID"))
    })?;

    let mut meta = k8s::ObjectMeta {
        name: Some(token_name.to_string()),
        namespace: Some(namespace.clone()),
        owner_references: Some(vec![k8s::OwnerReference {
            api_version: "v1".to_string(),
            kind: "ServiceAccount".to_string(),
            name: sa_name.clone(),
            uid,
            ..Default::default()
        }]),
        ..Default::default()
    };
    metadata::set_kargo_managed(&mut meta);
    metadata::set_label(&mut meta, metadata::API_TOKEN_LABEL_KEY, token_label);
    meta.annotations.get_or_insert_with(Default::default).extend([
        (
            SERVICE_ACCOUNT_NAME_ANNOTATION_KEY.to_string(),
            sa_name.clone(),
        ),
        (
            metadata::SERVICE_ACCOUNT_ANNOTATION_KEY.to_string(),
            sa_name,
        ),
    ]);

    Ok(k8s::Secret {
        metadata: meta,
        type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
        ..Default::default()
    })
}

async fn fetch_validated<S>(
    store: &S,
    namespace: &str,
    sa_name: &str,
    token_name: &str,
    token_label: &str,
) -> Result<k8s::Secret, Error>
where
    S: ObjectStore<k8s::Secret>,
{
    let secret: Option<k8s::Secret> = store.get(namespace, token_name).await?;
    let secret = secret.ok_or_else(|| Error::not_found("Secret", namespace, token_name))?;

    if secret.type_.as_deref() != Some(SERVICE_ACCOUNT_TOKEN_TYPE)
        || metadata::label_value(&secret.metadata, metadata::API_TOKEN_LABEL_KEY)
            != Some(token_label)
    {
        return Err(Error::Conflict(format!(
            "Secret {namespace}/{token_name} is not a Kargo {token_label} API token",
        )));
    }
    if owner_of(&secret) != Some(sa_name) {
        return Err(Error::BadRequest(format!(
            "Secret {namespace}/{token_name} is not owned by ServiceAccount {sa_name:?}",
        )));
    }
    Ok(secret)
}

fn owner_of(secret: &k8s::Secret) -> Option<&str> {
    metadata::annotation_value(&secret.metadata, metadata::SERVICE_ACCOUNT_ANNOTATION_KEY)
}

pub(crate) fn token_material(secret: &k8s::Secret) -> Option<String> {
    let data = secret.data.as_ref()?;
    let k8s::ByteString(bytes) = data.get(TOKEN_DATA_KEY)?;
    let token = String::from_utf8(bytes.clone()).ok()?;
    (!token.is_empty()).then_some(token)
}

fn api_token(secret: &k8s::Secret, token: String) -> ApiToken {
    ApiToken {
        name: secret.name_any(),
        namespace: secret.namespace().unwrap_or_default(),
        service_account: owner_of(secret).unwrap_or_default().to_string(),
        token,
        creation_timestamp: secret.metadata.creation_timestamp.clone(),
    }
}
