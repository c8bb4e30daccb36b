use super::{init_tracing, service_accounts_db, MemStore};
use kargo_rbac_core::{Error, RoleScope, REDACTED_TOKEN};
use kargo_rbac_k8s_api::{self as k8s, metadata};
use kargo_rbac_k8s_store::ObjectStore;

const NS: &str = "payments";

fn scope() -> RoleScope {
    RoleScope::project(NS)
}

fn mk_plain_sa(namespace: &str, name: &str) -> k8s::ServiceAccount {
    k8s::ServiceAccount {
        metadata: k8s::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn create_then_get_round_trips() {
    let _tracing = init_tracing();
    let store = MemStore::default();
    let db = service_accounts_db(store.clone());

    let created = db.create(&scope(), "ci", Some("ci bot")).await.unwrap();
    assert_eq!(created.name, "ci");
    assert_eq!(created.description.as_deref(), Some("ci bot"));

    let fetched = db.get(&scope(), "ci").await.unwrap();
    assert_eq!(fetched, created);

    let stored = ObjectStore::<k8s::ServiceAccount>::get(&store, NS, "ci")
        .await
        .unwrap()
        .unwrap();
    assert!(metadata::is_kargo_managed(&stored.metadata));
    assert!(metadata::has_label(&stored.metadata, metadata::MANAGED_LABEL_KEY));
}

#[tokio::test]
async fn create_duplicate_fails() {
    let store = MemStore::default();
    let db = service_accounts_db(store);

    db.create(&scope(), "ci", None).await.unwrap();
    let err = db.create(&scope(), "ci", None).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }), "{err:?}");
}

#[tokio::test]
async fn list_is_sorted_and_excludes_unlabeled() {
    let store = MemStore::default();
    let db = service_accounts_db(store.clone());

    db.create(&scope(), "backup", None).await.unwrap();
    db.create(&scope(), "auditor", None).await.unwrap();
    store.create(&mk_plain_sa(NS, "default")).await.unwrap();

    let names: Vec<String> = db
        .list(&scope())
        .await
        .unwrap()
        .into_iter()
        .map(|info| info.name)
        .collect();
    assert_eq!(names, vec!["auditor", "backup"]);
}

#[tokio::test]
async fn unlabeled_service_account_is_invisible() {
    let store = MemStore::default();
    let db = service_accounts_db(store.clone());

    store.create(&mk_plain_sa(NS, "default")).await.unwrap();

    assert!(db.get(&scope(), "default").await.unwrap_err().is_not_found());

    let err = db.delete(&scope(), "default").await.unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)), "{err:?}");
    // The object itself is untouched.
    assert!(ObjectStore::<k8s::ServiceAccount>::get(&store, NS, "default")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn delete_missing_is_not_found() {
    let store = MemStore::default();
    let db = service_accounts_db(store);
    assert!(db.delete(&scope(), "ghost").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn token_material_is_returned_once() {
    let store = MemStore::default();
    let db = service_accounts_db(store.clone());
    db.create(&scope(), "ci", None).await.unwrap();

    let created = db.create_token(&scope(), "ci", "t1").await.unwrap();
    assert!(!created.is_redacted());
    assert_eq!(created.service_account, "ci");

    let fetched = db.get_token(&scope(), "ci", "t1").await.unwrap();
    assert_eq!(fetched.token, REDACTED_TOKEN);

    let listed = db.list_tokens(&scope(), "ci").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].is_redacted());

    db.delete_token(&scope(), "ci", "t1").await.unwrap();
    assert!(db
        .get_token(&scope(), "ci", "t1")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn deleting_the_identity_cascades_its_tokens() {
    let store = MemStore::default();
    let db = service_accounts_db(store.clone());
    db.create(&scope(), "ci", None).await.unwrap();
    db.create_token(&scope(), "ci", "t1").await.unwrap();
    assert!(store.has_secret(NS, "t1"));

    db.delete(&scope(), "ci").await.unwrap();
    assert!(!store.has_secret(NS, "t1"));
}
