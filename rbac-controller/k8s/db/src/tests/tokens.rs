use super::{init_tracing, roles_db, service_accounts_db, MemStore};
use crate::tokens::{self, SERVICE_ACCOUNT_TOKEN_TYPE};
use kargo_rbac_core::{Error, Role, RoleScope, REDACTED_TOKEN};
use kargo_rbac_k8s_api::{self as k8s, metadata};
use kargo_rbac_k8s_store::ObjectStore;

const NS: &str = "payments";

fn scope() -> RoleScope {
    RoleScope::project(NS)
}

fn mk_role_sa(namespace: &str, name: &str) -> k8s::ServiceAccount {
    let mut meta = k8s::ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    };
    metadata::set_kargo_managed(&mut meta);
    metadata::set_label(&mut meta, metadata::ROLE_LABEL_KEY, metadata::TRUE_VALUE);
    k8s::ServiceAccount {
        metadata: meta,
        ..Default::default()
    }
}

fn mk_token_secret(namespace: &str, name: &str) -> k8s::Secret {
    k8s::Secret {
        metadata: k8s::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn material_is_returned_once_then_redacted() {
    let _tracing = init_tracing();
    let store = MemStore::default();
    let db = roles_db(store);
    db.create(Role::new(scope(), "deployer")).await.unwrap();

    let created = db.create_api_token(&scope(), "deployer", "t1").await.unwrap();
    assert_eq!(created.token, "token-material-t1");
    assert!(!created.is_redacted());
    assert_eq!(created.service_account, "deployer");

    let fetched = db.get_api_token(&scope(), "deployer", "t1").await.unwrap();
    assert_eq!(fetched.token, REDACTED_TOKEN);
    assert!(fetched.is_redacted());

    let err = db
        .create_api_token(&scope(), "deployer", "t1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }), "{err:?}");
}

#[tokio::test(start_paused = true)]
async fn creation_polls_until_the_material_appears() {
    let store = MemStore::default();
    let db = roles_db(store.clone());
    db.create(Role::new(scope(), "deployer")).await.unwrap();

    store.delay_token_population(3);
    let created = db.create_api_token(&scope(), "deployer", "t1").await.unwrap();
    assert_eq!(created.token, "token-material-t1");
}

#[tokio::test(start_paused = true)]
async fn exhausted_polling_fails() {
    let store = MemStore::default();
    let db = roles_db(store.clone());
    db.create(Role::new(scope(), "deployer")).await.unwrap();

    store.delay_token_population(99);
    let err = db
        .create_api_token(&scope(), "deployer", "t1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Internal(_)), "{err:?}");
    // The unpopulated secret is left behind for inspection or cleanup.
    assert!(store.has_secret(NS, "t1"));
}

#[tokio::test(start_paused = true)]
async fn transient_poll_errors_are_retried() {
    let store = MemStore::default();
    store.delay_token_population(2);
    store.create(&mk_token_secret(NS, "t1")).await.unwrap();
    store.fail_next_secret_get(Error::Store {
        code: 503,
        message: "apiserver unavailable".to_string(),
    });

    let secret = tokens::wait_for_token_material(&store, NS, "t1", 5)
        .await
        .unwrap();
    assert!(tokens::token_material(&secret).is_some());
}

#[tokio::test]
async fn terminal_poll_errors_surface_immediately() {
    let store = MemStore::default();
    store.create(&mk_token_secret(NS, "t1")).await.unwrap();
    store.fail_next_secret_get(Error::Store {
        code: 403,
        message: "forbidden".to_string(),
    });

    let err = tokens::wait_for_token_material(&store, NS, "t1", 5)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Store { code: 403, .. }), "{err:?}");
}

#[tokio::test]
async fn plain_identities_cannot_issue_role_tokens() {
    let store = MemStore::default();
    let db = roles_db(store.clone());

    let mut sa = mk_role_sa(NS, "half-made");
    sa.metadata
        .labels
        .as_mut()
        .unwrap()
        .remove(metadata::ROLE_LABEL_KEY);
    store.create(&sa).await.unwrap();

    let err = db
        .create_api_token(&scope(), "half-made", "t1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)), "{err:?}");
}

#[tokio::test]
async fn global_tokens_require_the_system_role_label() {
    let store = MemStore::default();
    let db = roles_db(store.clone());

    // A role-labeled identity in the system namespace that is not a system
    // role cannot issue global tokens.
    store.create(&mk_role_sa("kargo", "imposter")).await.unwrap();
    let err = db
        .create_api_token(&RoleScope::Global, "imposter", "t1")
        .await
        .unwrap_err();
    match err {
        Error::BadRequest(msg) => assert!(msg.contains("system role"), "{msg}"),
        other => panic!("expected BadRequest, got {other:?}"),
    }

    db.create(Role::new(RoleScope::Global, "admin")).await.unwrap();
    let token = db
        .create_api_token(&RoleScope::Global, "admin", "t2")
        .await
        .unwrap();
    assert_eq!(token.token, "token-material-t2");
}

#[tokio::test]
async fn tokens_are_scoped_to_their_owner() {
    let store = MemStore::default();
    let db = roles_db(store);
    db.create(Role::new(scope(), "reader")).await.unwrap();
    db.create(Role::new(scope(), "writer")).await.unwrap();
    db.create_api_token(&scope(), "reader", "reader-b").await.unwrap();
    db.create_api_token(&scope(), "reader", "reader-a").await.unwrap();
    db.create_api_token(&scope(), "writer", "writer-a").await.unwrap();

    let listed = db.list_api_tokens(&scope(), "reader").await.unwrap();
    let names: Vec<&str> = listed.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["reader-a", "reader-b"]);

    // Reading another identity's token by name is rejected.
    let err = db
        .get_api_token(&scope(), "reader", "writer-a")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BadRequest(_)), "{err:?}");
}

#[tokio::test]
async fn role_and_identity_token_labels_are_disjoint() {
    let store = MemStore::default();
    let roles = roles_db(store.clone());
    let identities = service_accounts_db(store);

    roles.create(Role::new(scope(), "deployer")).await.unwrap();
    roles
        .create_api_token(&scope(), "deployer", "t1")
        .await
        .unwrap();

    // The identities database refuses a secret carrying the role label.
    let err = identities
        .get_token(&scope(), "deployer", "t1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "{err:?}");
}
