//! Black-box pipeline tests: drive the Axum router in-process, exercising
//! authentication, namespace authorization, and the secrets consumer's REST
//! surface end to end. No network socket is opened — `tower::ServiceExt::oneshot`
//! runs requests directly against the router's `Service` implementation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request as HttpRequest, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use custodia_core::auth::{AuthChain, Authenticator, Authorizer, HeaderAuth, PathAuthz, UserNamespaceAuthz};
use custodia_core::consumer::ConsumerTree;
use custodia_core::message::Validator;
use custodia_core::overlay::{ContentEncryption, EncryptedOverlayStore, OverlayConfig};
use custodia_core::plugin::TracingAuditHook;
use custodia_core::secrets::SecretsConsumer;
use custodia_store::{MemoryStore, Store};

use custodia_server::routes;
use custodia_server::state::AppState;

fn test_state() -> Arc<AppState> {
    let dir = std::env::temp_dir().join(format!(
        "custodia-pipeline-test-{:?}-{}",
        std::thread::current().id(),
        std::process::id()
    ));
    let _ = std::fs::create_dir_all(&dir);

    let backing = Arc::new(MemoryStore::new());
    let store: Arc<dyn Store> = Arc::new(
        EncryptedOverlayStore::open(
            backing,
            OverlayConfig {
                master_key_path: dir.join("master.jwk"),
                autogen_master_key: true,
                enc: ContentEncryption::A256CbcHs512,
            },
        )
        .expect("overlay opens"),
    );

    let audit = Arc::new(TracingAuditHook);
    let authenticators: Vec<Box<dyn Authenticator>> =
        vec![Box::new(HeaderAuth { header_name: "REMOTE_USER".to_string(), allowed_values: None })];
    let authorizers: Vec<Box<dyn Authorizer>> = vec![
        Box::new(PathAuthz { paths: vec!["/secrets".to_string()] }),
        Box::new(UserNamespaceAuthz { subtree: "/secrets".to_string() }),
    ];
    let auth_chain = Arc::new(AuthChain::new(authenticators, authorizers, Arc::clone(&audit) as _));

    let mut consumers = ConsumerTree::new();
    consumers.register(
        "/secrets".to_string(),
        Arc::new(SecretsConsumer::new(
            Arc::clone(&store),
            Validator::default(),
            "test-server",
            Arc::clone(&audit) as _,
        )),
    );

    Arc::new(AppState {
        store,
        auth_chain,
        consumers: Arc::new(consumers),
        kem_keys: None,
        audit,
        forwarder_id: "test-forwarder-id".to_string(),
    })
}

async fn send(state: Arc<AppState>, req: HttpRequest<Body>) -> (StatusCode, serde_json::Value) {
    let router = routes::router().with_state(state);
    let response = router.oneshot(req).await.expect("router handles every request");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body readable").to_bytes();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, body)
}

#[tokio::test]
async fn mkdir_put_get_roundtrip() {
    let state = test_state();

    let mkdir = HttpRequest::post("/secrets/alice/")
        .header("REMOTE_USER", "alice")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(Arc::clone(&state), mkdir).await;
    assert_eq!(status, StatusCode::CREATED);

    let put = HttpRequest::put("/secrets/alice/db-password")
        .header("REMOTE_USER", "alice")
        .header("Content-Type", "application/json")
        .body(Body::from(r#"{"type":"simple","value":"hunter2"}"#))
        .unwrap();
    let (status, _) = send(Arc::clone(&state), put).await;
    assert_eq!(status, StatusCode::CREATED);

    let get = HttpRequest::get("/secrets/alice/db-password")
        .header("REMOTE_USER", "alice")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(Arc::clone(&state), get).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], "hunter2");
}

#[tokio::test]
async fn cross_namespace_access_is_forbidden() {
    let state = test_state();

    let mkdir = HttpRequest::post("/secrets/alice/")
        .header("REMOTE_USER", "alice")
        .body(Body::empty())
        .unwrap();
    send(Arc::clone(&state), mkdir).await;

    let get = HttpRequest::get("/secrets/alice/db-password")
        .header("REMOTE_USER", "bob")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(state, get).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_parent_container_is_not_found() {
    let state = test_state();

    let put = HttpRequest::put("/secrets/alice/nested/child/k1")
        .header("REMOTE_USER", "alice")
        .header("Content-Type", "application/json")
        .body(Body::from(r#"{"type":"simple","value":"x"}"#))
        .unwrap();
    let (status, _) = send(state, put).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_non_empty_container_conflicts() {
    let state = test_state();

    let mkdir = HttpRequest::post("/secrets/alice/")
        .header("REMOTE_USER", "alice")
        .body(Body::empty())
        .unwrap();
    send(Arc::clone(&state), mkdir).await;

    let put = HttpRequest::put("/secrets/alice/k1")
        .header("REMOTE_USER", "alice")
        .header("Content-Type", "application/json")
        .body(Body::from(r#"{"type":"simple","value":"x"}"#))
        .unwrap();
    send(Arc::clone(&state), put).await;

    let rmdir = HttpRequest::delete("/secrets/alice/")
        .header("REMOTE_USER", "alice")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(state, rmdir).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn rewriting_an_existing_key_conflicts() {
    let state = test_state();

    let put = HttpRequest::put("/secrets/alice/k1")
        .header("REMOTE_USER", "alice")
        .header("Content-Type", "application/json")
        .body(Body::from(r#"{"type":"simple","value":"v1"}"#))
        .unwrap();
    let (status, _) = send(Arc::clone(&state), put).await;
    assert_eq!(status, StatusCode::CREATED);

    let put_again = HttpRequest::put("/secrets/alice/k1")
        .header("REMOTE_USER", "alice")
        .header("Content-Type", "application/json")
        .body(Body::from(r#"{"type":"simple","value":"v2"}"#))
        .unwrap();
    let (status, _) = send(state, put_again).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn unauthenticated_request_is_unauthorized() {
    let state = test_state();
    let get =
        HttpRequest::get("/secrets/alice/k1").body(Body::empty()).unwrap();
    let (status, _) = send(state, get).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn repeated_loop_header_is_rejected() {
    let state = test_state();
    let get = HttpRequest::get("/secrets/alice/k1")
        .header("REMOTE_USER", "alice")
        .header("X-LOOP-CUSTODIA", "test-forwarder-id")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(state, get).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}
