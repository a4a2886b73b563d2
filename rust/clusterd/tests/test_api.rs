//! REST API tests driven through the router with `tower::ServiceExt::oneshot`.

use std::net::SocketAddr;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use clusterd::prelude::*;

fn app() -> Router {
    let store = RedbStore::open_temporary().unwrap();
    apply_schema(&store).unwrap();
    router(
        ApiState::new(store),
        TrustedPeers::new(["10.0.0.2".parse::<std::net::IpAddr>().unwrap()]),
    )
}

async fn send(
    app: &Router,
    access: Access,
    method: Method,
    uri: &str,
    body: impl Into<Body>,
) -> (StatusCode, Bytes) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body.into())
        .unwrap();
    request.extensions_mut().insert(access);
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes)
}

async fn send_from(app: &Router, remote: &str, method: Method, uri: &str) -> StatusCode {
    let remote: SocketAddr = remote.parse().unwrap();
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    request.extensions_mut().insert(ConnectInfo(remote));
    app.clone().oneshot(request).await.unwrap().status()
}

fn json_body(bytes: &Bytes) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

const LOCK_A: &str = r#"{"ID":"a1b2","Operation":"OperationTypeApply","Who":"ops@node1"}"#;
const LOCK_B: &str = r#"{"ID":"c3d4","Operation":"OperationTypePlan","Who":"ci@node2"}"#;

#[tokio::test]
async fn test_state_lifecycle() {
    let app = app();
    let access = Access::Loopback;

    let (status, body) = send(&app, access, Method::GET, "/1.0/state", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["metadata"], json!([]));

    let (status, _) = send(&app, access, Method::GET, "/1.0/state/plan", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let document = r#"{"version":4,"serial":1,"resources":[]}"#;
    let (status, _) = send(&app, access, Method::PUT, "/1.0/state/plan", document).await;
    assert_eq!(status, StatusCode::OK);

    // The stored document comes back byte for byte, without an envelope
    let (status, body) = send(&app, access, Method::GET, "/1.0/state/plan", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], document.as_bytes());

    let (_, body) = send(&app, access, Method::GET, "/1.0/state", Body::empty()).await;
    assert_eq!(json_body(&body)["metadata"], json!(["plan"]));

    let (status, _) = send(&app, access, Method::DELETE, "/1.0/state/plan", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) =
        send(&app, access, Method::DELETE, "/1.0/state/plan", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["type"], "error");
    assert_eq!(json_body(&body)["error_code"], 404);
}

#[tokio::test]
async fn test_lock_protocol() {
    let app = app();
    let access = Access::Socket;

    let (status, _) = send(&app, access, Method::PUT, "/1.0/lock/plan", LOCK_A).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, access, Method::GET, "/1.0/lock/plan", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json_body(&Bytes::from_static(LOCK_A.as_bytes())));

    // Second acquire, even by the holder, is 423 with the holder's document
    for attempt in [LOCK_B, LOCK_A] {
        let (status, body) = send(&app, access, Method::PUT, "/1.0/lock/plan", attempt).await;
        assert_eq!(status, StatusCode::LOCKED);
        assert_eq!(json_body(&body)["ID"], "a1b2");
        assert_eq!(json_body(&body)["Who"], "ops@node1");
    }

    // Writes under the lock need the holder's ID
    let (status, body) = send(
        &app,
        access,
        Method::PUT,
        "/1.0/state/plan?ID=c3d4",
        r#"{"serial":2}"#,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json_body(&body)["ID"], "a1b2");

    let (status, _) = send(&app, access, Method::PUT, "/1.0/state/plan", r#"{"serial":2}"#).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(&app, access, Method::GET, "/1.0/state/plan", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        access,
        Method::PUT,
        "/1.0/state/plan?ID=a1b2",
        r#"{"serial":3}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, access, Method::GET, "/1.0/state/plan", Body::empty()).await;
    assert_eq!(&body[..], br#"{"serial":3}"#);

    let (_, body) = send(&app, access, Method::GET, "/1.0/lock", Body::empty()).await;
    assert_eq!(json_body(&body)["metadata"][0]["ID"], "a1b2");

    // Unlock with the wrong ID is 409 and keeps the lock
    let (status, body) = send(&app, access, Method::PUT, "/1.0/unlock/plan", LOCK_B).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json_body(&body)["ID"], "a1b2");

    let (status, _) = send(&app, access, Method::PUT, "/1.0/unlock/plan", LOCK_A).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, access, Method::GET, "/1.0/lock/plan", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Retried unlock is harmless
    let (status, _) = send(&app, access, Method::PUT, "/1.0/unlock/plan", LOCK_A).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_lock_body() {
    let app = app();
    for body in ["", "not json", r#"{"Who":"ops"}"#, r#"{"ID":7}"#] {
        let (status, reply) = send(&app, Access::Socket, Method::PUT, "/1.0/lock/plan", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", body);
        assert_eq!(json_body(&reply)["error_code"], 400);
    }
}

#[tokio::test]
async fn test_escaped_names() {
    let app = app();
    let access = Access::Socket;

    let (status, _) = send(&app, access, Method::PUT, "/1.0/state/env%2Fprod", "{}").await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, access, Method::GET, "/1.0/state", Body::empty()).await;
    assert_eq!(json_body(&body)["metadata"], json!(["env/prod"]));

    let (status, _) = send(&app, access, Method::GET, "/1.0/state/env%2Fprod", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, access, Method::GET, "/1.0/state/%FF", Body::empty()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["type"], "error");
}

#[tokio::test]
async fn test_feature_gates() {
    let app = app();
    let access = Access::Peer;

    let gate = r#"{"gate-key":"feature.multi-region","enabled":true}"#;
    let (status, _) = send(&app, access, Method::POST, "/1.0/feature-gates", gate).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, access, Method::POST, "/1.0/feature-gates", gate).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        access,
        Method::GET,
        "/1.0/feature-gates/feature.multi-region",
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_body(&body)["metadata"],
        json!({"gate-key": "feature.multi-region", "enabled": true})
    );

    let (status, _) = send(
        &app,
        access,
        Method::PUT,
        "/1.0/feature-gates/feature.multi-region",
        r#"{"enabled":false}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Updating a gate that was never created does not create it
    let (status, _) = send(
        &app,
        access,
        Method::PUT,
        "/1.0/feature-gates/feature.never",
        r#"{"enabled":true}"#,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, access, Method::GET, "/1.0/feature-gates", Body::empty()).await;
    assert_eq!(
        json_body(&body)["metadata"],
        json!([{"gate-key": "feature.multi-region", "enabled": false}])
    );

    let (status, _) = send(
        &app,
        access,
        Method::DELETE,
        "/1.0/feature-gates/feature.multi-region",
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(
        &app,
        access,
        Method::GET,
        "/1.0/feature-gates/feature.multi-region",
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_gate_body_validation() {
    let app = app();
    for body in ["{", r#"{"gate-key":"feature.x"}"#, r#"{"gate-key":"","enabled":true}"#] {
        let (status, _) = send(&app, Access::Peer, Method::POST, "/1.0/feature-gates", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", body);
    }
}

#[tokio::test]
async fn test_cluster_config() {
    let app = app();
    let access = Access::Socket;

    let (status, _) =
        send(&app, access, Method::GET, "/1.0/config/deployment.type", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, access, Method::PUT, "/1.0/config/deployment.type", "maas").await;
    assert_eq!(status, StatusCode::OK);

    // The value string itself is the metadata
    let (_, body) =
        send(&app, access, Method::GET, "/1.0/config/deployment.type", Body::empty()).await;
    assert_eq!(json_body(&body)["metadata"], json!("maas"));

    // Values are stored byte for byte, trailing newlines included
    let value = "[\"ceph\"]\n\n";
    let (status, _) =
        send(&app, access, Method::PUT, "/1.0/config/StorageBackendsEnabled", value).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(
        &app,
        access,
        Method::GET,
        "/1.0/config/StorageBackendsEnabled",
        Body::empty(),
    )
    .await;
    assert_eq!(json_body(&body)["metadata"], json!(value));

    let (status, _) =
        send(&app, access, Method::DELETE, "/1.0/config/deployment.type", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_access_groups() {
    let app = app();

    // Loopback reaches state but not gates or config
    let (status, _) = send(&app, Access::Loopback, Method::GET, "/1.0/state", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) =
        send(&app, Access::Loopback, Method::GET, "/1.0/feature-gates", Body::empty()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json_body(&body)["error_code"], 403);
    let (status, _) =
        send(&app, Access::Loopback, Method::GET, "/1.0/config/x", Body::empty()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Untrusted reaches nothing
    for uri in ["/1.0/state", "/1.0/lock", "/1.0/feature-gates"] {
        let (status, _) = send(&app, Access::Untrusted, Method::GET, uri, Body::empty()).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
    }

    // Untagged requests are untrusted
    let request = Request::builder()
        .uri("/1.0/state")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_tcp_classification() {
    let app = app();

    assert_eq!(
        send_from(&app, "127.0.0.1:50000", Method::GET, "/1.0/state").await,
        StatusCode::OK
    );
    assert_eq!(
        send_from(&app, "127.0.0.1:50000", Method::GET, "/1.0/feature-gates").await,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        send_from(&app, "10.0.0.2:50000", Method::GET, "/1.0/feature-gates").await,
        StatusCode::OK
    );
    assert_eq!(
        send_from(&app, "10.0.0.9:50000", Method::GET, "/1.0/state").await,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn test_unknown_route() {
    let app = app();
    let (status, _) = send(&app, Access::Socket, Method::GET, "/1.0/nothing", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, Access::Socket, Method::GET, "/state", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
