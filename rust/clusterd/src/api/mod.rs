//! REST front end.
//!
//! All endpoints live under `/1.0`. Three groups share one router:
//!
//! | Group | Paths | Admits |
//! |-------|-------|--------|
//! | state/lock | `/state`, `/state/{name}`, `/lock`, `/lock/{name}`, `/unlock/{name}` | socket, loopback, peer |
//! | gates | `/feature-gates`, `/feature-gates/{gatekey}` | socket, peer |
//! | config | `/config/{key}` | socket, peer |
//!
//! Successful list/get/empty responses use the sync envelope, failures the
//! error envelope. State documents, lock documents and lock conflict bodies
//! are returned raw because the infra client parses them directly.

pub mod access;
mod config;
mod gates;
mod remote_state;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, FromRequestParts, Path};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Serialize;

use crate::cluster_config::ClusterConfig;
use crate::error::{ClusterError, Result};
use crate::gates::GateRegistry;
use crate::remote_state::{LockEntry, RemoteState};
use crate::storage::RedbStore;

pub use access::{Access, TrustedPeers};

/// API version prefix.
pub const API_PREFIX: &str = "/1.0";

/// State documents routinely exceed axum's 2 MiB default.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Shared handler state. Every member is a cheap handle onto the store.
#[derive(Clone)]
pub struct ApiState {
    pub remote_state: RemoteState,
    pub gates: GateRegistry,
    pub config: ClusterConfig,
}

impl ApiState {
    pub fn new(store: RedbStore) -> Self {
        Self {
            remote_state: RemoteState::new(store.clone()),
            gates: GateRegistry::new(store.clone()),
            config: ClusterConfig::new(store),
        }
    }
}

/// Build the full API router.
pub fn router(state: ApiState, peers: TrustedPeers) -> Router {
    let state_routes = Router::new()
        .route("/state", get(remote_state::list_states))
        .route(
            "/state/{name}",
            get(remote_state::get_state)
                .put(remote_state::put_state)
                .delete(remote_state::delete_state),
        )
        .route("/lock", get(remote_state::list_locks))
        .route(
            "/lock/{name}",
            get(remote_state::get_lock).put(remote_state::lock),
        )
        .route("/unlock/{name}", put(remote_state::unlock))
        .route_layer(middleware::from_fn(access::require_state_access));

    let peer_routes = Router::new()
        .route(
            "/feature-gates",
            get(gates::list_gates).post(gates::create_gate),
        )
        .route(
            "/feature-gates/{gatekey}",
            get(gates::get_gate)
                .put(gates::update_gate)
                .delete(gates::delete_gate),
        )
        .route(
            "/config/{key}",
            get(config::get_config)
                .put(config::set_config)
                .delete(config::delete_config),
        )
        .route_layer(middleware::from_fn(access::require_peer_access));

    Router::new()
        .nest(API_PREFIX, state_routes.merge(peer_routes))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            Arc::new(peers),
            access::classify_connection,
        ))
        .with_state(state)
}

#[derive(Serialize)]
struct SyncEnvelope<T> {
    #[serde(rename = "type")]
    kind: &'static str,
    status: &'static str,
    status_code: u16,
    metadata: T,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    error: &'a str,
    error_code: u16,
}

/// 200 with `metadata` wrapped in the sync envelope.
pub(crate) fn sync_response<T: Serialize>(metadata: T) -> Response {
    Json(SyncEnvelope {
        kind: "sync",
        status: "Success",
        status_code: StatusCode::OK.as_u16(),
        metadata,
    })
    .into_response()
}

/// 200 with a `null` metadata sync envelope.
pub(crate) fn empty_response() -> Response {
    sync_response(serde_json::Value::Null)
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            kind: "error",
            error: message,
            error_code: status.as_u16(),
        }),
    )
        .into_response()
}

/// A stored JSON document as the body, unwrapped.
pub(crate) fn raw_json(status: StatusCode, body: impl Into<axum::body::Body>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.into(),
    )
        .into_response()
}

fn lock_response(status: StatusCode, lock: &LockEntry) -> Response {
    raw_json(status, lock.holder_info.clone())
}

impl IntoResponse for ClusterError {
    fn into_response(self) -> Response {
        match &self {
            ClusterError::AlreadyLocked(lock) => lock_response(StatusCode::LOCKED, lock),
            ClusterError::LockConflict(lock) => lock_response(StatusCode::CONFLICT, lock),
            ClusterError::NotFound(_) => error_response(StatusCode::NOT_FOUND, &self.to_string()),
            ClusterError::AlreadyExists(_) => {
                error_response(StatusCode::CONFLICT, &self.to_string())
            }
            ClusterError::InvalidInput(_) => {
                error_response(StatusCode::BAD_REQUEST, &self.to_string())
            }
            ClusterError::Internal(_) => {
                tracing::error!("Request failed: {}", self);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &self.to_string())
            }
        }
    }
}

/// Run a store call off the async executor.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ClusterError::Internal(format!("store task failed: {}", e)))?
}

/// The single percent-decoded path segment of a route (state name, gate
/// key or config key). Undecodable segments are `InvalidInput`.
pub(crate) struct PathName(pub String);

impl<S: Send + Sync> FromRequestParts<S> for PathName {
    type Rejection = ClusterError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let Path(name) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| ClusterError::InvalidInput(e.body_text()))?;
        if name.is_empty() {
            return Err(ClusterError::InvalidInput("empty path segment".to_string()));
        }
        Ok(Self(name))
    }
}

/// Parse a JSON request body, mapping failures to `InvalidInput`.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| ClusterError::InvalidInput(format!("malformed request body: {}", e)))
}
