//! Remote state & lock endpoints used by the infra client's HTTP backend.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;

use super::{blocking, empty_response, raw_json, sync_response, ApiState, PathName};
use crate::error::Result;
use crate::remote_state::LockRequest;

/// `?ID=` on state writes; absent means "no lock held".
#[derive(Debug, Deserialize)]
pub(super) struct LockQuery {
    #[serde(rename = "ID", default)]
    id: String,
}

/// GET /1.0/state
pub(super) async fn list_states(State(api): State<ApiState>) -> Result<Response> {
    let svc = api.remote_state;
    let names = blocking(move || svc.list_states()).await?;
    Ok(sync_response(names))
}

/// GET /1.0/state/{name}
pub(super) async fn get_state(
    State(api): State<ApiState>,
    PathName(name): PathName,
) -> Result<Response> {
    let svc = api.remote_state;
    let entry = blocking(move || svc.get_state(&name)).await?;
    Ok(raw_json(StatusCode::OK, entry.payload))
}

/// PUT /1.0/state/{name}?ID={lockID}
pub(super) async fn put_state(
    State(api): State<ApiState>,
    PathName(name): PathName,
    Query(query): Query<LockQuery>,
    body: Bytes,
) -> Result<Response> {
    let svc = api.remote_state;
    blocking(move || svc.put_state(&name, &query.id, body.to_vec())).await?;
    Ok(empty_response())
}

/// DELETE /1.0/state/{name}
pub(super) async fn delete_state(
    State(api): State<ApiState>,
    PathName(name): PathName,
) -> Result<Response> {
    let svc = api.remote_state;
    blocking(move || svc.delete_state(&name)).await?;
    Ok(empty_response())
}

/// GET /1.0/lock
pub(super) async fn list_locks(State(api): State<ApiState>) -> Result<Response> {
    let svc = api.remote_state;
    let locks = blocking(move || svc.list_locks()).await?;
    let documents = locks
        .iter()
        .map(|lock| lock.document())
        .collect::<Result<Vec<_>>>()?;
    Ok(sync_response(documents))
}

/// GET /1.0/lock/{name}
pub(super) async fn get_lock(
    State(api): State<ApiState>,
    PathName(name): PathName,
) -> Result<Response> {
    let svc = api.remote_state;
    let lock = blocking(move || svc.get_lock(&name)).await?;
    Ok(raw_json(StatusCode::OK, lock.holder_info))
}

/// PUT /1.0/lock/{name}
pub(super) async fn lock(
    State(api): State<ApiState>,
    PathName(name): PathName,
    body: Bytes,
) -> Result<Response> {
    let request = LockRequest::parse(&body)?;
    let svc = api.remote_state;
    blocking(move || svc.acquire_lock(&name, request)).await?;
    Ok(empty_response())
}

/// PUT /1.0/unlock/{name}
pub(super) async fn unlock(
    State(api): State<ApiState>,
    PathName(name): PathName,
    body: Bytes,
) -> Result<Response> {
    let request = LockRequest::parse(&body)?;
    let svc = api.remote_state;
    blocking(move || svc.release_lock(&name, &request.lock_id)).await?;
    Ok(empty_response())
}
