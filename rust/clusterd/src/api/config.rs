//! Cluster configuration endpoints. The request body of a PUT is stored
//! verbatim as the value; a GET returns the value string as `metadata`.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;

use super::{blocking, empty_response, sync_response, ApiState, PathName};
use crate::error::{ClusterError, Result};

pub(super) async fn get_config(
    State(api): State<ApiState>,
    PathName(key): PathName,
) -> Result<Response> {
    let config = api.config;
    let value = blocking(move || config.get(&key)).await?;
    Ok(sync_response(value))
}

pub(super) async fn set_config(
    State(api): State<ApiState>,
    PathName(key): PathName,
    body: Bytes,
) -> Result<Response> {
    let value = String::from_utf8(body.to_vec())
        .map_err(|e| ClusterError::InvalidInput(format!("value is not UTF-8: {}", e)))?;
    let config = api.config;
    blocking(move || config.set(&key, &value)).await?;
    Ok(empty_response())
}

pub(super) async fn delete_config(
    State(api): State<ApiState>,
    PathName(key): PathName,
) -> Result<Response> {
    let config = api.config;
    blocking(move || config.delete(&key)).await?;
    Ok(empty_response())
}
