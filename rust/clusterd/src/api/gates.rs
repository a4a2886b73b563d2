use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;

use super::{blocking, empty_response, parse_json, sync_response, ApiState, PathName};
use crate::error::{ClusterError, Result};
use crate::gates::FeatureGate;

/// PUT body. A full gate object is accepted too; the key in the path wins.
#[derive(Debug, Deserialize)]
struct GatePut {
    enabled: bool,
}

pub(super) async fn list_gates(State(api): State<ApiState>) -> Result<Response> {
    let registry = api.gates;
    let gates = blocking(move || registry.list()).await?;
    Ok(sync_response(gates))
}

pub(super) async fn create_gate(State(api): State<ApiState>, body: Bytes) -> Result<Response> {
    let gate: FeatureGate = parse_json(&body)?;
    if gate.gate_key.is_empty() {
        return Err(ClusterError::InvalidInput("gate-key is required".to_string()));
    }
    let registry = api.gates;
    blocking(move || registry.create(&gate.gate_key, gate.enabled)).await?;
    Ok(empty_response())
}

pub(super) async fn get_gate(
    State(api): State<ApiState>,
    PathName(gate_key): PathName,
) -> Result<Response> {
    let registry = api.gates;
    let gate = blocking(move || registry.get(&gate_key)).await?;
    Ok(sync_response(gate))
}

pub(super) async fn update_gate(
    State(api): State<ApiState>,
    PathName(gate_key): PathName,
    body: Bytes,
) -> Result<Response> {
    let update: GatePut = parse_json(&body)?;
    let registry = api.gates;
    blocking(move || registry.update(&gate_key, update.enabled)).await?;
    Ok(empty_response())
}

pub(super) async fn delete_gate(
    State(api): State<ApiState>,
    PathName(gate_key): PathName,
) -> Result<Response> {
    let registry = api.gates;
    blocking(move || registry.delete(&gate_key)).await?;
    Ok(empty_response())
}
