//! CRUD for component B's `Provider`/`Key` entities. Provider/network/
//! concurrency shape is taken straight from `relaygate_provider_core::config`
//! so a payload that would be rejected by the scheduler at load time is
//! rejected here too, instead of being accepted as opaque JSON the way the
//! teacher's `config_json: JsonValue` passthrough does.
//!
//! Updating the running `ProviderRegistry` from these writes is out of scope
//! here — wiring a hot-reloadable registry is the concern of the binary that
//! owns it (spec's `WireAdapter`/live-provider-instantiation is itself a
//! Non-goal); this crate only keeps the durable record current.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use relaygate_provider_core::config::{ConcurrencyConfig, CustomProviderConfig, NetworkConfig};
use relaygate_storage::{KeyRecord, ProviderRecord, StorageError};
use serde::Deserialize;
use serde_json::json;

use crate::auth::require_admin;
use crate::AdminState;

fn err_response(err: StorageError) -> Response {
    match err {
        StorageError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ProviderPayload {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub custom_provider: Option<CustomProviderConfig>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn record_from_payload(payload: ProviderPayload, existing_keys: Vec<KeyRecord>) -> Result<ProviderRecord, serde_json::Error> {
    Ok(ProviderRecord {
        id: payload.id,
        name: payload.name,
        network: serde_json::to_value(payload.network)?,
        concurrency: serde_json::to_value(payload.concurrency)?,
        custom_provider: payload.custom_provider.map(serde_json::to_value).transpose()?,
        enabled: payload.enabled,
        keys: existing_keys,
    })
}

pub async fn list_providers(State(state): State<AdminState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.load_snapshot().await {
        Ok(snap) => Json(snap.providers).into_response(),
        Err(err) => err_response(err),
    }
}

pub async fn create_provider(State(state): State<AdminState>, headers: HeaderMap, Json(payload): Json<ProviderPayload>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let record = match record_from_payload(payload, Vec::new()) {
        Ok(record) => record,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    match state.storage.upsert_provider(record).await {
        Ok(saved) => Json(json!({ "status": "ok", "id": saved.id })).into_response(),
        Err(err) => err_response(err),
    }
}

pub async fn update_provider(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(mut payload): Json<ProviderPayload>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    payload.id = id;
    let existing_keys = match state.storage.load_snapshot().await {
        Ok(snap) => snap.providers.into_iter().find(|p| p.id == id).map(|p| p.keys).unwrap_or_default(),
        Err(err) => return err_response(err),
    };
    let record = match record_from_payload(payload, existing_keys) {
        Ok(record) => record,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    match state.storage.upsert_provider(record).await {
        Ok(_) => Json(json!({ "status": "ok" })).into_response(),
        Err(err) => err_response(err),
    }
}

pub async fn delete_provider(State(state): State<AdminState>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.delete_provider(id).await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(err) => err_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct KeyPayload {
    #[serde(default)]
    pub id: i64,
    pub value: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub provider_config: serde_json::Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_weight() -> f64 {
    1.0
}

pub async fn create_key(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(provider_id): Path<i64>,
    Json(payload): Json<KeyPayload>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let record = KeyRecord {
        id: payload.id,
        provider_id,
        value: payload.value,
        models: payload.models,
        weight: payload.weight,
        provider_config: payload.provider_config,
        enabled: payload.enabled,
    };
    match state.storage.upsert_key(provider_id, record).await {
        Ok(saved) => Json(json!({ "status": "ok", "id": saved.id })).into_response(),
        Err(err) => err_response(err),
    }
}

pub async fn set_key_enabled(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<super::governance::EnabledPayload>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.set_key_enabled(id, payload.enabled).await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(err) => err_response(err),
    }
}

pub async fn delete_key(State(state): State<AdminState>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.delete_key(id).await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(err) => err_response(err),
    }
}
