//! CRUD for component D's plugin chain configuration. Actually instantiating
//! a `Plugin` from this config at runtime is the owning binary's job; this
//! crate only persists the ordered, named, enabled/disabled config rows.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use relaygate_storage::PluginConfigRecord;
use serde::Deserialize;
use serde_json::json;

use crate::auth::require_admin;
use crate::AdminState;

#[derive(Debug, Deserialize)]
pub struct PluginPayload {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub order_index: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_true() -> bool {
    true
}

pub async fn list_plugins(State(state): State<AdminState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.load_snapshot().await {
        Ok(snap) => Json(snap.plugin_configs).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

pub async fn upsert_plugin(State(state): State<AdminState>, headers: HeaderMap, Json(payload): Json<PluginPayload>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let record = PluginConfigRecord {
        id: payload.id,
        name: payload.name,
        order_index: payload.order_index,
        enabled: payload.enabled,
        config: payload.config,
    };
    match state.storage.upsert_plugin_config(record).await {
        Ok(saved) => Json(json!({ "status": "ok", "id": saved.id })).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

pub async fn delete_plugin(State(state): State<AdminState>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.delete_plugin_config(id).await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
