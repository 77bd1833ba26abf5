//! `/health`, `/config`, `/reload` — the three routes that touch process-wide
//! state rather than one entity. Grounded on the teacher's `admin_health`/
//! `get_config`/`put_config`/`reload_snapshot` handlers, adapted to this
//! gateway's single merged `GlobalConfig` (spec's CLI > ENV > DB precedence)
//! and its `GovernanceSnapshot` cache instead of gproxy's auth/pool state.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use relaygate_common::{GlobalConfigPatch, hash_admin_key};
use relaygate_storage::GlobalConfigRecord;
use serde::Deserialize;
use serde_json::json;

use crate::auth::require_admin;
use crate::governance::rebuild_snapshot;
use crate::AdminState;

pub async fn health(State(state): State<AdminState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.load_global_config().await {
        Ok(_) => Json(json!({ "status": "ok" })).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, format!("storage error: {err}")).into_response(),
    }
}

pub async fn get_config(State(state): State<AdminState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.load_global_config().await {
        Ok(Some(mut cfg)) => {
            cfg.admin_key_hash = "redacted".to_string();
            Json(cfg).into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, "global config not set").into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ConfigPatchPayload {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Plaintext; hashed before it ever reaches storage or `AdminState`.
    pub admin_key: Option<String>,
    pub proxy: Option<String>,
    pub dsn: Option<String>,
    pub event_redact_sensitive: Option<bool>,
}

pub async fn put_config(State(state): State<AdminState>, headers: HeaderMap, Json(payload): Json<ConfigPatchPayload>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }

    let current = match state.storage.load_global_config().await {
        Ok(Some(cfg)) => GlobalConfigPatch {
            host: Some(cfg.host),
            port: Some(cfg.port),
            admin_key_hash: Some(cfg.admin_key_hash),
            proxy: cfg.proxy,
            dsn: Some(cfg.dsn),
            event_redact_sensitive: Some(cfg.event_redact_sensitive),
        },
        Ok(None) => GlobalConfigPatch::default(),
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };

    let mut merged = current;
    merged.overlay(GlobalConfigPatch {
        host: payload.host,
        port: payload.port,
        admin_key_hash: payload.admin_key.as_deref().map(hash_admin_key),
        proxy: payload.proxy,
        dsn: payload.dsn,
        event_redact_sensitive: payload.event_redact_sensitive,
    });

    let config = match merged.into_config() {
        Ok(config) => config,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    let record = GlobalConfigRecord {
        host: config.host,
        port: config.port,
        admin_key_hash: config.admin_key_hash.clone(),
        proxy: config.proxy,
        dsn: config.dsn,
        event_redact_sensitive: config.event_redact_sensitive,
    };

    if let Err(err) = state.storage.upsert_global_config(record).await {
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }
    state.set_admin_key_hash(config.admin_key_hash);

    Json(json!({ "status": "ok" })).into_response()
}

pub async fn reload_snapshot(State(state): State<AdminState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match rebuild_snapshot(state.storage.as_ref(), &state.snapshot).await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
