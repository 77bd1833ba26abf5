//! CRUD for component E's hierarchy (spec §3): budgets, rate limits,
//! teams, customers, virtual keys. Every write goes through storage first,
//! then republishes the affected entity into `GovernanceSnapshot` so the hot
//! path sees it on the very next request — the same
//! write-then-republish shape the teacher uses for its provider pools in
//! `apps/gproxy/src/admin.rs::refresh_provider_pool`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relaygate_core::{Budget, Customer, GovernanceSnapshot, RateLimit, Team, VirtualKey};
use relaygate_storage::{BudgetRecord, CustomerRecord, RateLimitRecord, Storage, StorageResult, TeamRecord, VirtualKeyRecord};
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::auth::require_admin;
use crate::AdminState;

fn budget_from_record(r: &BudgetRecord) -> Budget {
    Budget {
        id: r.id.clone(),
        max_limit: r.max_limit,
        current_usage: r.current_usage,
        reset_duration: time::Duration::seconds(r.reset_duration_secs),
        last_reset: r.last_reset,
    }
}

fn rate_limit_from_record(r: &RateLimitRecord) -> RateLimit {
    RateLimit {
        id: r.id.clone(),
        request_max: r.request_max.map(|v| v as u64),
        request_current: r.request_current as u64,
        request_reset_duration: time::Duration::seconds(r.request_reset_duration_secs),
        request_last_reset: r.request_last_reset,
        token_max: r.token_max.map(|v| v as u64),
        token_current: r.token_current as u64,
        token_reset_duration: time::Duration::seconds(r.token_reset_duration_secs),
        token_last_reset: r.token_last_reset,
    }
}

fn team_from_record(r: &TeamRecord) -> Team {
    Team { id: r.id.clone(), customer_id: r.customer_id.clone(), budget_id: r.budget_id.clone() }
}

fn customer_from_record(r: &CustomerRecord) -> Customer {
    Customer { id: r.id.clone(), budget_id: r.budget_id.clone() }
}

fn virtual_key_from_record(r: &VirtualKeyRecord) -> VirtualKey {
    VirtualKey {
        id: r.id.clone(),
        value: r.value.clone(),
        team_id: r.team_id.clone(),
        customer_id: r.customer_id.clone(),
        budget_id: r.budget_id.clone(),
        rate_limit_id: r.rate_limit_id.clone(),
        allowed_models: r.allowed_models.clone(),
        provider_overrides: r.provider_overrides.clone(),
    }
}

/// Reloads everything from storage and atomically replaces the whole
/// snapshot — used at startup and by `/reload`.
pub async fn rebuild_snapshot(storage: &dyn Storage, snapshot: &GovernanceSnapshot) -> StorageResult<()> {
    let loaded = storage.load_snapshot().await?;
    let virtual_keys = loaded.virtual_keys.iter().filter(|vk| vk.enabled).map(virtual_key_from_record).collect();
    let teams = loaded.teams.iter().map(team_from_record).collect();
    let customers = loaded.customers.iter().map(customer_from_record).collect();
    let budgets = loaded.budgets.iter().map(budget_from_record).collect();
    let rate_limits = loaded.rate_limits.iter().map(rate_limit_from_record).collect();
    snapshot.replace_all(virtual_keys, teams, customers, budgets, rate_limits);
    Ok(())
}

fn err_response(err: relaygate_storage::StorageError) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

#[derive(Debug, Deserialize)]
pub struct BudgetPayload {
    pub id: String,
    pub max_limit: f64,
    #[serde(default)]
    pub current_usage: f64,
    pub reset_duration_secs: i64,
}

pub async fn list_budgets(State(state): State<AdminState>, headers: axum::http::HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.load_snapshot().await {
        Ok(snap) => Json(snap.budgets).into_response(),
        Err(err) => err_response(err),
    }
}

pub async fn upsert_budget(State(state): State<AdminState>, headers: axum::http::HeaderMap, Json(payload): Json<BudgetPayload>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let now = OffsetDateTime::now_utc();
    let record = BudgetRecord {
        id: payload.id,
        max_limit: payload.max_limit,
        current_usage: payload.current_usage,
        reset_duration_secs: payload.reset_duration_secs,
        last_reset: now,
    };
    match state.storage.upsert_budget(record).await {
        Ok(saved) => {
            state.snapshot.put_budget(budget_from_record(&saved));
            Json(json!({ "status": "ok" })).into_response()
        }
        Err(err) => err_response(err),
    }
}

pub async fn delete_budget(State(state): State<AdminState>, headers: axum::http::HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.delete_budget(&id).await {
        Ok(()) => {
            state.snapshot.remove_budget(&id);
            Json(json!({ "status": "ok" })).into_response()
        }
        Err(err) => err_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct RateLimitPayload {
    pub id: String,
    pub request_max: Option<i64>,
    pub request_reset_duration_secs: i64,
    pub token_max: Option<i64>,
    pub token_reset_duration_secs: i64,
}

pub async fn list_rate_limits(State(state): State<AdminState>, headers: axum::http::HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.load_snapshot().await {
        Ok(snap) => Json(snap.rate_limits).into_response(),
        Err(err) => err_response(err),
    }
}

pub async fn upsert_rate_limit(
    State(state): State<AdminState>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<RateLimitPayload>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let now = OffsetDateTime::now_utc();
    let record = RateLimitRecord {
        id: payload.id,
        request_max: payload.request_max,
        request_current: 0,
        request_reset_duration_secs: payload.request_reset_duration_secs,
        request_last_reset: now,
        token_max: payload.token_max,
        token_current: 0,
        token_reset_duration_secs: payload.token_reset_duration_secs,
        token_last_reset: now,
    };
    match state.storage.upsert_rate_limit(record).await {
        Ok(saved) => {
            state.snapshot.put_rate_limit(rate_limit_from_record(&saved));
            Json(json!({ "status": "ok" })).into_response()
        }
        Err(err) => err_response(err),
    }
}

pub async fn delete_rate_limit(State(state): State<AdminState>, headers: axum::http::HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.delete_rate_limit(&id).await {
        Ok(()) => {
            state.snapshot.remove_rate_limit(&id);
            Json(json!({ "status": "ok" })).into_response()
        }
        Err(err) => err_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct TeamPayload {
    pub id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub budget_id: Option<String>,
}

pub async fn list_teams(State(state): State<AdminState>, headers: axum::http::HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.load_snapshot().await {
        Ok(snap) => Json(snap.teams).into_response(),
        Err(err) => err_response(err),
    }
}

pub async fn upsert_team(State(state): State<AdminState>, headers: axum::http::HeaderMap, Json(payload): Json<TeamPayload>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let record = TeamRecord { id: payload.id, customer_id: payload.customer_id, budget_id: payload.budget_id };
    match state.storage.upsert_team(record).await {
        Ok(saved) => {
            state.snapshot.put_team(team_from_record(&saved));
            Json(json!({ "status": "ok" })).into_response()
        }
        Err(err) => err_response(err),
    }
}

pub async fn delete_team(State(state): State<AdminState>, headers: axum::http::HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.delete_team(&id).await {
        Ok(()) => {
            state.snapshot.remove_team(&id);
            Json(json!({ "status": "ok" })).into_response()
        }
        Err(err) => err_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct CustomerPayload {
    pub id: String,
    #[serde(default)]
    pub budget_id: Option<String>,
}

pub async fn list_customers(State(state): State<AdminState>, headers: axum::http::HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.load_snapshot().await {
        Ok(snap) => Json(snap.customers).into_response(),
        Err(err) => err_response(err),
    }
}

pub async fn upsert_customer(State(state): State<AdminState>, headers: axum::http::HeaderMap, Json(payload): Json<CustomerPayload>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let record = CustomerRecord { id: payload.id, budget_id: payload.budget_id };
    match state.storage.upsert_customer(record).await {
        Ok(saved) => {
            state.snapshot.put_customer(customer_from_record(&saved));
            Json(json!({ "status": "ok" })).into_response()
        }
        Err(err) => err_response(err),
    }
}

pub async fn delete_customer(State(state): State<AdminState>, headers: axum::http::HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.delete_customer(&id).await {
        Ok(()) => {
            state.snapshot.remove_customer(&id);
            Json(json!({ "status": "ok" })).into_response()
        }
        Err(err) => err_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct VirtualKeyPayload {
    pub id: String,
    pub value: String,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub budget_id: Option<String>,
    #[serde(default)]
    pub rate_limit_id: Option<String>,
    #[serde(default)]
    pub allowed_models: Vec<String>,
    #[serde(default)]
    pub provider_overrides: serde_json::Value,
}

pub async fn list_virtual_keys(State(state): State<AdminState>, headers: axum::http::HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    match state.storage.load_snapshot().await {
        // The bearer value is a secret; admin listing still needs it to
        // manage the row, but callers embedding this in UI logs should
        // redact it themselves.
        Ok(snap) => Json(snap.virtual_keys).into_response(),
        Err(err) => err_response(err),
    }
}

pub async fn upsert_virtual_key(
    State(state): State<AdminState>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<VirtualKeyPayload>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let record = VirtualKeyRecord {
        id: payload.id,
        value: payload.value,
        team_id: payload.team_id,
        customer_id: payload.customer_id,
        budget_id: payload.budget_id,
        rate_limit_id: payload.rate_limit_id,
        allowed_models: payload.allowed_models,
        provider_overrides: payload.provider_overrides,
        enabled: true,
    };
    match state.storage.upsert_virtual_key(record).await {
        Ok(saved) => {
            state.snapshot.put_virtual_key(virtual_key_from_record(&saved));
            Json(json!({ "status": "ok" })).into_response()
        }
        Err(err) => err_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct EnabledPayload {
    pub enabled: bool,
}

/// Disabling pulls the key out of the hot-path snapshot immediately;
/// re-enabling reloads the full row from storage so the republished entry
/// carries whatever fields were last saved rather than a stale copy.
pub async fn set_virtual_key_enabled(
    State(state): State<AdminState>,
    headers: axum::http::HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<EnabledPayload>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    if let Err(err) = state.storage.set_virtual_key_enabled(&id, payload.enabled).await {
        return err_response(err);
    }
    let snap = match state.storage.load_snapshot().await {
        Ok(snap) => snap,
        Err(err) => return err_response(err),
    };
    let Some(record) = snap.virtual_keys.into_iter().find(|vk| vk.id == id) else {
        return (StatusCode::NOT_FOUND, "virtual key not found").into_response();
    };
    if payload.enabled {
        state.snapshot.put_virtual_key(virtual_key_from_record(&record));
    } else {
        state.snapshot.remove_virtual_key(&record.value);
    }
    Json(json!({ "status": "ok" })).into_response()
}

pub async fn delete_virtual_key(State(state): State<AdminState>, headers: axum::http::HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let snap = match state.storage.load_snapshot().await {
        Ok(snap) => snap,
        Err(err) => return err_response(err),
    };
    let value = snap.virtual_keys.iter().find(|vk| vk.id == id).map(|vk| vk.value.clone());
    match state.storage.delete_virtual_key(&id).await {
        Ok(()) => {
            if let Some(value) = value {
                state.snapshot.remove_virtual_key(&value);
            }
            Json(json!({ "status": "ok" })).into_response()
        }
        Err(err) => err_response(err),
    }
}
