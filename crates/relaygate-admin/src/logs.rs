//! Read-only access to the append-only traffic/event log and usage
//! aggregates (spec §3's persistent store, §6's admin surface). Mirrors the
//! teacher's `list_downstream_logs`/`list_upstream_logs` paginated-query
//! shape, generalized to the single `LogRecordKind`-tagged log this gateway
//! keeps instead of two separate tables.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use relaygate_storage::{LogQueryFilter, LogRecordKind, UsageAggregateFilter};
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::auth::require_admin;
use crate::AdminState;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub kind: Option<String>,
    pub trace_id: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

fn parse_kind(value: &str) -> Option<LogRecordKind> {
    match value {
        "downstream" => Some(LogRecordKind::Downstream),
        "upstream" => Some(LogRecordKind::Upstream),
        "operational" => Some(LogRecordKind::Operational),
        _ => None,
    }
}

fn parse_timestamp(value: &str) -> Result<OffsetDateTime, Response> {
    if let Ok(ts) = value.parse::<i64>() {
        return OffsetDateTime::from_unix_timestamp(ts)
            .map_err(|err| (StatusCode::BAD_REQUEST, format!("invalid unix timestamp: {err}")).into_response());
    }
    OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("invalid timestamp (expected unix seconds or RFC3339): {err}")).into_response())
}

pub async fn query_logs(State(state): State<AdminState>, headers: HeaderMap, Query(query): Query<LogsQuery>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let kind = match query.kind.as_deref() {
        Some(raw) => match parse_kind(raw) {
            Some(kind) => Some(kind),
            None => return (StatusCode::BAD_REQUEST, "unknown log kind").into_response(),
        },
        None => None,
    };
    let since = match query.since.as_deref() {
        Some(raw) => match parse_timestamp(raw) {
            Ok(ts) => Some(ts),
            Err(resp) => return resp,
        },
        None => None,
    };
    let filter = LogQueryFilter { kind, trace_id: query.trace_id, since, limit: query.limit.unwrap_or(100).min(1000), offset: query.offset.unwrap_or(0) };
    match state.storage.query_logs(filter).await {
        Ok(result) => Json(json!({ "total": result.total, "records": result.records })).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub virtual_key_id: Option<String>,
    pub team_id: Option<String>,
    pub customer_id: Option<String>,
    pub since: Option<String>,
}

pub async fn aggregate_usage(State(state): State<AdminState>, headers: HeaderMap, Query(query): Query<UsageQuery>) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let since = match query.since.as_deref() {
        Some(raw) => match parse_timestamp(raw) {
            Ok(ts) => Some(ts),
            Err(resp) => return resp,
        },
        None => None,
    };
    let filter = UsageAggregateFilter { virtual_key_id: query.virtual_key_id, team_id: query.team_id, customer_id: query.customer_id, since };
    match state.storage.aggregate_usage(filter).await {
        Ok(usage) => Json(usage).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
