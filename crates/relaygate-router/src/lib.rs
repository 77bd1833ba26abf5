//! Component I: ingress dialect adapters wired into an axum router (spec
//! §4.I / §6). Every handler decodes its dialect's wire body into a
//! `GatewayRequest`, extracts the caller's bearer token, and calls into
//! [`GatewayEngine`] — the same entry point regardless of which wire shape
//! the client spoke. Grounded on the teacher's `gproxy-router::proxy`
//! per-dialect handler shape and its `to_axum_response`/SSE-heartbeat
//! pattern, generalized from "one handler per provider" to "one handler
//! per ingress dialect", since providers are selected by the
//! provider-qualified model string rather than by URL prefix here.

mod auth;
mod mcp;
mod sse;

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use relaygate_core::GatewayEngine;
use relaygate_core::engine::DispatchRequest;
use relaygate_protocol::dialect::{self, DialectKind};
use relaygate_protocol::GatewayError;
use relaygate_provider_core::DownstreamContext;
use uuid::Uuid;

pub use auth::extract_bearer;
pub use mcp::ToolExecutor;

#[derive(Clone)]
pub struct RouterState {
    pub engine: Arc<GatewayEngine>,
    pub tool_executor: Option<Arc<dyn ToolExecutor>>,
}

/// Builds the northbound router: one pair of routes per ingress dialect,
/// plus the MCP tool-execute seam. No admin surface lives here — that's
/// `relaygate-admin`, nested separately by the binary that wires both up.
pub fn gateway_router(engine: Arc<GatewayEngine>, tool_executor: Option<Arc<dyn ToolExecutor>>) -> Router {
    let state = RouterState { engine, tool_executor };

    Router::new()
        .route("/v1/chat/completions", post(openai_chat_completions))
        .route("/v1/messages", post(anthropic_messages))
        .route("/litellm/v1/chat/completions", post(litellm_chat_completions))
        .route("/v1beta/models/{*model}", post(gemini_generate_content))
        .route("/v1/mcp/tool/execute", post(mcp::execute_tool))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn openai_chat_completions(State(state): State<RouterState>, headers: HeaderMap, RawQuery(query): RawQuery, body: Bytes) -> Response {
    handle_dialect(state, DialectKind::OpenAi, &headers, query.as_deref(), None, None, body).await
}

async fn litellm_chat_completions(State(state): State<RouterState>, headers: HeaderMap, RawQuery(query): RawQuery, body: Bytes) -> Response {
    handle_dialect(state, DialectKind::LiteLlm, &headers, query.as_deref(), None, None, body).await
}

async fn anthropic_messages(State(state): State<RouterState>, headers: HeaderMap, RawQuery(query): RawQuery, body: Bytes) -> Response {
    handle_dialect(state, DialectKind::Anthropic, &headers, query.as_deref(), None, None, body).await
}

/// Gemini's wire convention puts the model (and the streaming/non-streaming
/// action) in the URL path rather than the body, e.g.
/// `/v1beta/models/google/gemini-1.5-pro:streamGenerateContent`. The path
/// segment before the colon must already be provider-qualified the same way
/// every other dialect's `model` field is.
async fn gemini_generate_content(
    State(state): State<RouterState>,
    Path(model_action): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let (model, action) = split_model_action(&model_action);
    let stream_override = match action {
        "streamGenerateContent" => Some(true),
        "generateContent" => Some(false),
        _ => None,
    };
    handle_dialect(state, DialectKind::Gemini, &headers, query.as_deref(), Some(model.to_string()), stream_override, body).await
}

fn split_model_action(spec: &str) -> (&str, &str) {
    match spec.rsplit_once(':') {
        Some((model, action)) => (model, action),
        None => (spec, ""),
    }
}

async fn handle_dialect(
    state: RouterState,
    kind: DialectKind,
    headers: &HeaderMap,
    query: Option<&str>,
    model_override: Option<String>,
    stream_override: Option<bool>,
    body: Bytes,
) -> Response {
    let trace_id = Uuid::now_v7().to_string();
    let bearer = auth::extract_bearer(headers, query);

    let mut req = match dialect::decode_request(kind, &body) {
        Ok(req) => req,
        Err(err) => return error_response(kind, &err),
    };
    if let Some(model) = model_override {
        req.model = model;
    }
    if let Some(stream) = stream_override {
        req.stream = stream;
    }

    let ctx = DownstreamContext { trace_id, virtual_key_id: None, team_id: None, customer_id: None, cancel: Default::default() };
    let is_stream = req.stream;
    let model = req.model.clone();
    let call = DispatchRequest { req, bearer, fallback_models: Vec::new(), ctx };

    if is_stream {
        match state.engine.dispatch_streaming(call).await {
            Ok(stream) => sse::stream_response(kind, model, stream).into_response(),
            Err(err) => error_response(kind, &err),
        }
    } else {
        match state.engine.dispatch_unary(call).await {
            Ok(resp) => Json(dialect::encode_response(kind, &resp)).into_response(),
            Err(err) => error_response(kind, &err),
        }
    }
}

fn error_response(kind: DialectKind, err: &GatewayError) -> Response {
    let status = StatusCode::from_u16(err.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(dialect::encode_error(kind, err))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_model_and_action() {
        assert_eq!(split_model_action("google/gemini-1.5-pro:streamGenerateContent"), ("google/gemini-1.5-pro", "streamGenerateContent"));
        assert_eq!(split_model_action("google/gemini-1.5-pro"), ("google/gemini-1.5-pro", ""));
    }
}
