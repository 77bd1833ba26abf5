//! `/v1/mcp/tool/execute` (spec §6): a thin handler over an external
//! collaborator. Actually running an MCP tool — spawning the subprocess,
//! speaking the MCP wire protocol over stdio — is out of scope here; this
//! module only carries the seam the route dispatches through.

use async_trait::async_trait;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::RouterState;

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool: &str, arguments: Value) -> Result<Value, String>;
}

#[derive(Debug, Deserialize)]
pub struct ToolExecuteRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

pub async fn execute_tool(State(state): State<RouterState>, Json(body): Json<ToolExecuteRequest>) -> Response {
    let Some(executor) = &state.tool_executor else {
        return (StatusCode::NOT_IMPLEMENTED, "no tool executor configured for this deployment").into_response();
    };
    match executor.execute(&body.tool, body.arguments).await {
        Ok(result) => Json(json!({ "result": result })).into_response(),
        Err(message) => (StatusCode::BAD_GATEWAY, Json(json!({ "error": message }))).into_response(),
    }
}
