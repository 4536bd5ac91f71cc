//! Tool server: executes registered tools on behalf of a remote gateway.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use switchboard_core::error::{ErrorBody, ToolError};
use switchboard_core::registry::ToolRecord;
use switchboard_core::runtime::{Runtime, ToolCallReply, ToolCallRequest};

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/tools", get(list_tools))
        .route("/tools/{name}", post(call_tool))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Tool failures rendered with the gateway's error body.
#[derive(Debug)]
pub enum CallError {
    Tool(ToolError),
    MalformedBody(String),
}

impl From<ToolError> for CallError {
    fn from(e: ToolError) -> Self {
        Self::Tool(e)
    }
}

impl From<JsonRejection> for CallError {
    fn from(e: JsonRejection) -> Self {
        Self::MalformedBody(e.body_text())
    }
}

impl IntoResponse for CallError {
    fn into_response(self) -> Response {
        let (code, body) = match self {
            Self::Tool(e) => (e.status_code(), ErrorBody::from(&e)),
            Self::MalformedBody(detail) => (400, ErrorBody::new("malformed_body", detail)),
        };
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

// --- HANDLERS ---

async fn health_check() -> &'static str {
    "Switchboard Tools: Operational"
}

async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolRecord>> {
    Json(state.runtime.registry().tools().to_vec())
}

async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: Result<Json<ToolCallRequest>, JsonRejection>,
) -> Result<Json<ToolCallReply>, CallError> {
    let Json(request) = payload?;
    info!("Tool call '{}' with {} arguments", name, request.arguments.len());

    match state.runtime.invoke(&name, &request.arguments).await {
        Ok(output) => {
            info!("Tool Execution Success. Output size: {} bytes", output.content.len());
            Ok(Json(ToolCallReply {
                content: output.content,
                model: output.model,
            }))
        }
        Err(e) if e.is_client_error() => {
            warn!("Rejected tool call: {}", e);
            Err(e.into())
        }
        Err(e) => {
            error!("Tool Execution Failed: {}", e);
            Err(e.into())
        }
    }
}
