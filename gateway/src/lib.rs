//! HTTP surface of the router: chat, uploads and the public upload
//! directory.

pub mod api;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::{header, HeaderValue},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{ApiError, ChatRequest, ChatResponse, UploadResponse};
use switchboard_core::brain::Brain;
use switchboard_core::ingest::Ingestor;

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

// Application State: built once in main, read-only afterwards
#[derive(Clone)]
pub struct AppState {
    pub brain: Arc<Brain>,
    pub ingestor: Arc<Ingestor>,
    pub static_dir: PathBuf,
    pub max_upload_bytes: u64,
}

pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD))
        .unwrap_or(usize::MAX);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Uploads are client content: never sniffed, only images render inline
    let static_files: Router<AppState> = Router::new()
        .nest_service("/static", ServeDir::new(&state.static_dir))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_DISPOSITION,
            attachment_unless_image,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/chat", post(chat))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(body_limit)),
        )
        .merge(static_files)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn attachment_unless_image(response: &Response) -> Option<HeaderValue> {
    let inline = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("image/"));
    (!inline && response.status().is_success()).then(|| HeaderValue::from_static("attachment"))
}

// --- HANDLERS ---

async fn health_check() -> &'static str {
    "Switchboard Gateway: Operational"
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(payload) = payload?;
    info!("Chat request received ({} bytes)", payload.msg.len());

    let reply = state.brain.handle(&payload.msg).await?;
    info!("Answered with model '{}' via {:?}", reply.model, reply.route);
    Ok(Json(reply.into()))
}

async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        info!("Receiving upload '{}'", filename);

        let result = state.ingestor.ingest(&filename, Box::pin(field)).await?;
        return Ok(Json(result.into()));
    }

    Err(ApiError::bad_request(
        "missing_file",
        "multipart field 'file' is required",
    ))
}
