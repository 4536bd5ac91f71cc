use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use switchboard_core::brain::Reply;
use switchboard_core::error::{ChatError, ErrorBody, IngestError};
use switchboard_core::ingest::IngestResult;

// Input: what the chat client sends us
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub msg: String,
}

// Output: the answer plus the model that produced it
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub status: String,
    pub llm_model_used: String,
    pub llm_response: String,
}

impl From<Reply> for ChatResponse {
    fn from(reply: Reply) -> Self {
        Self {
            status: "success".into(),
            llm_model_used: reply.model,
            llm_response: reply.text,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub original_filename: String,
    pub stored_filename: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

impl From<IngestResult> for UploadResponse {
    fn from(result: IngestResult) -> Self {
        Self {
            info: result.info(),
            file_url: result.file_url().map(str::to_string),
            original_filename: result.original_filename,
            stored_filename: result.stored_name,
            content_type: result.content_type,
        }
    }
}

/// Every failure a handler can surface, rendered as an [`ErrorBody`].
#[derive(Debug)]
pub enum ApiError {
    Chat(ChatError),
    Ingest(IngestError),
    BadRequest { kind: &'static str, detail: String },
}

impl ApiError {
    pub fn bad_request(kind: &'static str, detail: impl Into<String>) -> Self {
        Self::BadRequest {
            kind,
            detail: detail.into(),
        }
    }

    fn status(&self) -> StatusCode {
        let code = match self {
            Self::Chat(e) => e.status_code(),
            Self::Ingest(e) => e.status_code(),
            Self::BadRequest { .. } => 400,
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn body(&self) -> ErrorBody {
        match self {
            Self::Chat(e) => ErrorBody::from(e),
            Self::Ingest(e) => ErrorBody::new(e.kind(), e.to_string()),
            Self::BadRequest { kind, detail } => ErrorBody::new(*kind, detail.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self::Chat(e)
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        Self::Ingest(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::bad_request("malformed_body", e.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(e: MultipartRejection) -> Self {
        Self::bad_request("malformed_upload", e.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::bad_request("malformed_upload", e.body_text())
    }
}
