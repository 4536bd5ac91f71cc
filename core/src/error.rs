//! Error types shared by the router, the tool executor and the ingestion
//! pipeline.
//!
//! Each stage keeps its own enum so callers can branch on the failure kind
//! instead of matching on message strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single call to the text-generation backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// The backend could not be reached.
    #[error("error connecting to generation backend for '{model}': {message}")]
    Connection { model: String, message: String },

    /// The backend answered with a non-success status.
    #[error("generation backend returned {status} for '{model}': {body}")]
    UpstreamStatus {
        model: String,
        status: u16,
        body: String,
    },

    /// The call exceeded its wall-clock budget.
    #[error("generation call for '{model}' timed out after {elapsed_ms} ms")]
    Timeout { model: String, elapsed_ms: u64 },

    /// Anything else: bad payloads, invalid input, client build errors.
    #[error("unexpected error calling generation backend for '{model}': {message}")]
    Unexpected { model: String, message: String },
}

impl GenerationError {
    /// Transport failures are the only ones worth retrying.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Short machine-readable kind, used in error payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::UpstreamStatus { .. } => "upstream_status",
            Self::Timeout { .. } => "timeout",
            Self::Unexpected { .. } => "unexpected",
        }
    }

    /// HTTP status a server reports for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UpstreamStatus { .. } => 502,
            Self::Timeout { .. } => 504,
            Self::Connection { .. } | Self::Unexpected { .. } => 500,
        }
    }
}

/// Failure of a tool invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unexpected tool '{0}': not present in the registry")]
    UnknownTool(String),

    #[error("tool '{tool}' is missing required argument '{argument}'")]
    MissingArgument { tool: String, argument: String },

    #[error(transparent)]
    Backend(#[from] GenerationError),
}

impl ToolError {
    /// Contract failures are the caller's fault and map to 400.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::UnknownTool(_) | Self::MissingArgument { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::MissingArgument { .. } => "missing_argument",
            Self::Backend(e) => e.kind(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Backend(e) => e.status_code(),
            _ => 400,
        }
    }
}

/// Failure of a whole chat turn: either the routing call or the tool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("routing failed: {0}")]
    Routing(#[source] GenerationError),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl ChatError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Tool(e) if e.is_client_error())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Routing(e) => e.kind(),
            Self::Tool(e) => e.kind(),
        }
    }

    /// The backend failure underneath, if any.
    pub fn generation_error(&self) -> Option<&GenerationError> {
        match self {
            Self::Routing(e) | Self::Tool(ToolError::Backend(e)) => Some(e),
            Self::Tool(_) => None,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Routing(e) => e.status_code(),
            Self::Tool(e) => e.status_code(),
        }
    }
}

/// Error payload shared by the gateway and the tool server:
/// `{ "status": "error", "kind": ..., "detail": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub kind: String,
    pub detail: String,
    /// Name of the offending argument for `missing_argument`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
}

impl ErrorBody {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            kind: kind.into(),
            detail: detail.into(),
            argument: None,
        }
    }

    /// Recovers a contract failure reported by a tool server, so it stays a
    /// client error on this side of the hop.
    pub fn into_tool_error(self, tool: &str) -> Option<ToolError> {
        match self.kind.as_str() {
            "unknown_tool" => Some(ToolError::UnknownTool(tool.to_string())),
            "missing_argument" => Some(ToolError::MissingArgument {
                tool: tool.to_string(),
                argument: self.argument.unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

impl From<&ToolError> for ErrorBody {
    fn from(e: &ToolError) -> Self {
        let mut body = Self::new(e.kind(), e.to_string());
        if let ToolError::MissingArgument { argument, .. } = e {
            body.argument = Some(argument.clone());
        }
        body
    }
}

impl From<&ChatError> for ErrorBody {
    fn from(e: &ChatError) -> Self {
        match e {
            ChatError::Tool(tool) => tool.into(),
            ChatError::Routing(_) => Self::new(e.kind(), e.to_string()),
        }
    }
}

/// Failure while loading a tool catalog.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry at '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse registry: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate tool '{0}' in registry")]
    Duplicate(String),
}

/// Failure of the PDF/OCR extractor for a whole document.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read PDF: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse PDF: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("PDF extraction task failed: {0}")]
    Task(String),
}

/// Failure of text recognition for a single image.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("image encoding '{0}' is not supported for recognition")]
    UnsupportedImage(String),

    #[error("failed to prepare image for recognition: {0}")]
    Io(#[from] std::io::Error),

    #[error("recognizer exited with {status}: {stderr}")]
    Recognizer { status: String, stderr: String },

    #[error("recognizer timed out after {0} s")]
    Timeout(u64),
}

/// Failure of the upload pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to store upload: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read upload stream: {0}")]
    Stream(String),

    #[error("failed to persist upload: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
}

impl IngestError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) | Self::Persist(_) => "io",
            Self::Stream(_) => "upload_stream",
            Self::TooLarge { .. } => "too_large",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Io(_) | Self::Persist(_) => 500,
            Self::Stream(_) => 400,
            Self::TooLarge { .. } => 413,
        }
    }
}

/// Failure while loading settings from the environment.
#[derive(Debug, Error)]
#[error("invalid value for {key}: {message}")]
pub struct ConfigError {
    pub key: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kinds_are_retryable() {
        let conn = GenerationError::Connection {
            model: "llama3".into(),
            message: "refused".into(),
        };
        let timeout = GenerationError::Timeout {
            model: "llama3".into(),
            elapsed_ms: 10,
        };
        let status = GenerationError::UpstreamStatus {
            model: "llama3".into(),
            status: 404,
            body: "model not found".into(),
        };
        assert!(conn.is_transport());
        assert!(timeout.is_transport());
        assert!(!status.is_transport());
    }

    #[test]
    fn tool_errors_split_client_and_backend() {
        assert!(ToolError::UnknownTool("x".into()).is_client_error());
        assert!(ToolError::MissingArgument {
            tool: "call_llm_tool".into(),
            argument: "prompt".into()
        }
        .is_client_error());

        let backend = ToolError::from(GenerationError::Unexpected {
            model: "m".into(),
            message: "boom".into(),
        });
        assert!(!backend.is_client_error());
        assert_eq!(backend.kind(), "unexpected");
    }

    #[test]
    fn status_codes_follow_failure_kind() {
        let routing = |e| ChatError::Routing(e);
        assert_eq!(
            routing(GenerationError::UpstreamStatus {
                model: "gpt-oss:20b".into(),
                status: 404,
                body: String::new(),
            })
            .status_code(),
            502
        );
        assert_eq!(
            routing(GenerationError::Timeout {
                model: "gpt-oss:20b".into(),
                elapsed_ms: 1,
            })
            .status_code(),
            504
        );
        assert_eq!(
            routing(GenerationError::Connection {
                model: "gpt-oss:20b".into(),
                message: "refused".into(),
            })
            .status_code(),
            500
        );
        assert_eq!(
            ChatError::from(ToolError::UnknownTool("weather".into())).status_code(),
            400
        );
        assert_eq!(IngestError::TooLarge { limit: 1 }.status_code(), 413);
    }

    #[test]
    fn error_body_is_tagged() {
        let body = serde_json::to_value(ErrorBody::new("unknown_tool", "no such tool")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"status": "error", "kind": "unknown_tool", "detail": "no such tool"})
        );
    }

    #[test]
    fn contract_failures_survive_the_wire() {
        let missing = ToolError::MissingArgument {
            tool: "call_llm_tool".into(),
            argument: "model_name".into(),
        };
        let body: ErrorBody =
            serde_json::from_str(&serde_json::to_string(&ErrorBody::from(&missing)).unwrap()).unwrap();
        assert_eq!(body.into_tool_error("call_llm_tool"), Some(missing));

        let unknown = ErrorBody::from(&ToolError::UnknownTool("weather".into()));
        assert_eq!(
            unknown.into_tool_error("weather"),
            Some(ToolError::UnknownTool("weather".into()))
        );

        assert_eq!(ErrorBody::new("malformed_body", "eof").into_tool_error("x"), None);
    }

    #[test]
    fn messages_carry_cause() {
        let err = ToolError::MissingArgument {
            tool: "call_llm_tool".into(),
            argument: "model_name".into(),
        };
        assert_eq!(
            err.to_string(),
            "tool 'call_llm_tool' is missing required argument 'model_name'"
        );
    }
}
