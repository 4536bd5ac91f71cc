use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::Settings;
use crate::error::{GenerationError, ToolError};

/// Per-call knobs for a generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub temperature: f32,
    /// Overrides the client's generation timeout for this call.
    pub timeout: Option<Duration>,
    /// Ask the backend to constrain output to JSON.
    pub json_format: bool,
}

impl GenerateOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            timeout: None,
            json_format: false,
        }
    }
}

/// Anything that can turn `(model, prompt)` into text.
///
/// The router and the local tool backend only see this trait, so tests can
/// swap in a scripted generator.
#[async_trait]
pub trait Generate: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, GenerationError>;
}

/// Failures that can tell a flaky transport apart from a real answer.
pub trait Transient: Display {
    fn is_transport(&self) -> bool;
    fn kind(&self) -> &'static str;
}

impl Transient for GenerationError {
    fn is_transport(&self) -> bool {
        GenerationError::is_transport(self)
    }

    fn kind(&self) -> &'static str {
        GenerationError::kind(self)
    }
}

impl Transient for ToolError {
    fn is_transport(&self) -> bool {
        matches!(self, ToolError::Backend(e) if e.is_transport())
    }

    fn kind(&self) -> &'static str {
        ToolError::kind(self)
    }
}

/// Bounded retry of transport failures with linear backoff. Used for every
/// outbound hop: the generation backend and the tool server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            retries: settings.generation_retries,
            backoff: settings.retry_backoff,
        }
    }

    pub async fn run<T, E, F, Fut>(&self, mut call: F) -> Result<T, E>
    where
        E: Transient,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(e) if e.is_transport() && attempt < self.retries => {
                    attempt += 1;
                    let delay = self.backoff * attempt;
                    warn!("Transport failure ({}), retrying in {:?}: {}", e.kind(), delay, e);
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

// Wire shapes of the Ollama generate API
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    options: ModelOptions,
}

#[derive(Debug, Serialize)]
struct ModelOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// HTTP client for an Ollama-compatible `/api/generate` endpoint.
///
/// Built once at startup; the inner `reqwest::Client` pools connections and
/// is cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    generation_timeout: Duration,
    api_timeout: Duration,
    retry: RetryPolicy,
}

impl OllamaClient {
    pub fn new(settings: &Settings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.api_timeout)
            .build()?;

        info!(
            "Generation client ready. Backend: {} (timeout {:?})",
            settings.ollama_base_url, settings.generation_timeout
        );

        Ok(Self {
            client,
            base_url: settings.ollama_base_url.trim_end_matches('/').to_string(),
            generation_timeout: settings.generation_timeout,
            api_timeout: settings.api_timeout,
            retry: RetryPolicy::from_settings(settings),
        })
    }

    /// Lists the models the backend has pulled. Used as a startup check.
    pub async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(url)
            .timeout(self.api_timeout)
            .send()
            .await
            .map_err(|e| transport_error("*", e, self.api_timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::UpstreamStatus {
                model: "*".into(),
                status: status.as_u16(),
                body,
            });
        }

        let tags: TagsResponse = response.json().await.map_err(|e| GenerationError::Unexpected {
            model: "*".into(),
            message: format!("failed to parse tag list: {e}"),
        })?;
        Ok(tags.models.into_iter().map(|t| t.name).collect())
    }

    async fn generate_once(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, GenerationError> {
        let timeout = options.timeout.unwrap_or(self.generation_timeout);
        let payload = GenerateRequest {
            model,
            prompt,
            stream: false,
            format: options.json_format.then_some("json"),
            options: ModelOptions {
                temperature: options.temperature,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(model, e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::UpstreamStatus {
                model: model.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| transport_error(model, e, timeout))?;
        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| GenerationError::Unexpected {
                model: model.to_string(),
                message: format!("failed to parse generate response: {e}"),
            })?;

        Ok(parsed.response.trim().to_string())
    }
}

#[async_trait]
impl Generate for OllamaClient {
    #[instrument(skip_all, fields(model = %model))]
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, GenerationError> {
        if model.trim().is_empty() {
            return Err(GenerationError::Unexpected {
                model: String::new(),
                message: "model identifier must not be empty".into(),
            });
        }

        self.retry
            .run(|| self.generate_once(model, prompt, options))
            .await
    }
}

fn transport_error(model: &str, e: reqwest::Error, timeout: Duration) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout {
            model: model.to_string(),
            elapsed_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else if e.is_connect() || e.is_request() {
        GenerationError::Connection {
            model: model.to_string(),
            message: e.to_string(),
        }
    } else {
        GenerationError::Unexpected {
            model: model.to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_for(base_url: String) -> OllamaClient {
        let settings = Settings {
            ollama_base_url: base_url,
            generation_timeout: Duration::from_millis(300),
            retry_backoff: Duration::from_millis(10),
            ..Settings::default()
        };
        OllamaClient::new(&settings).unwrap()
    }

    #[tokio::test]
    async fn returns_trimmed_response_and_sends_payload() {
        let app = Router::new().route(
            "/api/generate",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], json!(false));
                assert_eq!(body["options"]["temperature"], json!(0.0));
                assert!(body.get("format").is_none());
                Json(json!({ "response": format!("  echo:{}\n", body["model"].as_str().unwrap()) }))
            }),
        );
        let client = client_for(serve(app).await);

        let text = client
            .generate("llama3", "hi", &GenerateOptions::with_temperature(0.0))
            .await
            .unwrap();
        assert_eq!(text, "echo:llama3");
    }

    #[tokio::test]
    async fn json_format_is_forwarded() {
        let app = Router::new().route(
            "/api/generate",
            post(|Json(body): Json<Value>| async move {
                Json(json!({ "response": body["format"].as_str().unwrap_or("missing") }))
            }),
        );
        let client = client_for(serve(app).await);
        let options = GenerateOptions {
            json_format: true,
            ..GenerateOptions::with_temperature(0.0)
        };

        assert_eq!(client.generate("m", "p", &options).await.unwrap(), "json");
    }

    #[tokio::test]
    async fn non_success_status_is_upstream_failure_and_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/api/generate",
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::NOT_FOUND, "model 'ghost' not found")
                }),
            )
            .with_state(calls.clone());
        let client = client_for(serve(app).await);

        let err = client
            .generate("ghost", "p", &GenerateOptions::with_temperature(0.7))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            GenerationError::UpstreamStatus {
                model: "ghost".into(),
                status: 404,
                body: "model 'ghost' not found".into(),
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_is_retried_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/api/generate",
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                    Json(json!({ "response": "late but fine" }))
                }),
            )
            .with_state(calls.clone());
        let client = client_for(serve(app).await);

        let text = client
            .generate("llama3", "p", &GenerateOptions::with_temperature(0.7))
            .await
            .unwrap();
        assert_eq!(text, "late but fine");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_is_reported_when_retries_are_exhausted() {
        let app = Router::new().route(
            "/api/generate",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({ "response": "never" }))
            }),
        );
        let client = client_for(serve(app).await);

        let err = client
            .generate("llama3", "p", &GenerateOptions::with_temperature(0.7))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Timeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn unreachable_backend_is_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = client_for(format!("http://{addr}"));

        let err = client
            .generate("llama3", "p", &GenerateOptions::with_temperature(0.7))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "connection");
    }

    #[tokio::test]
    async fn empty_model_is_rejected_before_network() {
        let client = client_for("http://127.0.0.1:9".into());
        let err = client
            .generate(" ", "p", &GenerateOptions::with_temperature(0.7))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unexpected");
    }

    #[tokio::test]
    async fn lists_models() {
        let app = Router::new().route(
            "/api/tags",
            axum::routing::get(|| async {
                Json(json!({ "models": [{ "name": "llama3:latest" }, { "name": "gpt-oss:20b" }] }))
            }),
        );
        let client = client_for(serve(app).await);
        assert_eq!(
            client.list_models().await.unwrap(),
            vec!["llama3:latest", "gpt-oss:20b"]
        );
    }
}
