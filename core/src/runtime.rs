use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::Settings;
use crate::error::{ErrorBody, GenerationError, ToolError};
use crate::llm::{Generate, GenerateOptions, RetryPolicy};
use crate::registry::{Handler, Registry, ToolRecord};

/// Tool arguments as extracted from the router's decision.
pub type ToolArgs = BTreeMap<String, String>;

/// Result of a tool run, disclosing which concrete model produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool: String,
    pub model: String,
    pub content: String,
}

/// Body of `POST /tools/{name}` on the tool server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallRequest {
    #[serde(default)]
    pub arguments: ToolArgs,
}

/// Success body of `POST /tools/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallReply {
    pub content: String,
    pub model: String,
}

/// Where a validated tool call is actually carried out.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn dispatch(&self, tool: &ToolRecord, args: &ToolArgs) -> Result<ToolOutput, ToolError>;
}

/// Runs handlers in-process against a generator.
pub struct LocalBackend {
    generator: Arc<dyn Generate>,
    temperature: f32,
}

impl LocalBackend {
    pub fn new(generator: Arc<dyn Generate>, temperature: f32) -> Self {
        Self {
            generator,
            temperature,
        }
    }
}

#[async_trait]
impl ToolBackend for LocalBackend {
    async fn dispatch(&self, tool: &ToolRecord, args: &ToolArgs) -> Result<ToolOutput, ToolError> {
        match tool.handler {
            Handler::InvokeModel => {
                let model = require(tool, args, "model_name")?;
                let prompt = require(tool, args, "prompt")?;

                info!("Tool '{}' executing on model '{}'", tool.name, model);
                let content = self
                    .generator
                    .generate(model, prompt, &GenerateOptions::with_temperature(self.temperature))
                    .await?;

                Ok(ToolOutput {
                    tool: tool.name.clone(),
                    model: model.to_string(),
                    content,
                })
            }
        }
    }
}

/// Calls the tool server over HTTP: `POST {base}/tools/{name}`.
pub struct RemoteBackend {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl RemoteBackend {
    pub fn new(client: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Targets `TOOL_SERVER_URL`. The per-call budget covers the server's
    /// own generation call plus the hop to it.
    pub fn from_settings(settings: &Settings) -> Result<Option<Self>, reqwest::Error> {
        let Some(base_url) = &settings.tool_server_url else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .connect_timeout(settings.api_timeout)
            .build()?;
        Ok(Some(
            Self::new(
                client,
                base_url,
                settings.generation_timeout + settings.api_timeout,
            )
            .with_retry(RetryPolicy::from_settings(settings)),
        ))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl RemoteBackend {
    async fn call_once(&self, tool: &ToolRecord, args: &ToolArgs) -> Result<ToolOutput, ToolError> {
        let model = args.get("model_name").cloned().unwrap_or_default();
        let url = format!("{}/tools/{}", self.base_url, tool.name);
        let body = ToolCallRequest {
            arguments: args.clone(),
        };

        let response = self
            .client
            .post(url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout {
                        model: model.clone(),
                        elapsed_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    }
                } else {
                    GenerationError::Connection {
                        model: model.clone(),
                        message: format!("tool server unreachable: {e}"),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // The tool server rejects bad calls with the shared error body
            if status.is_client_error() {
                if let Some(e) = serde_json::from_str::<ErrorBody>(&body)
                    .ok()
                    .and_then(|b| b.into_tool_error(&tool.name))
                {
                    return Err(e);
                }
            }
            return Err(GenerationError::UpstreamStatus {
                model,
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let reply: ToolCallReply = response.json().await.map_err(|e| GenerationError::Unexpected {
            model: model.clone(),
            message: format!("malformed tool server reply: {e}"),
        })?;

        Ok(ToolOutput {
            tool: tool.name.clone(),
            model: reply.model,
            content: reply.content,
        })
    }
}

#[async_trait]
impl ToolBackend for RemoteBackend {
    async fn dispatch(&self, tool: &ToolRecord, args: &ToolArgs) -> Result<ToolOutput, ToolError> {
        self.retry.run(|| self.call_once(tool, args)).await
    }
}

/// The tool executor: registry lookup, argument check, dispatch.
#[derive(Clone)]
pub struct Runtime {
    registry: Arc<Registry>,
    backend: Arc<dyn ToolBackend>,
}

impl Runtime {
    pub fn new(registry: Arc<Registry>, backend: Arc<dyn ToolBackend>) -> Self {
        Self { registry, backend }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Unknown tools and missing or blank required arguments fail before
    /// the backend is touched, whichever backend is configured.
    #[instrument(skip(self, args))]
    pub async fn invoke(&self, tool_name: &str, args: &ToolArgs) -> Result<ToolOutput, ToolError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        for argument in &tool.required {
            if require(tool, args, argument)?.trim().is_empty() {
                return Err(ToolError::MissingArgument {
                    tool: tool.name.clone(),
                    argument: argument.clone(),
                });
            }
        }

        self.backend.dispatch(tool, args).await
    }
}

fn require<'a>(tool: &ToolRecord, args: &'a ToolArgs, argument: &str) -> Result<&'a str, ToolError> {
    args.get(argument)
        .map(String::as_str)
        .ok_or_else(|| ToolError::MissingArgument {
            tool: tool.name.clone(),
            argument: argument.to_string(),
        })
}
