use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::config::Settings;
use crate::decision::{parse_decision, ToolDecision, NO_TOOL};
use crate::error::ChatError;
use crate::llm::{Generate, GenerateOptions};
use crate::runtime::Runtime;

/// How a reply was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The router answered itself.
    Direct,
    /// The router's output was not usable JSON; its raw text is the answer.
    Fallback,
    /// A tool produced the answer.
    Tool { name: String },
}

/// Final answer of a chat turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// The concrete model whose text is returned.
    pub model: String,
    pub text: String,
    pub route: Route,
}

/// The intent router.
///
/// One generation call decides (router model, temperature 0); at most one
/// tool call executes. The two calls are strictly sequential because the
/// second depends on the first.
pub struct Brain {
    generator: Arc<dyn Generate>,
    runtime: Runtime,
    router_model: String,
    available_models: Vec<String>,
    json_format: bool,
}

impl Brain {
    pub fn new(generator: Arc<dyn Generate>, runtime: Runtime, settings: &Settings) -> Self {
        info!("Brain ready. Router model: {}", settings.router_model);
        Self {
            generator,
            runtime,
            router_model: settings.router_model.clone(),
            available_models: settings.available_models.clone(),
            json_format: settings.router_json_format,
        }
    }

    pub fn router_model(&self) -> &str {
        &self.router_model
    }

    /// Describes the tool menu and the output contract to the router model.
    pub fn system_prompt(&self) -> String {
        let tools: Vec<_> = self
            .runtime
            .registry()
            .tools()
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        let tools = serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".into());

        let models = if self.available_models.is_empty() {
            "(none configured)".to_string()
        } else {
            self.available_models.join(", ")
        };

        format!(
            "You are a router. Decide whether to answer the user directly or to delegate \
             the request to one of the available tools.\n\n\
             Available tools:\n{tools}\n\n\
             Models that may be passed as \"model_name\": {models}\n\n\
             Reply with a single JSON object and nothing else, shaped either as\n\
             {{\"tool_name\": \"<tool>\", \"tool_args\": {{...}}}}\n\
             or as\n\
             {{\"tool_name\": \"{NO_TOOL}\", \"response\": \"<your answer>\"}}"
        )
    }

    /// ROUTING: asks the router model for a decision. Only transport and
    /// backend failures are errors; unusable output becomes a fallback
    /// decision.
    pub async fn plan(&self, message: &str) -> Result<ToolDecision, ChatError> {
        let prompt = format!("{}\n\nUser message:\n{}", self.system_prompt(), message);
        let options = GenerateOptions {
            json_format: self.json_format,
            ..GenerateOptions::with_temperature(0.0)
        };

        let raw = self
            .generator
            .generate(&self.router_model, &prompt, &options)
            .await
            .map_err(ChatError::Routing)?;

        let decision = parse_decision(&raw);
        if !decision.valid_json {
            warn!("Router output unusable, falling back to its raw text");
        }
        Ok(decision)
    }

    /// RECEIVED → ROUTING → {DIRECT_ANSWER | DISPATCHING} → RESPONDED.
    #[instrument(skip_all)]
    pub async fn handle(&self, message: &str) -> Result<Reply, ChatError> {
        info!("Brain is planning execution...");
        let decision = self.plan(message).await.inspect_err(|e| {
            error!("Routing call failed: {}", e);
        })?;

        if decision.is_direct() {
            info!("Brain decided NO tool was needed.");
            let route = if decision.valid_json {
                Route::Direct
            } else {
                Route::Fallback
            };
            return Ok(Reply {
                model: self.router_model.clone(),
                text: decision.direct_response.unwrap_or_default(),
                route,
            });
        }

        info!("Brain decided to call tool: '{}'", decision.tool_name);
        let output = self
            .runtime
            .invoke(&decision.tool_name, &decision.tool_args)
            .await
            .inspect_err(|e| {
                if e.is_client_error() {
                    warn!("Rejected tool call: {}", e);
                } else {
                    error!("Tool Execution Failed: {}", e);
                }
            })?;

        info!(
            "Tool Execution Success. Model '{}' returned {} bytes",
            output.model,
            output.content.len()
        );
        Ok(Reply {
            model: output.model,
            text: output.content,
            route: Route::Tool { name: output.tool },
        })
    }
}
