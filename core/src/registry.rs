use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::fs;

use crate::error::RegistryError;

/// Name of the one generic tool: run a prompt on a chosen model.
pub const CALL_LLM_TOOL: &str = "call_llm_tool";

/// What actually runs when a tool is invoked.
///
/// Kept closed on purpose: a catalog can rename or re-describe tools, but
/// it can only point them at handlers this crate knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handler {
    /// Generate text with `arguments.model_name` on `arguments.prompt`.
    InvokeModel,
}

// The shape of our catalog entries (matches tools.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub name: String,
    pub description: String,
    pub handler: Handler,

    // JSON Schema for the arguments, shown to the router model so it knows
    // *how* to call the tool.
    pub parameters: Value,

    // Arguments that must be present before the backend is called.
    pub required: Vec<String>,
}

impl ToolRecord {
    pub fn call_llm_tool() -> Self {
        Self {
            name: CALL_LLM_TOOL.to_string(),
            description: "Generates a response using a specified model.".to_string(),
            handler: Handler::InvokeModel,
            parameters: json!({
                "type": "object",
                "properties": {
                    "model_name": {
                        "type": "string",
                        "description": "Identifier of the model that should answer"
                    },
                    "prompt": {
                        "type": "string",
                        "description": "Prompt handed to that model"
                    }
                },
                "required": ["model_name", "prompt"]
            }),
            required: vec!["model_name".to_string(), "prompt".to_string()],
        }
    }
}

/// Fixed name → tool mapping, loaded once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Registry {
    tools: Vec<ToolRecord>,
}

impl Registry {
    /// The builtin catalog: just the generic model-invocation tool.
    pub fn builtin() -> Self {
        Self {
            tools: vec![ToolRecord::call_llm_tool()],
        }
    }

    pub fn from_records(tools: Vec<ToolRecord>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for tool in &tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(RegistryError::Duplicate(tool.name.clone()));
            }
        }
        Ok(Self { tools })
    }

    // Reads a tools.json catalog
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();

        // 1. Read the JSON file
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| RegistryError::Read {
                path: path.display().to_string(),
                source,
            })?;

        // 2. Parse it (unknown handlers fail here)
        let tools: Vec<ToolRecord> = serde_json::from_str(&content)?;

        // 3. Sanity check
        for tool in &tools {
            if tool.required.is_empty() {
                tracing::warn!("Tool '{}' registered without required arguments", tool.name);
            }
        }

        Self::from_records(tools)
    }

    pub fn get(&self, name: &str) -> Option<&ToolRecord> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn tools(&self) -> &[ToolRecord] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
