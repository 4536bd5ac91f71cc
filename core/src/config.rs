//! Settings loaded from the environment (and `.env`, when present).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Everything the gateway and the tool server need at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the Ollama-compatible backend.
    pub ollama_base_url: String,
    /// Model that decides between answering and calling a tool.
    pub router_model: String,
    /// Models the router may hand work to, advertised in its prompt.
    pub available_models: Vec<String>,
    /// Budget for a single generation call. Generation is slow.
    pub generation_timeout: Duration,
    /// Budget for ordinary API calls (health checks, tool catalog).
    pub api_timeout: Duration,
    /// Extra attempts after a transport failure.
    pub generation_retries: u32,
    pub retry_backoff: Duration,
    pub tool_temperature: f32,
    /// Ask the backend for JSON-constrained output on routing calls.
    pub router_json_format: bool,
    /// When set, tools run on the remote tool server instead of in-process.
    pub tool_server_url: Option<String>,
    /// Optional JSON catalog replacing the builtin tool list.
    pub tool_catalog: Option<PathBuf>,
    pub gateway_addr: SocketAddr,
    pub tools_addr: SocketAddr,
    pub static_dir: PathBuf,
    /// Prefix used when handing out URLs for stored uploads.
    pub public_base_url: String,
    pub ocr_languages: String,
    pub tesseract_bin: String,
    pub ocr_timeout: Duration,
    pub ocr_concurrency: usize,
    pub shutdown_grace: Duration,
    pub max_upload_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ollama_base_url: "http://localhost:11434".into(),
            router_model: "gpt-oss:20b".into(),
            available_models: vec!["deepseek-r1:8b".into(), "llama3".into()],
            generation_timeout: Duration::from_secs(300),
            api_timeout: Duration::from_secs(10),
            generation_retries: 1,
            retry_backoff: Duration::from_millis(500),
            tool_temperature: 0.7,
            router_json_format: false,
            tool_server_url: None,
            tool_catalog: None,
            gateway_addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
            tools_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            static_dir: PathBuf::from("static"),
            public_base_url: "http://localhost:8001".into(),
            ocr_languages: "eng+kor".into(),
            tesseract_bin: "tesseract".into(),
            ocr_timeout: Duration::from_secs(60),
            ocr_concurrency: 4,
            shutdown_grace: Duration::from_secs(30),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl Settings {
    /// Reads `.env` if present, then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup. Unset keys keep their
    /// defaults; set-but-invalid keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            ollama_base_url: get("OLLAMA_BASE_URL").unwrap_or(d.ollama_base_url),
            router_model: get("ROUTER_MODEL").unwrap_or(d.router_model),
            available_models: get("AVAILABLE_MODELS")
                .map(|v| split_list(&v))
                .unwrap_or(d.available_models),
            generation_timeout: secs(&get, "GENERATION_TIMEOUT_SECS", d.generation_timeout)?,
            api_timeout: secs(&get, "API_TIMEOUT_SECS", d.api_timeout)?,
            generation_retries: parsed(&get, "GENERATION_RETRIES", d.generation_retries)?,
            retry_backoff: Duration::from_millis(parsed(
                &get,
                "RETRY_BACKOFF_MS",
                d.retry_backoff.as_millis() as u64,
            )?),
            tool_temperature: parsed(&get, "TOOL_TEMPERATURE", d.tool_temperature)?,
            router_json_format: parsed(&get, "ROUTER_JSON_FORMAT", d.router_json_format)?,
            tool_server_url: get("TOOL_SERVER_URL"),
            tool_catalog: get("TOOL_CATALOG").map(PathBuf::from),
            gateway_addr: parsed(&get, "GATEWAY_ADDR", d.gateway_addr)?,
            tools_addr: parsed(&get, "TOOLS_ADDR", d.tools_addr)?,
            static_dir: get("STATIC_DIR").map(PathBuf::from).unwrap_or(d.static_dir),
            public_base_url: get("PUBLIC_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(d.public_base_url),
            ocr_languages: get("OCR_LANGUAGES").unwrap_or(d.ocr_languages),
            tesseract_bin: get("TESSERACT_BIN").unwrap_or(d.tesseract_bin),
            ocr_timeout: secs(&get, "OCR_TIMEOUT_SECS", d.ocr_timeout)?,
            ocr_concurrency: parsed(&get, "OCR_CONCURRENCY", d.ocr_concurrency)?.max(1),
            shutdown_grace: secs(&get, "SHUTDOWN_GRACE_SECS", d.shutdown_grace)?,
            max_upload_bytes: parsed(&get, "MAX_UPLOAD_BYTES", d.max_upload_bytes)?,
        })
    }

    /// Directory where uploads are stored, under the public static root.
    pub fn upload_dir(&self) -> PathBuf {
        self.static_dir.join("uploads")
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parsed<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
    }
}

fn secs<G>(get: &G, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parsed(get, key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.router_model, "gpt-oss:20b");
        assert_eq!(settings.generation_timeout, Duration::from_secs(300));
        assert!(settings.generation_timeout > settings.api_timeout);
        assert_eq!(settings.ocr_languages, "eng+kor");
        assert!(settings.tool_server_url.is_none());
        assert_eq!(settings.upload_dir(), PathBuf::from("static/uploads"));
    }

    #[test]
    fn overrides_are_applied() {
        let settings = Settings::from_lookup(lookup(&[
            ("ROUTER_MODEL", "qwen3:8b"),
            ("AVAILABLE_MODELS", "llama3, mistral ,,"),
            ("GENERATION_TIMEOUT_SECS", "600"),
            ("ROUTER_JSON_FORMAT", "true"),
            ("PUBLIC_BASE_URL", "http://10.0.0.5:8001/"),
            ("TOOL_SERVER_URL", "http://tools:8000"),
        ]))
        .unwrap();

        assert_eq!(settings.router_model, "qwen3:8b");
        assert_eq!(settings.available_models, vec!["llama3", "mistral"]);
        assert_eq!(settings.generation_timeout, Duration::from_secs(600));
        assert!(settings.router_json_format);
        assert_eq!(settings.public_base_url, "http://10.0.0.5:8001");
        assert_eq!(settings.tool_server_url.as_deref(), Some("http://tools:8000"));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = Settings::from_lookup(lookup(&[("OCR_CONCURRENCY", "many")])).unwrap_err();
        assert_eq!(err.key, "OCR_CONCURRENCY");
        assert!(err.message.contains("many"));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let settings = Settings::from_lookup(lookup(&[("ROUTER_MODEL", "  ")])).unwrap();
        assert_eq!(settings.router_model, "gpt-oss:20b");
    }
}
