use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use switchboard_core::brain::Brain;
use switchboard_core::config::Settings;
use switchboard_core::ingest::ocr::Tesseract;
use switchboard_core::ingest::Ingestor;
use switchboard_core::llm::{Generate, OllamaClient};
use switchboard_core::registry::Registry;
use switchboard_core::runtime::{LocalBackend, RemoteBackend, Runtime, ToolBackend};
use switchboard_core::serve::{serve_until_drained, shutdown_signal};
use switchboard_gateway::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Logging Setup
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    info!("Switchboard Gateway Initializing...");
    let settings = Settings::from_env().context("Failed to load settings")?;

    // 2. Initialize The Generation Client
    info!("Connecting to generation backend at {}...", settings.ollama_base_url);
    let client = OllamaClient::new(&settings).context("Failed to build generation client")?;
    match client.list_models().await {
        Ok(models) => {
            info!("Backend Status: {} models available", models.len());
            if !models.iter().any(|m| m == &settings.router_model) {
                warn!("Router model '{}' is not pulled on the backend", settings.router_model);
            }
        }
        Err(e) => error!("Backend is unreachable, continuing anyway: {}", e),
    }
    let generator: Arc<dyn Generate> = Arc::new(client);

    // 3. Load The Registry
    let registry = match &settings.tool_catalog {
        Some(path) => Registry::load(path)
            .await
            .with_context(|| format!("Failed to load tool catalog {}", path.display()))?,
        None => Registry::builtin(),
    };
    info!("Loaded {} tools available for the Brain.", registry.len());

    // 4. Pick where tools execute
    let backend: Arc<dyn ToolBackend> = match RemoteBackend::from_settings(&settings)
        .context("Failed to build tool server client")?
    {
        Some(remote) => {
            info!("Tools execute on the tool server at {}", remote.base_url());
            Arc::new(remote)
        }
        None => {
            info!("Tools execute in-process");
            Arc::new(LocalBackend::new(generator.clone(), settings.tool_temperature))
        }
    };
    let runtime = Runtime::new(Arc::new(registry), backend);
    let brain = Arc::new(Brain::new(generator, runtime, &settings));

    // 5. Upload pipeline
    let recognizer = Arc::new(Tesseract::new(&settings));
    let ingestor = Ingestor::from_settings(&settings, recognizer)
        .await
        .with_context(|| format!("Failed to open upload directory {}", settings.upload_dir().display()))?;
    info!("Uploads stored in {}", ingestor.store().dir().display());

    // 6. Bundle State and define routes
    let state = AppState {
        brain,
        ingestor: Arc::new(ingestor),
        static_dir: settings.static_dir.clone(),
        max_upload_bytes: settings.max_upload_bytes,
    };
    let app = router(state);

    // 7. Start Server
    let listener = TcpListener::bind(settings.gateway_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.gateway_addr))?;
    info!("Gateway listening on {}...", settings.gateway_addr);

    serve_until_drained(listener, app, settings.shutdown_grace, shutdown_signal())
        .await
        .context("Server error")?;
    info!("Gateway stopped.");
    Ok(())
}
