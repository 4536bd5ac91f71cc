use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use switchboard_core::config::Settings;
use switchboard_core::llm::OllamaClient;
use switchboard_core::registry::Registry;
use switchboard_core::runtime::{LocalBackend, Runtime};
use switchboard_core::serve::{serve_until_drained, shutdown_signal};
use switchboard_tools::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Logging Setup
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    info!("Switchboard Tool Server Initializing...");
    let settings = Settings::from_env().context("Failed to load settings")?;

    // 2. Load The Registry
    let registry = match &settings.tool_catalog {
        Some(path) => Registry::load(path)
            .await
            .with_context(|| format!("Failed to load tool catalog {}", path.display()))?,
        None => Registry::builtin(),
    };
    info!("Hosting {} tools.", registry.len());

    // 3. Tools always run in-process here
    let client = OllamaClient::new(&settings).context("Failed to build generation client")?;
    if let Err(e) = client.list_models().await {
        error!("Backend is unreachable, continuing anyway: {}", e);
    }
    let backend = LocalBackend::new(Arc::new(client), settings.tool_temperature);
    let runtime = Runtime::new(Arc::new(registry), Arc::new(backend));

    let app = router(AppState {
        runtime: Arc::new(runtime),
    });

    // 4. Start Server
    let listener = TcpListener::bind(settings.tools_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.tools_addr))?;
    info!("Tool server listening on {}...", settings.tools_addr);

    serve_until_drained(listener, app, settings.shutdown_grace, shutdown_signal())
        .await
        .context("Server error")?;
    info!("Tool server stopped.");
    Ok(())
}
