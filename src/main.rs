//! Bridge entry point.
//!
//! Initializes logging, loads configuration, assembles the bridge, and
//! serves it over HTTP. Signal handling lives here, outside the core.

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

use mcp_addon_bridge::addons::builtin::builtin_addons;
use mcp_addon_bridge::{BridgeApp, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment
    let config = Config::from_env();

    // Initialize logging
    init_logging(&config.logging.level);

    info!("Starting {} v{}", config.server.name, config.server.version);

    let addr = config.bind_address();
    let app = BridgeApp::start(config, &builtin_addons()).await?;
    let router = app.router();

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Ready - listening on {}", addr);
    info!("  → Bridge:     POST /bridge");
    info!("  → Management: GET /addons, GET /elements, GET /logs, GET /status");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.stop().await;
    info!("Server shutting down");

    Ok(())
}

/// Resolves when the process receives Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

/// Initialize the logging subsystem.
///
/// Configures tracing with the specified log level and format.
fn init_logging(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}
