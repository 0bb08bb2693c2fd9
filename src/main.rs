use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use support_toolkit::{
    config::Config,
    metrics,
    server::{router, AppState},
    SupportToolkit,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "support_toolkit=info,tower_http=debug".into()),
        )
        .init();

    // Load configuration
    let config = Arc::new(Config::load().context("failed to load configuration")?);
    info!("Configuration loaded successfully");
    if config.ai_api_key.is_none() {
        warn!("No AI API key set; ticket classification will use keyword matching only");
    }

    let toolkit = SupportToolkit::new(config.clone()).context("failed to initialize diagnostic services")?;

    metrics::init_metrics();

    let app = router(AppState::new(toolkit, config.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("Support toolkit listening on {}", addr);
    info!("Dashboard: http://{}/", addr);
    info!("Health check: http://{}/health", addr);
    info!("Metrics: http://{}/metrics", addr);

    // Graceful shutdown handling
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, gracefully shutting down...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}
