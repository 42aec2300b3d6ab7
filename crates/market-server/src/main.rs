mod config;
mod wiring;

use std::error::Error;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::Config::from_env()?;
    let services = wiring::build_services(&config).await?;
    let tracked = wiring::bootstrap(&services.engine, config.autostart).await?;
    tracing::info!(
        addr = %config.listen_addr,
        db = %config.db_path.display(),
        interval = ?config.interval,
        generator = ?config.generator,
        tracked,
        "market server starting"
    );

    let listener = TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, services.app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    services.engine.shutdown().await?;
    tracing::info!("market server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c, shutting down");
        return;
    }
    tracing::info!("shutdown signal received");
}
