use clap::Parser;
use quanta::config::{Cli, NodeConfig};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = NodeConfig::load_with_overrides(&cli).expect("failed to load node configuration");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = quanta::node::run(config, shutdown_rx).await {
        tracing::error!(error = %e, "node exited with error");
        std::process::exit(1);
    }
}
