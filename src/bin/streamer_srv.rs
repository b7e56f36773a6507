use anyhow::{Context, Result};
use chunk_streamer::{
    config::{format_size, init_tracing, ServerArgs},
    server::{serve, ServerConfig},
    shutdown::cancel_on_signal,
};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    init_tracing(args.effective_log_level());

    let config = match ServerConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Could not parse --max-size={}: {}", args.max_size, e);
            return Err(e).context("Invalid --max-size");
        }
    };

    info!("Starting streamer-srv v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Starting for storage-dir={}, max-size={} ({})",
        config.storage_dir.display(),
        args.max_size,
        format_size(config.max_size)
    );

    tokio::fs::create_dir_all(&config.storage_dir)
        .await
        .with_context(|| format!("Failed to create storage dir {}", config.storage_dir.display()))?;

    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen_addr()))?;

    let shutdown = CancellationToken::new();
    let signals = cancel_on_signal(shutdown.clone());

    if let Err(e) = serve(listener, &config, shutdown.clone()).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    shutdown.cancel();
    signals.await.context("Signal listener failed")?;
    info!("streamer-srv stopped");
    Ok(())
}
