use anyhow::{Context, Result};
use chunk_streamer::{
    capture::{CaptureConfig, CaptureLoop},
    config::{init_tracing, ClientArgs},
    handoff,
    recorder::{CommandTemplate, RecorderInvoker},
    sender::{HttpUploader, Sender},
    shutdown::cancel_on_signal,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ClientArgs::parse();
    init_tracing(args.log_level);

    info!("Starting streamer v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Output dir: {}", args.output_dir.display());
    info!("  Command: {:?}", args.command);
    info!("  File extension: {}", args.file_ext);
    info!("  Target URL: {}", args.target_url);
    info!("  Chunk duration: {}s", args.duration);

    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("Failed to create output dir {}", args.output_dir.display()))?;

    let template = CommandTemplate::new(args.command.clone()).context("Invalid recording command")?;
    let config = CaptureConfig::new(&args.output_dir, &args.file_ext, args.duration);
    let recorder = RecorderInvoker::new(template, config.chunk_duration());
    let uploader =
        HttpUploader::new(&args.target_url, args.duration).context("Failed to create HTTP client")?;
    info!("  Upload timeout: {}s", uploader.timeout().as_secs());

    let shutdown = CancellationToken::new();
    let signals = cancel_on_signal(shutdown.clone());

    let (slot_tx, slot_rx) = handoff::slot();
    let sender = tokio::spawn(Sender::new(uploader, slot_rx, shutdown.clone()).run());
    let capture = CaptureLoop::new(config, recorder, slot_tx, shutdown.clone()).run();

    let capture_stats = capture.await;
    let sender_stats = sender.await.context("Sender task failed")?;

    // The capture loop only stops early when the sender is gone
    shutdown.cancel();
    signals.await.context("Signal listener failed")?;

    info!(
        "Streamer stopped: {}",
        serde_json::json!({ "capture": capture_stats, "sender": sender_stats })
    );
    Ok(())
}
