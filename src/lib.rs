//! Chunk Streamer - record a media feed in fixed-length chunks and ship them
//! to a size-capped collector.
//!
//! The crate is split into the two sides of the pipeline:
//!
//! - **Capture side** (`streamer` binary): a [`capture::CaptureLoop`] drives the
//!   [`recorder::RecorderInvoker`] once per chunk and hands each finished file
//!   through a single-slot [`handoff`] rendezvous to the [`sender::Sender`],
//!   which uploads it and removes the local copy.
//! - **Collector side** (`streamer-srv` binary): the [`server`] accepts uploads
//!   into a storage root and runs the [`retention::Sweeper`] after every
//!   receipt to keep the stored chunks under a byte cap.
//!
//! # Example
//!
//! ```rust,no_run
//! use chunk_streamer::{
//!     capture::{CaptureConfig, CaptureLoop},
//!     handoff,
//!     recorder::{CommandTemplate, RecorderInvoker},
//!     sender::{HttpUploader, Sender},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let template = CommandTemplate::new(vec![
//!         "ffmpeg".into(), "-i".into(), "rtsp://camera/stream".into(),
//!         "-t".into(), "<duration>".into(), "<outFile>".into(),
//!     ])?;
//!     let config = CaptureConfig::new("/var/spool/chunks", "mp4", 60);
//!     let recorder = RecorderInvoker::new(template, config.chunk_duration());
//!
//!     let (slot_tx, slot_rx) = handoff::slot();
//!     let shutdown = CancellationToken::new();
//!
//!     let uploader = HttpUploader::new("http://collector:8080/video-stream", 60)?;
//!     let sender = tokio::spawn(Sender::new(uploader, slot_rx, shutdown.clone()).run());
//!     CaptureLoop::new(config, recorder, slot_tx, shutdown).run().await;
//!     sender.await?;
//!     Ok(())
//! }
//! ```

pub mod capture;
pub mod config;
pub mod handoff;
pub mod naming;
pub mod recorder;
pub mod retention;
pub mod sender;
pub mod server;
pub mod shutdown;

pub use capture::{CaptureConfig, CaptureLoop, CaptureStats};
pub use config::{parse_size, ClientArgs, LogLevel, ServerArgs, SizeParseError};
pub use naming::ChunkName;
pub use recorder::{CommandTemplate, RecordError, RecorderInvoker};
pub use retention::{SweepError, SweepReport, Sweeper};
pub use sender::{HttpUploader, Sender, SenderStats, UploadError, Uploader};
pub use server::{router, ServerConfig};

use thiserror::Error;

/// Errors surfaced while wiring up either side of the pipeline
#[derive(Error, Debug)]
pub enum StreamerError {
    /// The recording command template is unusable
    #[error("Invalid command template: {message}")]
    Template { message: String },

    /// Size configuration could not be parsed
    #[error("Invalid size: {0}")]
    Size(#[from] SizeParseError),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for chunk-streamer operations
pub type Result<T> = std::result::Result<T, StreamerError>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Multipart form field carrying the chunk on upload
pub const UPLOAD_FIELD: &str = "file";

/// Route the collector accepts chunks on
pub const UPLOAD_ROUTE: &str = "/video-stream";

/// Route of the liveness probe
pub const PING_ROUTE: &str = "/ping";
