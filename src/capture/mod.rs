use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::handoff::SlotSender;
use crate::naming::{normalize_extension, ChunkName};
use crate::recorder::RecorderInvoker;

/// Pause after a failed recording before the next attempt
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Configuration for the capture loop
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Directory chunks are recorded into
    pub output_dir: PathBuf,
    /// Chunk file extension, without the dot
    pub extension: String,
    /// Nominal length of one chunk in seconds
    pub chunk_secs: u64,
    /// Wait after a failed recording
    pub backoff: Duration,
}

impl CaptureConfig {
    pub fn new(output_dir: impl Into<PathBuf>, extension: &str, chunk_secs: u64) -> Self {
        Self {
            output_dir: output_dir.into(),
            extension: normalize_extension(extension).to_string(),
            chunk_secs,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs(self.chunk_secs)
    }

    /// Full path for a chunk started now
    pub fn next_chunk_path(&self) -> PathBuf {
        self.output_dir
            .join(ChunkName::now(&self.extension).file_name())
    }
}

/// Counters reported when the loop stops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub cycles: u64,
    pub recorded: u64,
    pub failed: u64,
    pub handed_off: u64,
}

/// Where the loop is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Invoking,
    Handoff,
    Backoff,
    Stopped,
}

/// Producer side of the pipeline: record a chunk, hand it to the sender, repeat.
pub struct CaptureLoop {
    config: CaptureConfig,
    recorder: RecorderInvoker,
    slot: SlotSender,
    shutdown: CancellationToken,
    state: CaptureState,
    stats: CaptureStats,
}

impl CaptureLoop {
    pub fn new(
        config: CaptureConfig,
        recorder: RecorderInvoker,
        slot: SlotSender,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            recorder,
            slot,
            shutdown,
            state: CaptureState::Idle,
            stats: CaptureStats::default(),
        }
    }

    /// Run until shutdown is signalled or the sender goes away, then close
    /// the handoff slot.
    pub async fn run(mut self) -> CaptureStats {
        info!(
            "Capture loop started: dir={}, ext={}, duration={}s",
            self.config.output_dir.display(),
            self.config.extension,
            self.config.chunk_secs
        );

        while !self.shutdown.is_cancelled() {
            self.stats.cycles += 1;
            if !self.cycle().await {
                break;
            }
        }

        self.transition(CaptureState::Stopped);
        let CaptureLoop { slot, stats, .. } = self;
        slot.close();

        info!(
            "Capture loop stopped: cycles={}, recorded={}, failed={}, handed_off={}",
            stats.cycles, stats.recorded, stats.failed, stats.handed_off
        );
        stats
    }

    /// One `Idle → Invoking → Handoff | Backoff → Idle` pass.
    /// Returns `false` when the loop must stop.
    async fn cycle(&mut self) -> bool {
        let chunk_path = self.config.next_chunk_path();

        self.transition(CaptureState::Invoking);
        match self.recorder.record(&chunk_path, &self.shutdown).await {
            Ok(()) => {
                self.stats.recorded += 1;
                info!("Successfully recorded {}, notify sender ...", chunk_path.display());
                self.transition(CaptureState::Handoff);
                let handed_off = self.hand_off(chunk_path).await;
                self.transition(CaptureState::Idle);
                handed_off
            }
            Err(e) if e.is_cancelled() => {
                info!("Recording of {} interrupted by shutdown", chunk_path.display());
                remove_partial(&chunk_path).await;
                false
            }
            Err(e) => {
                self.stats.failed += 1;
                error!("Could not record {}: {}", chunk_path.display(), e);
                remove_partial(&chunk_path).await;

                self.transition(CaptureState::Backoff);
                tokio::select! {
                    _ = tokio::time::sleep(self.config.backoff) => {}
                    _ = self.shutdown.cancelled() => {}
                }
                self.transition(CaptureState::Idle);
                true
            }
        }
    }

    async fn hand_off(&mut self, chunk_path: PathBuf) -> bool {
        let outcome = tokio::select! {
            biased;
            accepted = self.slot.hand_off(chunk_path.clone()) => Some(accepted),
            _ = self.shutdown.cancelled() => None,
        };

        match outcome {
            Some(Ok(())) => {
                self.stats.handed_off += 1;
                debug!("Sender accepted {}", chunk_path.display());
                true
            }
            Some(Err(e)) => {
                warn!("Sender is gone, stopping capture: {}", e);
                false
            }
            None => {
                info!(
                    "Shutdown before {} was accepted; leaving it on disk",
                    chunk_path.display()
                );
                false
            }
        }
    }

    fn transition(&mut self, next: CaptureState) {
        debug!("Capture state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Remove whatever a failed recording left behind
async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial output {}: {}", path.display(), e),
    }
}
