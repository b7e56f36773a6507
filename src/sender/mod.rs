use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handoff::SlotReceiver;
use crate::UPLOAD_FIELD;

/// Lower bound for the per-request upload timeout, in seconds
pub const MIN_UPLOAD_TIMEOUT_SECS: u64 = 15;

/// Per-request timeout: half a chunk, but never less than 15 seconds
pub fn upload_timeout(chunk_secs: u64) -> Duration {
    Duration::from_secs(MIN_UPLOAD_TIMEOUT_SECS.max(chunk_secs / 2))
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} has no file name", .0.display())]
    NoFileName(PathBuf),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("collector answered {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Delivers one chunk file to the collector
pub trait Uploader: Send + Sync {
    fn upload(&self, path: &Path) -> impl Future<Output = Result<(), UploadError>> + Send;
}

/// Multipart `POST` of a chunk to the collector's upload endpoint
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: Client,
    target_url: String,
    timeout: Duration,
}

impl HttpUploader {
    pub fn new(target_url: impl Into<String>, chunk_secs: u64) -> crate::Result<Self> {
        let timeout = upload_timeout(chunk_secs);
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("{}/{}", crate::NAME, crate::VERSION))
            .build()?;

        Ok(Self {
            client,
            target_url: target_url.into(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Uploader for HttpUploader {
    async fn upload(&self, path: &Path) -> Result<(), UploadError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::NoFileName(path.to_path_buf()))?;

        info!(
            "Sending {} to targetUrl={}, timeout={:?}",
            path.display(),
            self.target_url,
            self.timeout
        );

        let contents = tokio::fs::read(path).await.map_err(|source| UploadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let size = contents.len();

        let part = Part::bytes(contents).file_name(file_name);
        let form = Form::new().part(UPLOAD_FIELD, part);

        let response = self.client.post(&self.target_url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        info!("status={} body={:?} ({} bytes sent)", status, body, size);

        if !status.is_success() {
            return Err(UploadError::Status { status, body });
        }
        Ok(())
    }
}

/// Counters reported when the sender stops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    pub attempted: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// Consumer side of the pipeline.
///
/// Every chunk taken from the slot gets exactly one upload attempt and is then
/// removed from local disk whatever the outcome.
pub struct Sender<U> {
    uploader: U,
    slot: SlotReceiver,
    shutdown: CancellationToken,
    stats: SenderStats,
}

impl<U: Uploader> Sender<U> {
    pub fn new(uploader: U, slot: SlotReceiver, shutdown: CancellationToken) -> Self {
        Self {
            uploader,
            slot,
            shutdown,
            stats: SenderStats::default(),
        }
    }

    /// Run until the slot is closed or shutdown is signalled
    pub async fn run(mut self) -> SenderStats {
        loop {
            let path = tokio::select! {
                next = self.slot.recv() => match next {
                    Some(path) => path,
                    None => {
                        info!("Sender: handoff slot closed");
                        break;
                    }
                },
                _ = self.shutdown.cancelled() => {
                    info!("Sender: shutdown signalled");
                    break;
                }
            };

            self.deliver(&path).await;
        }

        info!(
            "Sender stopped: attempted={}, delivered={}, dropped={}",
            self.stats.attempted, self.stats.delivered, self.stats.dropped
        );
        self.stats
    }

    async fn deliver(&mut self, path: &Path) {
        self.stats.attempted += 1;
        match self.uploader.upload(path).await {
            Ok(()) => {
                self.stats.delivered += 1;
                debug!("Delivered {}", path.display());
            }
            Err(e) => {
                self.stats.dropped += 1;
                warn!("Could not send file={}, dropping it: {}", path.display(), e);
            }
        }

        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Could not remove sent file {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct RecordingUploader {
        calls: Arc<Mutex<Vec<(PathBuf, Vec<u8>)>>>,
        fail: bool,
    }

    impl Uploader for RecordingUploader {
        async fn upload(&self, path: &Path) -> Result<(), UploadError> {
            let contents = std::fs::read(path).map_err(|source| UploadError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            self.calls.lock().unwrap().push((path.to_path_buf(), contents));
            if self.fail {
                return Err(UploadError::Status {
                    status: StatusCode::BAD_GATEWAY,
                    body: "collector down".to_string(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn test_upload_timeout_floor() {
        assert_eq!(upload_timeout(0), Duration::from_secs(15));
        assert_eq!(upload_timeout(30), Duration::from_secs(15));
        assert_eq!(upload_timeout(60), Duration::from_secs(30));
        assert_eq!(upload_timeout(301), Duration::from_secs(150));
    }

    #[test]
    fn test_http_uploader_uses_chunk_timeout() {
        let uploader = HttpUploader::new("http://localhost:8080/video-stream", 120).unwrap();
        assert_eq!(uploader.timeout(), Duration::from_secs(60));
    }

    async fn run_with(uploader: RecordingUploader, files: &[(&str, &str)]) -> (SenderStats, TempDir) {
        let dir = TempDir::new().unwrap();
        let (slot_tx, slot_rx) = handoff::slot();
        let sender = tokio::spawn(Sender::new(uploader, slot_rx, CancellationToken::new()).run());

        for (name, contents) in files {
            let path = dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            slot_tx.hand_off(path).await.unwrap();
        }
        slot_tx.close();

        (sender.await.unwrap(), dir)
    }

    #[tokio::test]
    async fn test_delivered_chunks_are_removed() {
        let uploader = RecordingUploader::default();
        let (stats, dir) = run_with(
            uploader.clone(),
            &[("2024-01-01_00_00_01.mp4", "one"), ("2024-01-01_00_00_02.mp4", "two")],
        )
        .await;

        assert_eq!(
            stats,
            SenderStats {
                attempted: 2,
                delivered: 2,
                dropped: 0
            }
        );
        let calls = uploader.calls.lock().unwrap();
        assert_eq!(calls[0].1, b"one");
        assert_eq!(calls[1].1, b"two");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_is_dropped_without_retry() {
        let uploader = RecordingUploader {
            fail: true,
            ..Default::default()
        };
        let (stats, dir) = run_with(uploader.clone(), &[("2024-01-01_00_00_01.mp4", "lost")]).await;

        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(uploader.calls.lock().unwrap().len(), 1, "no retry");
        assert!(!dir.path().join("2024-01-01_00_00_01.mp4").exists());
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_sender() {
        let (_slot_tx, slot_rx) = handoff::slot();
        let shutdown = CancellationToken::new();
        let sender = tokio::spawn(Sender::new(RecordingUploader::default(), slot_rx, shutdown.clone()).run());

        shutdown.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(5), sender)
            .await
            .expect("sender must stop on shutdown")
            .unwrap();
        assert_eq!(stats, SenderStats::default());
    }

    #[tokio::test]
    async fn test_unreachable_collector_drops_chunk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("2024-01-01_00_00_01.mp4");
        std::fs::write(&path, b"payload").unwrap();

        // Port 9 (discard) on loopback is closed in test environments
        let uploader = HttpUploader::new("http://127.0.0.1:9/video-stream", 0).unwrap();
        let (slot_tx, slot_rx) = handoff::slot();
        let sender = tokio::spawn(Sender::new(uploader, slot_rx, CancellationToken::new()).run());

        slot_tx.hand_off(path.clone()).await.unwrap();
        slot_tx.close();
        let stats = sender.await.unwrap();

        assert_eq!(stats.dropped, 1);
        assert!(!path.exists());
    }
}
