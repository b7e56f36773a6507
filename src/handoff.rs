//! Single-slot rendezvous between the capture loop and the sender.
//!
//! [`SlotSender::hand_off`] completes only once the receiving side has taken
//! the path, so a finished chunk is never queued behind another one. Dropping
//! the [`SlotSender`] closes the slot and the receiver sees end-of-stream.

use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

struct Offer {
    path: PathBuf,
    accepted: oneshot::Sender<()>,
}

/// The receiving side went away before taking the chunk; ownership of the
/// file stays with the caller.
#[derive(Error, Debug)]
#[error("handoff slot closed before {} was accepted", .path.display())]
pub struct SlotClosed {
    pub path: PathBuf,
}

/// Producer half, owned by the capture loop
pub struct SlotSender {
    tx: mpsc::Sender<Offer>,
}

/// Consumer half, owned by the sender
pub struct SlotReceiver {
    rx: mpsc::Receiver<Offer>,
}

/// Create a connected slot
pub fn slot() -> (SlotSender, SlotReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (SlotSender { tx }, SlotReceiver { rx })
}

impl SlotSender {
    /// Offer `path` and wait until the receiver takes it.
    ///
    /// If this future is dropped before completion, the offer is withdrawn and
    /// the receiver skips it.
    pub async fn hand_off(&self, path: PathBuf) -> Result<(), SlotClosed> {
        let (accepted, taken) = oneshot::channel();
        let offered = path.clone();
        if let Err(mpsc::error::SendError(offer)) = self.tx.send(Offer { path, accepted }).await {
            return Err(SlotClosed { path: offer.path });
        }

        // The receiver drops the ack sender without firing only when it shuts
        // down with our offer still buffered.
        taken.await.map_err(|_| SlotClosed { path: offered })
    }

    /// Close the slot; the receiver drains to `None`
    pub fn close(self) {
        debug!("Handoff slot closed by producer");
    }
}

impl SlotReceiver {
    /// Take the next chunk path, or `None` once the producer closed the slot
    pub async fn recv(&mut self) -> Option<PathBuf> {
        loop {
            let offer = self.rx.recv().await?;
            if offer.accepted.send(()).is_ok() {
                return Some(offer.path);
            }
            debug!("Skipping withdrawn offer for {}", offer.path.display());
        }
    }
}
