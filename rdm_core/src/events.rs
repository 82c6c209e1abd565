//! Typed event fan-out for download lifecycle notifications.
//!
//! A single-consumer `mpsc` channel into a `ProgressNotifier` works well for
//! one CLI progress bar; a scheduler with many concurrently
//! active items and multiple UIs (CLI, local HTTP server, future GUI) needs
//! multiple independent consumers, so this is built on `tokio::sync::broadcast`
//! instead. Slow consumers lag rather than blocking producers.

use tokio::sync::broadcast;

use crate::item::DownloadState;
use crate::registry::ItemId;

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Progress {
        item_id: ItemId,
        downloaded_size: u64,
        total_size: Option<u64>,
        transfer_rate_bps: u64,
    },
    StateChanged {
        item_id: ItemId,
        state: DownloadState,
    },
    Finished {
        item_id: ItemId,
    },
    Failed {
        item_id: ItemId,
        reason: String,
    },
}

impl DownloadEvent {
    pub fn item_id(&self) -> ItemId {
        match self {
            DownloadEvent::Progress { item_id, .. }
            | DownloadEvent::StateChanged { item_id, .. }
            | DownloadEvent::Finished { item_id }
            | DownloadEvent::Failed { item_id, .. } => *item_id,
        }
    }
}

/// Process-wide event bus. Cheap to clone (wraps a `broadcast::Sender`).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DownloadEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Silently drops it if there are no subscribers —
    /// a detached progress sender should never block or panic a producer.
    pub fn publish(&self, event: DownloadEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
