use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rdm_core::events::DownloadEvent;
use rdm_core::item::DownloadState;
use rdm_core::progress::format_bytes;
use rdm_core::registry::ItemId;
use tokio::sync::broadcast::Receiver;

/// Renders every item's progress as its own indicatif bar under one shared
/// `MultiProgress`, keyed by item id. Runs until the broadcast channel
/// closes (the sender side — the `EventBus` — is dropped).
pub struct TerminalProgressObserver {
    multi: MultiProgress,
    bars: HashMap<ItemId, ProgressBar>,
}

impl TerminalProgressObserver {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    fn bar_for(&mut self, id: ItemId) -> &ProgressBar {
        self.bars.entry(id).or_insert_with(|| {
            let style = ProgressStyle::with_template(
                "{prefix} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({binary_bytes_per_sec}) ETA {eta} — {msg}",
            )
            .unwrap()
            .progress_chars("=>-");
            let pb = self.multi.add(ProgressBar::new(1));
            pb.set_style(style);
            pb.set_prefix(format!("#{}", id));
            pb
        })
    }

    /// Drains events until the channel closes, updating bars as it goes.
    pub async fn run(mut self, mut events: Receiver<DownloadEvent>) {
        loop {
            match events.recv().await {
                Ok(DownloadEvent::Progress {
                    item_id,
                    downloaded_size,
                    total_size,
                    transfer_rate_bps,
                }) => {
                    let pb = self.bar_for(item_id);
                    if let Some(total) = total_size {
                        pb.set_length(total.max(1));
                    }
                    pb.set_position(downloaded_size);
                    if transfer_rate_bps > 0 {
                        pb.set_message(format!("{}/s", format_bytes(transfer_rate_bps)));
                    }
                }
                Ok(DownloadEvent::StateChanged { item_id, state }) => {
                    let pb = self.bar_for(item_id);
                    match state {
                        DownloadState::Downloading => pb.set_message("downloading"),
                        DownloadState::Paused => pb.set_message("paused"),
                        DownloadState::Stopped => pb.set_message("stopped"),
                        DownloadState::Queued => pb.set_message("queued"),
                        DownloadState::Completed | DownloadState::Failed => {}
                    }
                }
                Ok(DownloadEvent::Finished { item_id }) => {
                    self.bar_for(item_id).finish_with_message("done");
                }
                Ok(DownloadEvent::Failed { item_id, reason }) => {
                    self.bar_for(item_id).abandon_with_message(format!("failed: {}", reason));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
