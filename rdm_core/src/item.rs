//! Download item (component C5) — data model for a single resource's
//! lifecycle. The state machine's transition *logic* (probe, segment,
//! stream, merge) lives in [`crate::engine`]; this module owns the shared,
//! lock-protected fields every other component reads or mutates.
//!
//! Grounded on the original's `DownloadItem` (`enum State { Queued,
//! Downloading, Paused, Stopped, Completed, Failed }` carried over exactly)
//! and on `DownloaderState` for the sizing/capability fields.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::registry::ItemId;
use crate::segmenter::Segment;
use crate::transport::{AuthenticationInfo, ProxyInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadState {
    Queued,
    Downloading,
    Paused,
    Stopped,
    Completed,
    Failed,
}

impl DownloadState {
    pub fn is_terminal_success(self) -> bool {
        matches!(self, DownloadState::Completed)
    }

    pub fn is_active(self) -> bool {
        matches!(self, DownloadState::Downloading)
    }
}

/// A read-only, internally-consistent copy of an item's fields, obtained
/// under the item's lock in one shot. Per the concurrency model, UI/API
/// consumers must go through this accessor rather than calling multiple
/// getters, which could observe a torn update.
#[derive(Debug, Clone, Serialize)]
pub struct ItemSnapshot {
    pub id: u64,
    pub url: String,
    pub dest_path: PathBuf,
    pub display_name: String,
    pub total_size: Option<u64>,
    pub downloaded_size: u64,
    pub supports_range: bool,
    pub segment_count: usize,
    pub state: DownloadState,
    pub last_attempt_at: Option<String>,
    pub description: String,
    pub speed_limit_bps: u64,
    pub transfer_rate_bps: u64,
}

struct Inner {
    url: String,
    dest_path: PathBuf,
    display_name: String,
    total_size: Option<u64>,
    supports_range: bool,
    segments: Vec<Segment>,
    state: DownloadState,
    last_attempt_at: Option<String>,
    description: String,
    speed_limit_bps: u64,
    transfer_rate_bps: u64,
    proxy: Option<ProxyInfo>,
    authentication: Option<AuthenticationInfo>,
    force_helper: bool,
}

/// A single resource download. Cheap to clone via `Arc`; every mutable field
/// lives behind a single `RwLock` (state/sizing) plus a per-segment atomic
/// progress counter array (high-frequency updates from concurrent segment
/// tasks without lock contention).
pub struct DownloadItem {
    id: ItemId,
    inner: RwLock<Inner>,
    segment_progress: RwLock<Vec<Arc<AtomicU64>>>,
    pub cancel_token: RwLock<CancellationToken>,
}

impl DownloadItem {
    pub fn new(id: ItemId, url: String, dest_path: PathBuf, display_name: String) -> Self {
        Self {
            id,
            inner: RwLock::new(Inner {
                url,
                dest_path,
                display_name,
                total_size: None,
                supports_range: false,
                segments: Vec::new(),
                state: DownloadState::Queued,
                last_attempt_at: None,
                description: String::new(),
                speed_limit_bps: 0,
                transfer_rate_bps: 0,
                proxy: None,
                authentication: None,
                force_helper: false,
            }),
            segment_progress: RwLock::new(Vec::new()),
            cancel_token: RwLock::new(CancellationToken::new()),
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub async fn state(&self) -> DownloadState {
        self.inner.read().await.state
    }

    pub async fn set_state(&self, state: DownloadState) {
        self.inner.write().await.state = state;
    }

    pub async fn url(&self) -> String {
        self.inner.read().await.url.clone()
    }

    /// Replace the URL while preserving progress ("refresh link").
    pub async fn set_url(&self, url: String) {
        self.inner.write().await.url = url;
    }

    pub async fn dest_path(&self) -> PathBuf {
        self.inner.read().await.dest_path.clone()
    }

    pub async fn proxy(&self) -> Option<ProxyInfo> {
        self.inner.read().await.proxy.clone()
    }

    pub async fn set_proxy(&self, proxy: Option<ProxyInfo>) {
        self.inner.write().await.proxy = proxy;
    }

    pub async fn authentication(&self) -> Option<AuthenticationInfo> {
        self.inner.read().await.authentication.clone()
    }

    /// Set when the Enqueue API is told `video_mode: true` explicitly,
    /// overriding the scheduler's host-based video-site detection.
    pub async fn set_force_helper(&self, force: bool) {
        self.inner.write().await.force_helper = force;
    }

    pub async fn force_helper(&self) -> bool {
        self.inner.read().await.force_helper
    }

    pub async fn set_speed_limit(&self, bps: u64) {
        self.inner.write().await.speed_limit_bps = bps;
    }

    pub async fn speed_limit(&self) -> u64 {
        self.inner.read().await.speed_limit_bps
    }

    pub async fn set_transfer_rate(&self, bps: u64) {
        self.inner.write().await.transfer_rate_bps = bps;
    }

    pub async fn touch_last_attempt(&self) {
        self.inner.write().await.last_attempt_at = Some(iso8601_now());
    }

    /// Records the probe outcome and freezes the segment layout. Resets the
    /// cancellation token for a fresh run.
    pub async fn initialize_run(
        &self,
        total_size: Option<u64>,
        supports_range: bool,
        segments: Vec<Segment>,
        display_name: Option<String>,
    ) {
        let mut inner = self.inner.write().await;
        inner.total_size = total_size;
        inner.supports_range = supports_range;
        inner.segments = segments.clone();
        if let Some(name) = display_name {
            if !name.is_empty() {
                inner.display_name = name;
            }
        }
        drop(inner);

        *self.cancel_token.write().await = CancellationToken::new();

        let counters: Vec<Arc<AtomicU64>> = segments.iter().map(|_| Arc::new(AtomicU64::new(0))).collect();
        *self.segment_progress.write().await = counters;
    }

    pub async fn segments(&self) -> Vec<Segment> {
        self.inner.read().await.segments.clone()
    }

    pub async fn segment_counter(&self, index: usize) -> Arc<AtomicU64> {
        self.segment_progress.read().await[index].clone()
    }

    pub async fn set_segment_progress(&self, index: usize, bytes: u64) {
        let progress = self.segment_progress.read().await;
        if let Some(counter) = progress.get(index) {
            counter.store(bytes, Ordering::Relaxed);
        }
    }

    /// `downloaded_size = sum(segment_progress)`, satisfying the progress
    /// accounting invariant by construction rather than by a separately
    /// tracked running total.
    pub async fn downloaded_size(&self) -> u64 {
        self.segment_progress
            .read()
            .await
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    pub async fn reset_progress(&self) {
        for counter in self.segment_progress.read().await.iter() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub async fn snapshot(&self) -> ItemSnapshot {
        let inner = self.inner.read().await;
        let downloaded = self.downloaded_size().await;
        ItemSnapshot {
            id: self.id.value(),
            url: inner.url.clone(),
            dest_path: inner.dest_path.clone(),
            display_name: inner.display_name.clone(),
            total_size: inner.total_size,
            downloaded_size: downloaded,
            supports_range: inner.supports_range,
            segment_count: inner.segments.len(),
            state: inner.state,
            last_attempt_at: inner.last_attempt_at.clone(),
            description: inner.description.clone(),
            speed_limit_bps: inner.speed_limit_bps,
            transfer_rate_bps: inner.transfer_rate_bps,
        }
    }

    pub async fn set_description(&self, description: String) {
        self.inner.write().await.description = description;
    }

    /// Reconstructs an item's state from a history record. Segmentation is
    /// not restored — the next run re-probes and re-segments, adopting the
    /// on-disk sidecar/file size for resume the same way a fresh run does;
    /// `downloaded_size`/`total_size` here are only for display until then.
    pub async fn restore_from_history(
        &self,
        state: DownloadState,
        downloaded_size: u64,
        total_size: Option<u64>,
        last_attempt_at: Option<String>,
        description: String,
    ) {
        {
            let mut inner = self.inner.write().await;
            inner.state = state;
            inner.total_size = total_size;
            inner.last_attempt_at = last_attempt_at;
            inner.description = description;
        }
        *self.segment_progress.write().await = vec![Arc::new(AtomicU64::new(downloaded_size))];
    }
}

fn iso8601_now() -> String {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs();
    // Minimal dependency-free ISO-8601 (UTC) formatting, good enough for a
    // history snapshot's `last_attempt_at` field — avoids pulling in a date/time
    // crate for one field.
    let days = secs / 86_400;
    let time_of_day = secs % 86_400;
    let (h, m, s) = (time_of_day / 3600, (time_of_day % 3600) / 60, time_of_day % 60);
    let (y, mo, d) = civil_from_days(days as i64);
    format!("{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z", y, mo, d, h, m, s)
}

/// Howard Hinnant's days-from-civil algorithm, inverted: converts a day
/// count since the Unix epoch into a `(year, month, day)` triple.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn downloaded_size_sums_segment_counters() {
        let item = DownloadItem::new(
            ItemId::from_raw(1),
            "http://x/a".into(),
            PathBuf::from("/tmp/a"),
            "a".into(),
        );
        item.initialize_run(
            Some(100),
            true,
            vec![Segment { start: 0, end: 50 }, Segment { start: 50, end: 100 }],
            None,
        )
        .await;
        item.set_segment_progress(0, 20).await;
        item.set_segment_progress(1, 30).await;
        assert_eq!(item.downloaded_size().await, 50);
    }

    #[tokio::test]
    async fn reset_progress_zeroes_all_counters() {
        let item = DownloadItem::new(ItemId::from_raw(1), "u".into(), PathBuf::from("/tmp/a"), "a".into());
        item.initialize_run(Some(10), true, vec![Segment { start: 0, end: 10 }], None)
            .await;
        item.set_segment_progress(0, 7).await;
        item.reset_progress().await;
        assert_eq!(item.downloaded_size().await, 0);
    }
}
