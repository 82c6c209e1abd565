//! History store (component C8) — durable snapshot of every item across
//! process restarts.
//!
//! Grounded on `mainwindow.cpp`'s `saveDownloadHistory`/`loadDownloadHistory`
//! (one JSON array written on every create/delete and on shutdown, read back
//! to reconstruct items and re-admit unfinished ones into the queue), adapted
//! from Qt's `QJsonDocument`/`QStandardPaths` to `serde_json` and a
//! config-resolved path instead of the desktop folder.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::item::{DownloadItem, DownloadState};
use crate::registry::{IdAllocator, ItemId};

/// One persisted item. Field names mirror [`crate::item::ItemSnapshot`]
/// rather than the runtime's internal representation, so the on-disk format
/// is stable even if `DownloadItem`'s internals change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub url: String,
    pub dest_path: PathBuf,
    pub display_name: String,
    pub state: DownloadState,
    pub downloaded_size: u64,
    pub total_size: Option<u64>,
    pub last_attempt_at: Option<String>,
    pub description: String,
}

impl HistoryRecord {
    pub async fn from_item(item: &DownloadItem) -> Self {
        let snap = item.snapshot().await;
        Self {
            url: snap.url,
            dest_path: snap.dest_path,
            display_name: snap.display_name,
            state: snap.state,
            downloaded_size: snap.downloaded_size,
            total_size: snap.total_size,
            last_attempt_at: snap.last_attempt_at,
            description: snap.description,
        }
    }
}

/// Writes every item currently in the registry to `path` as a JSON array.
/// An empty snapshot removes the file entirely, matching the original's
/// "nothing to remember" cleanup rather than persisting an empty array.
pub async fn save(path: &Path, records: &[HistoryRecord]) -> std::io::Result<()> {
    if records.is_empty() {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_vec_pretty(records).map_err(std::io::Error::other)?;
    tokio::fs::write(path, json).await
}

/// Loads a snapshot and reconstructs items, handing each a freshly allocated
/// [`ItemId`]. A missing file is not an error — it just means no history
/// yet. A corrupt or unparsable file is logged and treated as empty; this
/// must never prevent startup.
pub async fn load(path: &Path, ids: &IdAllocator) -> Vec<(ItemId, DownloadItem)> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("[history] no snapshot at {:?}", path);
            return Vec::new();
        }
        Err(e) => {
            log::warn!("[history] could not read snapshot {:?}: {} — starting empty", path, e);
            return Vec::new();
        }
    };

    let records: Vec<HistoryRecord> = match serde_json::from_str(&text) {
        Ok(r) => r,
        Err(e) => {
            log::warn!("[history] corrupt snapshot {:?}: {} — starting empty", path, e);
            return Vec::new();
        }
    };

    let mut out = Vec::with_capacity(records.len());
    for record in records {
        let id = ids.allocate();
        let item = DownloadItem::new(id, record.url, record.dest_path, record.display_name);
        item.restore_from_history(
            record.state,
            record.downloaded_size,
            record.total_size,
            record.last_attempt_at,
            record.description,
        )
        .await;
        out.push((id, item));
    }
    log::info!("[history] loaded {} item(s) from {:?}", out.len(), path);
    out
}

/// True for items that should be re-admitted to the queue on load — every
/// state except the two that represent "don't touch this without the user
/// asking": a finished download and one the user explicitly paused.
pub fn should_requeue_on_load(state: DownloadState) -> bool {
    !matches!(state, DownloadState::Completed | DownloadState::Paused)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(state: DownloadState) -> HistoryRecord {
        HistoryRecord {
            url: "http://example.com/a.zip".to_string(),
            dest_path: PathBuf::from("/tmp/a.zip"),
            display_name: "a.zip".to_string(),
            state,
            downloaded_size: 10,
            total_size: Some(100),
            last_attempt_at: Some("2026-01-01T00:00:00Z".to_string()),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        save(&path, &[sample(DownloadState::Stopped)]).await.unwrap();

        let ids = IdAllocator::new();
        let loaded = load(&path, &ids).await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].1.state().await, DownloadState::Stopped);
        assert_eq!(loaded[0].1.downloaded_size().await, 10);
    }

    #[tokio::test]
    async fn empty_snapshot_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        save(&path, &[sample(DownloadState::Queued)]).await.unwrap();
        assert!(path.exists());
        save(&path, &[]).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn corrupt_snapshot_loads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let ids = IdAllocator::new();
        let loaded = load(&path, &ids).await;
        assert!(loaded.is_empty());
    }

    #[test]
    fn requeues_everything_except_completed_and_paused() {
        assert!(should_requeue_on_load(DownloadState::Queued));
        assert!(should_requeue_on_load(DownloadState::Downloading));
        assert!(should_requeue_on_load(DownloadState::Stopped));
        assert!(should_requeue_on_load(DownloadState::Failed));
        assert!(!should_requeue_on_load(DownloadState::Completed));
        assert!(!should_requeue_on_load(DownloadState::Paused));
    }
}
