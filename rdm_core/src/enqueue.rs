//! Enqueue API (component C9) — the one entry point every caller (CLI,
//! local control endpoint, history replay) goes through to turn a URL into
//! a running item.
//!
//! Grounded on `mainwindow.cpp`'s `addDownload` (filename derivation from
//! the URL path, category bookkeeping under "All Downloads", the
//! overwrite-confirmation prompt before a download starts) reworked around
//! the registry/scheduler split instead of a `QMap<QString, QList<...>>`
//! of raw pointers.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DownloadError;
use crate::item::{DownloadItem, DownloadState};
use crate::registry::{IdAllocator, ItemId};
use crate::scheduler::Scheduler;

pub const ALL_DOWNLOADS: &str = "All Downloads";

/// Caller-supplied answer to "this file already exists, overwrite it?".
#[async_trait]
pub trait OverwritePrompt: Send + Sync {
    async fn confirm_overwrite(&self, dest_path: &std::path::Path) -> bool;
}

/// Always overwrites without asking — the default when the caller hasn't
/// opted into prompting.
pub struct AlwaysOverwrite;

#[async_trait]
impl OverwritePrompt for AlwaysOverwrite {
    async fn confirm_overwrite(&self, _dest_path: &std::path::Path) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueRequest {
    pub url: String,
    pub dest_dir: Option<PathBuf>,
    pub category: Option<String>,
    pub filename: Option<String>,
    pub video_mode: bool,
}

/// Tracks which category each item belongs to, in addition to the implicit
/// "All Downloads" membership every item has. A plain side table rather
/// than a field on `DownloadItem` — categories are a view over items, not
/// part of an item's own state.
#[derive(Default)]
pub struct CategoryIndex {
    memberships: tokio::sync::Mutex<std::collections::HashMap<ItemId, Vec<String>>>,
}

impl CategoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, id: ItemId, category: Option<&str>) {
        let mut memberships = self.memberships.lock().await;
        let entry = memberships.entry(id).or_insert_with(|| vec![ALL_DOWNLOADS.to_string()]);
        if let Some(category) = category {
            if !entry.iter().any(|c| c == category) {
                entry.push(category.to_string());
            }
        }
    }

    pub async fn categories_for(&self, id: ItemId) -> Vec<String> {
        self.memberships.lock().await.get(&id).cloned().unwrap_or_default()
    }
}

pub struct EnqueueApi {
    scheduler: Arc<Scheduler>,
    ids: Arc<IdAllocator>,
    categories: CategoryIndex,
    default_dest_dir: PathBuf,
    prompt_before_overwrite: bool,
    overwrite_prompt: Arc<dyn OverwritePrompt>,
}

impl EnqueueApi {
    /// `ids` must be the same allocator used to reconstruct history items
    /// on startup, so freshly enqueued items never collide with restored
    /// ones.
    pub fn new(scheduler: Arc<Scheduler>, ids: Arc<IdAllocator>, default_dest_dir: PathBuf, prompt_before_overwrite: bool) -> Self {
        Self {
            scheduler,
            ids,
            categories: CategoryIndex::new(),
            default_dest_dir,
            prompt_before_overwrite,
            overwrite_prompt: Arc::new(AlwaysOverwrite),
        }
    }

    pub fn with_overwrite_prompt(mut self, prompt: Arc<dyn OverwritePrompt>) -> Self {
        self.overwrite_prompt = prompt;
        self
    }

    pub fn categories(&self) -> &CategoryIndex {
        &self.categories
    }

    /// Validates and admits a request, returning the new item's id, or
    /// `None` if the caller declined an overwrite prompt (not an error —
    /// the user simply chose not to proceed).
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Option<ItemId>, DownloadError> {
        let parsed = url::Url::parse(&request.url).map_err(|e| DownloadError::InvalidUrl(e.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(DownloadError::InvalidUrl(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        let filename = request
            .filename
            .filter(|f| !f.is_empty())
            .or_else(|| derive_filename(&parsed))
            .unwrap_or_else(synthesize_filename);

        let dest_dir = request.dest_dir.unwrap_or_else(|| self.default_dest_dir.clone());
        let dest_path = dest_dir.join(&filename);

        if self.prompt_before_overwrite && tokio::fs::metadata(&dest_path).await.is_ok() {
            if !self.overwrite_prompt.confirm_overwrite(&dest_path).await {
                return Ok(None);
            }
        }

        let id = self.ids.allocate();
        let item = Arc::new(DownloadItem::new(id, request.url.clone(), dest_path, filename));
        item.set_state(DownloadState::Queued).await;
        if request.video_mode {
            item.set_force_helper(true).await;
        }

        self.categories.record(id, request.category.as_deref()).await;
        self.scheduler.enqueue(item).await;
        Ok(Some(id))
    }
}

/// Derives a filename from the URL path's final component, matching
/// `QFileInfo(url.path()).fileName()`: the part after the last `/`, empty
/// if the path ends in a slash or has none.
fn derive_filename(url: &url::Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() {
        None
    } else {
        Some(last.to_string())
    }
}

/// `download_${timestamp}` fallback when the URL gives no usable name, per
/// the original's `"download_" + QDateTime::currentDateTime().toString(...)`.
fn synthesize_filename() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("download_{}", secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_filename_from_url_path() {
        let url = url::Url::parse("http://example.com/dir/movie.mp4").unwrap();
        assert_eq!(derive_filename(&url), Some("movie.mp4".to_string()));
    }

    #[test]
    fn empty_path_segment_yields_none() {
        let url = url::Url::parse("http://example.com/dir/").unwrap();
        assert_eq!(derive_filename(&url), None);
    }

    #[test]
    fn synthesized_filename_has_expected_prefix() {
        assert!(synthesize_filename().starts_with("download_"));
    }
}
