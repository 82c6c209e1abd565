//! Queue scheduler (component C7) — bounded-concurrency admission control
//! over the registry of items.
//!
//! Grounded on the original's `DownloadManager` (`addToQueue`, `pauseAll`,
//! `resumeAll`, `stopAll`, `setMaxConcurrentDownloads`, `setGlobalSpeedLimit`,
//! `processQueue`/`startNextInQueue`), reworked so the queue and active set
//! are guarded by a single async mutex (single-writer discipline) instead of
//! being fields directly on a `QObject` mutated from slot callbacks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::engine::DownloadStrategy;
use crate::error::DownloadError;
use crate::events::{DownloadEvent, EventBus};
use crate::item::{DownloadItem, DownloadState};
use crate::rate_limiter::RateLimiter;
use crate::registry::{ItemId, Registry};

struct QueueState {
    queue: VecDeque<ItemId>,
    active: Vec<ItemId>,
    /// Individually-paused items. Kept out of `queue` entirely so an
    /// unrelated `pump` (triggered by a new `enqueue` or another item's
    /// completion) can never pick one back up; only `resume`/`resume_all`
    /// moves an id from here back into `queue`.
    paused: Vec<ItemId>,
}

/// Owns the registry, the FIFO queue, and the active set. `max_concurrent`
/// and the global rate limit are plain atomics/shared state so they can be
/// adjusted from any caller without taking the queue lock.
pub struct Scheduler {
    registry: Mutex<Registry>,
    state: Mutex<QueueState>,
    max_concurrent: AtomicU64,
    rate_limiter: Arc<RateLimiter>,
    events: EventBus,
    http_engine: Arc<dyn DownloadStrategy>,
    helper_engine: Arc<dyn DownloadStrategy>,
    video_site_hosts: Vec<String>,
}

impl Scheduler {
    pub fn new(
        max_concurrent: usize,
        rate_limiter: Arc<RateLimiter>,
        events: EventBus,
        http_engine: Arc<dyn DownloadStrategy>,
        helper_engine: Arc<dyn DownloadStrategy>,
        video_site_hosts: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry::new()),
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                active: Vec::new(),
                paused: Vec::new(),
            }),
            max_concurrent: AtomicU64::new(max_concurrent.max(1) as u64),
            rate_limiter,
            events,
            http_engine,
            helper_engine,
            video_site_hosts,
        })
    }

    pub fn is_video_url(&self, url: &str) -> bool {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .map(|host| self.video_site_hosts.iter().any(|site| host == *site || host.ends_with(&format!(".{}", site))))
            .unwrap_or(false)
    }

    pub async fn get(&self, id: ItemId) -> Option<Arc<DownloadItem>> {
        self.registry.lock().await.get(id)
    }

    pub async fn list(&self) -> Vec<Arc<DownloadItem>> {
        self.registry.lock().await.all().cloned().collect()
    }

    /// Admits a newly-created item into the queue and attempts to start it.
    pub async fn enqueue(self: &Arc<Self>, item: Arc<DownloadItem>) -> ItemId {
        let id = item.id();
        self.registry.lock().await.insert(item.clone());
        item.set_state(DownloadState::Queued).await;
        self.events.publish(DownloadEvent::StateChanged {
            item_id: id,
            state: DownloadState::Queued,
        });
        {
            let mut state = self.state.lock().await;
            state.queue.push_back(id);
        }
        self.pump().await;
        id
    }

    /// Registers an item reconstructed from history without changing its
    /// state. `requeue` admits it into the queue (and pumps); when false the
    /// item is only made resolvable via [`Scheduler::get`] — used for
    /// `Completed`/`Paused` items on load, which must not auto-start.
    pub async fn register_existing(self: &Arc<Self>, item: Arc<DownloadItem>, requeue: bool) {
        let id = item.id();
        self.registry.lock().await.insert(item);
        if requeue {
            {
                let mut state = self.state.lock().await;
                state.queue.push_back(id);
            }
            self.pump().await;
        }
    }

    /// While there is capacity and items waiting, pop the head of the queue
    /// and start it. Admission is strict FIFO — no preemption for new items.
    pub async fn pump(self: &Arc<Self>) {
        loop {
            let max = self.max_concurrent.load(Ordering::Relaxed) as usize;
            let next_id = {
                let mut state = self.state.lock().await;
                if state.active.len() >= max {
                    None
                } else {
                    state.queue.pop_front()
                }
            };

            let Some(id) = next_id else { break };
            let Some(item) = self.registry.lock().await.get(id) else { continue };

            // Defensive: only a Queued item may be admitted. An id can only
            // reach the queue while Queued, but this guards against any
            // future caller that pushes an id without updating state first.
            if item.state().await != DownloadState::Queued {
                continue;
            }

            {
                let mut state = self.state.lock().await;
                state.active.push(id);
            }

            self.spawn_run(item);
        }
    }

    fn spawn_run(self: &Arc<Self>, item: Arc<DownloadItem>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let id = item.id();
            item.set_state(DownloadState::Downloading).await;
            scheduler.events.publish(DownloadEvent::StateChanged {
                item_id: id,
                state: DownloadState::Downloading,
            });

            let url = item.url().await;
            let engine: &Arc<dyn DownloadStrategy> = if item.force_helper().await || scheduler.is_video_url(&url) {
                &scheduler.helper_engine
            } else {
                &scheduler.http_engine
            };

            let result = engine.run(&item).await;
            scheduler.on_item_terminal(id, result).await;
        });
    }

    async fn on_item_terminal(self: &Arc<Self>, id: ItemId, result: Result<(), DownloadError>) {
        {
            let mut state = self.state.lock().await;
            state.active.retain(|active_id| *active_id != id);
        }

        let Some(item) = self.registry.lock().await.get(id) else { return };

        match result {
            Ok(()) => {
                item.set_state(DownloadState::Completed).await;
                self.events.publish(DownloadEvent::StateChanged {
                    item_id: id,
                    state: DownloadState::Completed,
                });
            }
            Err(e) if e.is_cancelled() => {
                // Pause/stop already set the item's state; nothing else to do.
            }
            Err(e) => {
                item.set_state(DownloadState::Failed).await;
                item.set_description(e.to_string()).await;
                self.events.publish(DownloadEvent::StateChanged {
                    item_id: id,
                    state: DownloadState::Failed,
                });
                self.events.publish(DownloadEvent::Failed {
                    item_id: id,
                    reason: e.to_string(),
                });
                // Failed items go back to the head of the queue so the user
                // can retry by re-running `pump` (e.g. after fixing a proxy).
                let mut state = self.state.lock().await;
                state.queue.push_front(id);
            }
        }

        self.pump().await;
    }

    pub async fn pause(self: &Arc<Self>, id: ItemId) -> Result<(), DownloadError> {
        let Some(item) = self.registry.lock().await.get(id) else {
            return Ok(());
        };
        if item.state().await != DownloadState::Downloading {
            return Ok(());
        }
        item.cancel_token.read().await.cancel();
        item.set_state(DownloadState::Paused).await;
        self.events.publish(DownloadEvent::StateChanged {
            item_id: id,
            state: DownloadState::Paused,
        });
        let mut state = self.state.lock().await;
        state.active.retain(|active_id| *active_id != id);
        state.paused.push(id);
        Ok(())
    }

    /// Resumes a single individually-paused item: moves it from the held
    /// `paused` set back into the queue and pumps. A no-op for an item that
    /// isn't currently Paused.
    pub async fn resume(self: &Arc<Self>, id: ItemId) -> Result<(), DownloadError> {
        let Some(item) = self.registry.lock().await.get(id) else {
            return Ok(());
        };
        if item.state().await != DownloadState::Paused {
            return Ok(());
        }
        {
            let mut state = self.state.lock().await;
            state.paused.retain(|paused_id| *paused_id != id);
            state.queue.push_back(id);
        }
        item.set_state(DownloadState::Queued).await;
        self.events.publish(DownloadEvent::StateChanged {
            item_id: id,
            state: DownloadState::Queued,
        });
        self.pump().await;
        Ok(())
    }

    pub async fn stop(self: &Arc<Self>, id: ItemId) -> Result<(), DownloadError> {
        let Some(item) = self.registry.lock().await.get(id) else {
            return Ok(());
        };
        item.cancel_token.read().await.cancel();

        let dest_path = item.dest_path().await;
        let segments = item.segments().await;
        let single_segment = segments.len() <= 1;
        crate::chunk_store::remove_sidecars(&dest_path, segments.len().max(1)).await;
        if single_segment {
            // In single-segment mode bytes land directly at dest_path, not a
            // sidecar, so that partial file must be deleted too.
            let _ = tokio::fs::remove_file(&dest_path).await;
        }
        item.reset_progress().await;
        item.set_state(DownloadState::Stopped).await;
        self.events.publish(DownloadEvent::StateChanged {
            item_id: id,
            state: DownloadState::Stopped,
        });

        let mut state = self.state.lock().await;
        state.active.retain(|active_id| *active_id != id);
        state.queue.retain(|queued_id| *queued_id != id);
        state.paused.retain(|paused_id| *paused_id != id);
        Ok(())
    }

    pub async fn retry(self: &Arc<Self>, id: ItemId) -> Result<(), DownloadError> {
        let Some(item) = self.registry.lock().await.get(id) else {
            return Ok(());
        };
        match item.state().await {
            DownloadState::Failed | DownloadState::Stopped => {
                item.set_state(DownloadState::Queued).await;
                self.events.publish(DownloadEvent::StateChanged {
                    item_id: id,
                    state: DownloadState::Queued,
                });
                let mut state = self.state.lock().await;
                if !state.queue.contains(&id) {
                    state.queue.push_back(id);
                }
                drop(state);
                self.pump().await;
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn pause_all(self: &Arc<Self>) {
        let active: Vec<ItemId> = self.state.lock().await.active.clone();
        for id in active {
            let _ = self.pause(id).await;
        }
    }

    /// Moves every individually-paused item back into the queue, in the
    /// order it was paused, then pumps.
    pub async fn resume_all(self: &Arc<Self>) {
        let resumed: Vec<ItemId> = {
            let mut state = self.state.lock().await;
            let paused = std::mem::take(&mut state.paused);
            for id in &paused {
                state.queue.push_back(*id);
            }
            paused
        };
        for id in &resumed {
            if let Some(item) = self.registry.lock().await.get(*id) {
                item.set_state(DownloadState::Queued).await;
                self.events.publish(DownloadEvent::StateChanged {
                    item_id: *id,
                    state: DownloadState::Queued,
                });
            }
        }
        self.pump().await;
    }

    pub async fn stop_all(self: &Arc<Self>) {
        let ids: Vec<ItemId> = {
            let state = self.state.lock().await;
            state
                .active
                .iter()
                .chain(state.queue.iter())
                .chain(state.paused.iter())
                .copied()
                .collect()
        };
        for id in ids {
            let _ = self.stop(id).await;
        }
    }

    pub fn set_max_concurrent(&self, n: usize) {
        self.max_concurrent.store(n.max(1) as u64, Ordering::Relaxed);
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::Relaxed) as usize
    }

    pub fn set_global_speed_limit(&self, bps: u64, enabled: bool) {
        self.rate_limiter.set_limit(if enabled { bps } else { 0 });
    }

    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active.len()
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Removes a terminal item from the registry entirely (used by the
    /// "clear" operation on completed/failed/stopped items).
    pub async fn remove(&self, id: ItemId) {
        let mut state = self.state.lock().await;
        state.queue.retain(|queued_id| *queued_id != id);
        state.active.retain(|active_id| *active_id != id);
        state.paused.retain(|paused_id| *paused_id != id);
        drop(state);
        self.registry.lock().await.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use async_trait::async_trait;

    struct SlowEngine;

    #[async_trait]
    impl DownloadStrategy for SlowEngine {
        async fn run(&self, _item: &Arc<DownloadItem>) -> Result<(), DownloadError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    fn test_item(id: u64, name: &str) -> Arc<DownloadItem> {
        Arc::new(DownloadItem::new(
            ItemId::from_raw(id),
            format!("http://example.com/{}", name),
            PathBuf::from(format!("/tmp/{}", name)),
            name.into(),
        ))
    }

    #[tokio::test]
    async fn paused_item_is_not_restarted_by_an_unrelated_pump() {
        let engine: Arc<dyn DownloadStrategy> = Arc::new(SlowEngine);
        let scheduler = Scheduler::new(
            1,
            Arc::new(RateLimiter::unlimited()),
            EventBus::new(),
            engine.clone(),
            engine,
            Vec::new(),
        );

        let item_a = test_item(1, "a");
        let id_a = scheduler.enqueue(item_a.clone()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(item_a.state().await, DownloadState::Downloading);

        scheduler.pause(id_a).await.unwrap();
        assert_eq!(item_a.state().await, DownloadState::Paused);
        assert_eq!(scheduler.active_count().await, 0);

        let item_b = test_item(2, "b");
        scheduler.enqueue(item_b.clone()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Enqueuing b triggers a pump; a must stay Paused, not be picked
        // back up just because a slot is free.
        assert_eq!(item_a.state().await, DownloadState::Paused);
        assert_eq!(item_b.state().await, DownloadState::Downloading);
        assert_eq!(scheduler.active_count().await, 1);
    }

    #[tokio::test]
    async fn resume_moves_paused_item_back_into_the_queue() {
        let engine: Arc<dyn DownloadStrategy> = Arc::new(SlowEngine);
        let scheduler = Scheduler::new(
            1,
            Arc::new(RateLimiter::unlimited()),
            EventBus::new(),
            engine.clone(),
            engine,
            Vec::new(),
        );

        let item_a = test_item(1, "a");
        let id_a = scheduler.enqueue(item_a.clone()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.pause(id_a).await.unwrap();
        assert_eq!(item_a.state().await, DownloadState::Paused);

        scheduler.resume(id_a).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(item_a.state().await, DownloadState::Downloading);
    }
}
