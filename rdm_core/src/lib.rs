//! Core download engine library: rate limiting, segmentation, transport,
//! chunk storage, the per-item state machine, the helper-process engine,
//! the queue scheduler, history persistence, the enqueue entry point, and
//! process configuration. Downstream crates (CLI, local control endpoint)
//! depend on this crate rather than reimplementing any of it.

pub mod chunk_store;
pub mod config;
pub mod engine;
pub mod enqueue;
pub mod error;
pub mod events;
pub mod helper;
pub mod history;
pub mod item;
pub mod progress;
pub mod rate_limiter;
pub mod registry;
pub mod scheduler;
pub mod segmenter;
pub mod transport;

use std::sync::Arc;

use config::Config;
use engine::{DownloadStrategy, HttpEngine};
use enqueue::EnqueueApi;
use events::EventBus;
use helper::{HelperConfig, HelperEngine};
use rate_limiter::RateLimiter;
use registry::ItemId;
use scheduler::Scheduler;

/// Bundles every long-lived component into the one handle a binary crate
/// needs: `Core::start` wires rate limiter, engines, scheduler and the
/// enqueue API together and replays history; `Core::shutdown` persists a
/// fresh snapshot.
pub struct Core {
    pub config: Config,
    pub scheduler: Arc<Scheduler>,
    pub enqueue: EnqueueApi,
    pub events: EventBus,
}

impl Core {
    /// Assembles every component from `config`, loads history (re-admitting
    /// unfinished items into the queue), and returns a ready-to-use handle.
    pub async fn start(config: Config) -> Self {
        let events = EventBus::new();
        let rate_limiter = Arc::new(RateLimiter::new(if config.speed_limit_enabled {
            config.global_speed_limit_bps
        } else {
            0
        }));

        let http_engine: Arc<dyn DownloadStrategy> =
            Arc::new(HttpEngine::new(rate_limiter.clone(), events.clone()));
        let helper_engine: Arc<dyn DownloadStrategy> = Arc::new(HelperEngine::new(
            HelperConfig {
                program: config.video_helper_program.clone(),
                extra_args: config.video_helper_args.clone(),
            },
            events.clone(),
        ));

        let scheduler = Scheduler::new(
            config.max_concurrent_downloads,
            rate_limiter,
            events.clone(),
            http_engine,
            helper_engine,
            config.video_site_hosts.clone(),
        );

        let ids = Arc::new(registry::IdAllocator::new());
        for (_id, item) in history::load(&config.history_path, &ids).await {
            let state = item.state().await;
            let requeue = history::should_requeue_on_load(state);
            scheduler.register_existing(Arc::new(item), requeue).await;
        }

        let enqueue_api = EnqueueApi::new(scheduler.clone(), ids, config.download_dir.clone(), false);

        Self {
            config,
            scheduler,
            enqueue: enqueue_api,
            events,
        }
    }

    /// Writes a snapshot of every known item to `config.history_path`. Call
    /// on graceful shutdown and after any create/delete, per the design.
    pub async fn save_history(&self) -> std::io::Result<()> {
        let items = self.scheduler.list().await;
        let mut records = Vec::with_capacity(items.len());
        for item in &items {
            records.push(history::HistoryRecord::from_item(item).await);
        }
        history::save(&self.config.history_path, &records).await
    }

    pub async fn snapshot_of(&self, id: ItemId) -> Option<item::ItemSnapshot> {
        let item = self.scheduler.get(id).await?;
        Some(item.snapshot().await)
    }

    pub async fn snapshots(&self) -> Vec<item::ItemSnapshot> {
        let mut out = Vec::new();
        for item in self.scheduler.list().await {
            out.push(item.snapshot().await);
        }
        out
    }
}
