use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;

use rdm_core::config::Config;
use rdm_core::enqueue::EnqueueRequest;
use rdm_core::item::DownloadState;
use rdm_core::Core;

mod terminal_observer;
use terminal_observer::TerminalProgressObserver;

#[derive(Parser)]
#[command(name = "rdm", about = "Rust Download Manager")]
struct Args {
    /// One or more URLs to download
    #[arg(required = true)]
    urls: Vec<String>,

    /// Destination directory (defaults to the configured download directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Maximum concurrently active downloads
    #[arg(short = 'j', long)]
    max_concurrent: Option<usize>,

    /// Global speed limit in bytes/sec (0 = unlimited)
    #[arg(short, long)]
    speed_limit: Option<u64>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut config = Config::load();
    if let Some(n) = args.max_concurrent {
        config.max_concurrent_downloads = n.max(1);
    }
    if let Some(bps) = args.speed_limit {
        config.global_speed_limit_bps = bps;
        config.speed_limit_enabled = bps > 0;
    }

    let core = Core::start(config).await;

    let observer = TerminalProgressObserver::new();
    let observer_task = tokio::spawn(observer.run(core.events.subscribe()));

    let mut watch = core.events.subscribe();
    let mut pending = std::collections::HashSet::new();

    for url in &args.urls {
        let request = EnqueueRequest {
            url: url.clone(),
            dest_dir: args.output_dir.clone(),
            category: None,
            filename: None,
            video_mode: false,
        };
        match core.enqueue.enqueue(request).await {
            Ok(Some(id)) => {
                println!("Queued #{}: {}", id, url);
                pending.insert(id);
            }
            Ok(None) => println!("Skipped (overwrite declined): {}", url),
            Err(e) => eprintln!("Could not queue {}: {}", url, e),
        }
    }

    let start = Instant::now();
    while !pending.is_empty() {
        match watch.recv().await {
            Ok(rdm_core::events::DownloadEvent::StateChanged { item_id, state })
                if matches!(state, DownloadState::Completed | DownloadState::Failed | DownloadState::Stopped) =>
            {
                pending.remove(&item_id);
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    println!("All downloads finished in {:.2}s", start.elapsed().as_secs_f64());

    if let Err(e) = core.save_history().await {
        eprintln!("Could not save history: {}", e);
    }

    observer_task.abort();
}
