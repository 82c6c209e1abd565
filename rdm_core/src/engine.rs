//! Download engines (component C5's execution logic) plumbed behind a
//! strategy trait, generalizing the `DownloadStrategy` pattern: the item
//! state machine in [`crate::item`] owns *what* state an item is in, while an
//! engine owns *how* bytes actually get pulled for it. Two engines exist: the
//! segmented HTTP engine (grounded on `multipart_download_strategy.rs` /
//! `segment_grabber.rs`) and the external helper engine for video sites
//! ([`crate::helper`]).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::chunk_store::{self, SegmentWriter};
use crate::error::DownloadError;
use crate::events::{DownloadEvent, EventBus};
use crate::item::DownloadItem;
use crate::rate_limiter::RateLimiter;
use crate::registry::ItemId;
use crate::segmenter::{self, Segment};
use crate::transport::{ProbeResult, RequestContext, TransportClient};

const MAX_RETRIES: u32 = 3;

#[async_trait]
pub trait DownloadStrategy: Send + Sync {
    /// Drives an item from Downloading through to Completed or a returned
    /// error. `DownloadError::Cancelled` means the caller (pause/stop)
    /// already requested the abort and must not be surfaced as a failure.
    async fn run(&self, item: &Arc<DownloadItem>) -> Result<(), DownloadError>;
}

fn request_context(url: String) -> RequestContext {
    RequestContext {
        url,
        ..Default::default()
    }
}

/// The segmented HTTP engine: probe, segment, parallel ranged GETs, merge.
pub struct HttpEngine {
    rate_limiter: Arc<RateLimiter>,
    events: EventBus,
}

impl HttpEngine {
    pub fn new(rate_limiter: Arc<RateLimiter>, events: EventBus) -> Self {
        Self { rate_limiter, events }
    }

    async fn probe_or_fallback(&self, transport: &TransportClient, ctx: &RequestContext) -> (ProbeResult, bool) {
        match transport.probe(ctx).await {
            Ok(probe) => (probe, true),
            Err(e) => {
                log::warn!("[engine] probe failed for {}: {} — falling back to single-segment mode", ctx.url, e);
                (
                    ProbeResult {
                        supports_range: false,
                        total_size: None,
                        final_url: ctx.url.clone(),
                        attachment_name: None,
                        content_type: None,
                    },
                    false,
                )
            }
        }
    }
}

#[async_trait]
impl DownloadStrategy for HttpEngine {
    async fn run(&self, item: &Arc<DownloadItem>) -> Result<(), DownloadError> {
        item.touch_last_attempt().await;

        let url = item.url().await;
        let proxy = item.proxy().await;
        let transport = Arc::new(TransportClient::new(proxy.as_ref())?);

        let mut ctx = request_context(url.clone());
        ctx.authentication = item.authentication().await;

        let (probe, probed_ok) = self.probe_or_fallback(&transport, &ctx).await;
        let supports_range = probed_ok && probe.supports_range;
        let segments = segmenter::segment(probe.total_size, supports_range, None);

        item.initialize_run(probe.total_size, supports_range, segments.clone(), probe.attachment_name)
            .await;

        let dest_path = item.dest_path().await;
        let single_segment = segments.len() == 1;

        // Adopt on-disk progress for resume: sidecar size for multi-segment,
        // file size for single-segment. A zero-length segment (`end == 0`)
        // means the total size is unknown, so progress is not capped.
        for (i, segment) in segments.iter().enumerate() {
            let existing = if single_segment {
                tokio::fs::metadata(&dest_path).await.map(|m| m.len()).unwrap_or(0)
            } else {
                chunk_store::sidecar_size(&dest_path, i).await
            };
            let adopted = if segment.end > 0 { existing.min(segment.len()) } else { existing };
            item.set_segment_progress(i, adopted).await;
        }

        let cancel_token = item.cancel_token.read().await.clone();

        // A per-item speed limit narrows this item's own throughput without
        // touching the shared global limiter, which every other concurrently
        // running item also reads from — every byte still passes through
        // the global limiter first (so total throughput stays bounded),
        // then additionally through this item-local one when configured.
        let item_limit = item.speed_limit().await;
        let item_rate_limiter = (item_limit > 0).then(|| Arc::new(RateLimiter::new(item_limit)));

        let mut tasks = Vec::with_capacity(segments.len());
        for (index, segment) in segments.iter().enumerate() {
            let already = item.segment_counter(index).await.load(std::sync::atomic::Ordering::Relaxed);
            if segment.end > 0 && already >= segment.len() {
                continue; // already complete from a prior run
            }
            let transport = transport.clone();
            let ctx = ctx.clone_for_segment();
            let rate_limiter = self.rate_limiter.clone();
            let item_rate_limiter = item_rate_limiter.clone();
            let events = self.events.clone();
            let item_id = item.id();
            let cancel_token = cancel_token.clone();
            let dest_path = dest_path.clone();
            let segment = *segment;
            let counter = item.segment_counter(index).await;

            tasks.push(tokio::spawn(async move {
                download_segment(
                    index,
                    segment,
                    single_segment,
                    &dest_path,
                    &transport,
                    &ctx,
                    &rate_limiter,
                    item_rate_limiter.as_deref(),
                    &cancel_token,
                    &counter,
                    &events,
                    item_id,
                )
                .await
            }));
        }

        let rate_sampler = tokio::spawn(sample_transfer_rate(item.clone(), self.events.clone(), probe.total_size));

        let mut first_error: Option<DownloadError> = None;
        for task in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(DownloadError::Io(std::io::Error::other(join_err.to_string())));
                    }
                }
            }
        }
        rate_sampler.abort();

        if let Some(err) = first_error {
            return Err(err);
        }

        if !single_segment {
            chunk_store::merge(&dest_path, &segments, probe.total_size).await?;
        }

        self.events.publish(DownloadEvent::Finished { item_id: item.id() });
        Ok(())
    }
}

impl RequestContext {
    /// Shallow clone used per spawned segment task — segments never mutate
    /// shared header state, so this is just `Clone` under a clearer name at
    /// the call site.
    fn clone_for_segment(&self) -> Self {
        self.clone()
    }
}

#[allow(clippy::too_many_arguments)]
async fn download_segment(
    index: usize,
    segment: Segment,
    single_segment: bool,
    dest_path: &Path,
    transport: &TransportClient,
    ctx: &RequestContext,
    rate_limiter: &RateLimiter,
    item_rate_limiter: Option<&RateLimiter>,
    cancel_token: &CancellationToken,
    counter: &Arc<std::sync::atomic::AtomicU64>,
    events: &EventBus,
    item_id: ItemId,
) -> Result<(), DownloadError> {
    let mut retries = 0u32;

    loop {
        if cancel_token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let already = counter.load(std::sync::atomic::Ordering::Relaxed);
        let start = segment.start + already;
        // Single-segment mode never bounds the end of the range: a fresh
        // download (already == 0, start == 0) sends no Range header at all
        // so a server that ignores ranges just serves the whole body; a
        // resume sends only `Range: bytes={start}-`, open-ended.
        let end = if single_segment {
            None
        } else {
            Some(segment.end.saturating_sub(1))
        };

        let stream = match transport.get_stream(ctx, start, end).await {
            Ok(s) => s,
            Err(e)
                if matches!(
                    e,
                    DownloadError::Network(_) | DownloadError::Connect(_) | DownloadError::Timeout(_) | DownloadError::Dns(_)
                ) && retries < MAX_RETRIES =>
            {
                retries += 1;
                backoff(retries).await;
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut writer: SegmentWriter = if single_segment {
            chunk_store::open_direct(dest_path, already).await?
        } else {
            SegmentWriter::open(dest_path, index, already).await?
        };

        let remaining = if segment.end > 0 {
            segment.len() - already
        } else {
            u64::MAX
        };
        let mut written_this_attempt = 0u64;
        let mut stream = stream;
        let mut network_error = false;

        while let Some(chunk_result) = stream.next().await {
            if cancel_token.is_cancelled() {
                let _ = writer.flush().await;
                return Err(DownloadError::Cancelled);
            }

            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(_) => {
                    let _ = writer.flush().await;
                    network_error = true;
                    break;
                }
            };

            // Split the chunk into pieces no larger than the rate limiter's
            // per-window budget, so a low speed limit paces reads instead of
            // handing `acquire` a request it can never satisfy in one
            // window. Every byte of the chunk is still written — only the
            // final piece of a segment may be shorter, to stop at `left`.
            let mut offset = 0usize;
            let mut segment_done = false;
            while offset < chunk.len() {
                let left = remaining.saturating_sub(written_this_attempt);
                if left == 0 {
                    segment_done = true;
                    break;
                }
                let rate_cap = rate_limiter
                    .read_slice_cap()
                    .min(item_rate_limiter.map(|l| l.read_slice_cap()).unwrap_or(u64::MAX));
                let remaining_in_chunk = (chunk.len() - offset) as u64;
                let piece_len = remaining_in_chunk.min(left).min(rate_cap).max(1) as usize;
                let piece = &chunk[offset..offset + piece_len];

                rate_limiter.acquire(piece.len() as u64).await;
                if let Some(item_rate_limiter) = item_rate_limiter {
                    item_rate_limiter.acquire(piece.len() as u64).await;
                }
                writer.write_all(piece).await?;

                written_this_attempt += piece.len() as u64;
                offset += piece.len();
                let new_total = already + written_this_attempt;
                counter.store(new_total, std::sync::atomic::Ordering::Relaxed);

                events.publish(DownloadEvent::Progress {
                    item_id,
                    downloaded_size: new_total,
                    total_size: if segment.end > 0 { Some(segment.end) } else { None },
                    transfer_rate_bps: 0,
                });

                if segment.end > 0 && written_this_attempt >= remaining {
                    segment_done = true;
                    break;
                }
            }

            if segment_done {
                break;
            }
        }

        writer.flush().await?;

        if network_error {
            retries += 1;
            if retries >= MAX_RETRIES {
                return Err(DownloadError::Io(std::io::Error::other("segment exceeded max retries")));
            }
            backoff(retries).await;
            continue;
        }

        return Ok(());
    }
}

/// Samples `downloaded_size` once a second and publishes the aggregate rate,
/// per the design's "sample at 1 Hz; speed = delta bytes / delta ms". Runs
/// until aborted by the caller once all segment tasks finish.
async fn sample_transfer_rate(item: Arc<DownloadItem>, events: EventBus, total_size: Option<u64>) {
    let mut last = item.downloaded_size().await;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let current = item.downloaded_size().await;
        let delta = current.saturating_sub(last);
        last = current;
        item.set_transfer_rate(delta).await;
        events.publish(DownloadEvent::Progress {
            item_id: item.id(),
            downloaded_size: current,
            total_size,
            transfer_rate_bps: delta,
        });
    }
}

async fn backoff(retries: u32) {
    let delay_ms = 100u64 * (1u64 << retries.min(5));
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}
