//! Headless HLS playback engine
//!
//! Plays a stream without decoding it: segments are downloaded in order
//! while a playback buffer is modelled on the runtime clock. The engine
//! emits the same events a media element would, so a collector can measure
//! it like any browser player.

use crate::{
    collector::PlaybackEngine,
    config::PlayerConfig,
    manifest::{self, SegmentList, Variant},
    transport::{RequestKind, Transport, TransportRequest, TransportStats},
    types::{PlaybackEvent, QualityLevel},
    Result,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// EWMA weight of the newest bandwidth sample
const EWMA_ALPHA: f64 = 0.2;

/// Receives the events an engine emits
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PlaybackEvent);
}

impl EventSink for mpsc::UnboundedSender<PlaybackEvent> {
    fn emit(&self, event: PlaybackEvent) {
        let _ = self.send(event);
    }
}

/// Collector-facing view of a headless player
#[derive(Debug, Clone)]
pub struct EngineHandle {
    stats: TransportStats,
    viewport_width: Option<u32>,
}

impl EngineHandle {
    pub fn new(stats: TransportStats, viewport_width: Option<u32>) -> Self {
        Self { stats, viewport_width }
    }
}

impl PlaybackEngine for EngineHandle {
    fn media_bytes_transferred(&self) -> Option<u64> {
        Some(self.stats.media_bytes_transferred())
    }

    fn element_width(&self) -> Option<u32> {
        self.viewport_width
    }
}

/// Exponentially weighted bandwidth estimate
#[derive(Debug, Clone)]
pub struct BandwidthEstimator {
    alpha: f64,
    estimate: Option<f64>,
}

impl BandwidthEstimator {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, estimate: None }
    }

    /// Add a download sample; returns the new estimate in bits/s
    pub fn sample(&mut self, bytes: usize, elapsed: Duration) -> Option<f64> {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return self.estimate;
        }
        let bps = bytes as f64 * 8.0 / secs;
        self.estimate = Some(match self.estimate {
            Some(prev) => self.alpha * bps + (1.0 - self.alpha) * prev,
            None => bps,
        });
        self.estimate
    }

    pub fn estimate(&self) -> Option<f64> {
        self.estimate
    }
}

impl Default for BandwidthEstimator {
    fn default() -> Self {
        Self::new(EWMA_ALPHA)
    }
}

/// Highest variant whose bandwidth fits `estimate * safety`, or the lowest
pub fn select_level(variants: &[Variant], estimate: f64, safety: f64) -> usize {
    let budget = estimate * safety;
    variants
        .iter()
        .rposition(|v| v.bandwidth as f64 <= budget)
        .unwrap_or(0)
}

/// Playback buffer model, in media seconds
#[derive(Debug, Default)]
struct BufferModel {
    buffered: f64,
    played: f64,
    started: bool,
    stalled: bool,
}

impl BufferModel {
    /// Let `elapsed` of wall time pass
    fn advance(&mut self, elapsed: Duration) {
        if !self.started || self.stalled {
            return;
        }
        let consumed = self.buffered.min(elapsed.as_secs_f64());
        self.buffered -= consumed;
        self.played += consumed;
    }

    fn buffered(&self) -> Duration {
        Duration::from_secs_f64(self.buffered.max(0.0))
    }

    fn remaining(&self, limit: Option<Duration>) -> Option<f64> {
        limit.map(|l| (l.as_secs_f64() - self.played).max(0.0))
    }

    fn limit_reached(&self, limit: Option<Duration>) -> bool {
        self.remaining(limit).is_some_and(|r| r <= 1e-6)
    }
}

/// Outcome of one playback run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackSummary {
    pub segments_loaded: usize,
    pub segments_failed: usize,
    pub stalls: u32,
    pub quality_switches: u32,
    /// Media time played
    pub played: Duration,
    /// Reached end of stream (as opposed to the watch limit)
    pub ended: bool,
}

/// Headless player fetching through any `Transport`
pub struct HeadlessPlayer<T, S> {
    url: Url,
    transport: T,
    stats: TransportStats,
    sink: S,
    config: PlayerConfig,
}

impl<T: Transport, S: EventSink> HeadlessPlayer<T, S> {
    /// `stats` must be the counters `transport` adds media bytes to
    pub fn new(url: Url, transport: T, stats: TransportStats, sink: S, config: PlayerConfig) -> Self {
        Self {
            url,
            transport,
            stats,
            sink,
            config,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(self.stats.clone(), self.config.viewport_width)
    }

    /// Play until the watch limit or the end of the stream
    #[instrument(skip_all, fields(url = %self.url))]
    pub async fn run(self) -> Result<PlaybackSummary> {
        let (variants, entry) = match manifest::load_variants(&self.transport, &self.url).await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.fatal(&e.to_string());
                return Err(e);
            }
        };

        let mut playlists: Vec<Option<SegmentList>> = vec![None; variants.len()];
        playlists[0] = entry;

        for variant in &variants {
            self.sink.emit(PlaybackEvent::QualityAdded(QualityLevel::new(
                variant.width,
                variant.bandwidth,
            )));
        }

        let mut level = if self.config.start_at_lowest { 0 } else { variants.len() - 1 };
        if let Err(e) = self.ensure_playlist(&variants, &mut playlists, level).await {
            self.fatal(&e.to_string());
            return Err(e);
        }

        self.sink.emit(PlaybackEvent::QualityChanged { selected_index: level });
        self.sink.emit(PlaybackEvent::Play);
        info!(variants = variants.len(), level, "Playback started");

        let limit = self.config.watch_limit();
        let max_buffer = self.config.max_buffer_time;
        let mut buffer = BufferModel::default();
        let mut estimator = BandwidthEstimator::default();
        let mut summary = PlaybackSummary::default();
        let mut index = 0;

        loop {
            let Some(segment) = playlists[level]
                .as_ref()
                .and_then(|list| list.segments.get(index))
                .cloned()
            else {
                break;
            };

            if buffer.limit_reached(limit) {
                return Ok(self.pause(buffer, summary));
            }

            let excess = buffer.buffered - max_buffer;
            if excess > 0.0 {
                let wait = buffer.remaining(limit).map_or(excess, |r| r.min(excess));
                let wait = Duration::from_secs_f64(wait);
                sleep(wait).await;
                buffer.advance(wait);
                continue;
            }

            let started_at = Instant::now();
            let fetch = self
                .transport
                .send(TransportRequest::new(segment.uri.clone(), RequestKind::Segment));
            tokio::pin!(fetch);

            let result = if buffer.started && !buffer.stalled {
                match timeout(buffer.buffered(), &mut fetch).await {
                    Ok(result) => result,
                    Err(_) => {
                        buffer.advance(started_at.elapsed());
                        buffer.stalled = true;
                        summary.stalls += 1;
                        debug!(index, "Buffer drained during download");
                        self.sink.emit(PlaybackEvent::Waiting);
                        fetch.await
                    }
                }
            } else {
                fetch.await
            };

            let elapsed = started_at.elapsed();
            if !buffer.stalled {
                buffer.advance(elapsed);
            }

            match result.and_then(|r| r.error_for_status()) {
                Ok(response) => {
                    summary.segments_loaded += 1;
                    buffer.buffered += segment.duration.as_secs_f64();

                    if !buffer.started {
                        buffer.started = true;
                        self.sink.emit(PlaybackEvent::Playing);
                    } else if buffer.stalled {
                        buffer.stalled = false;
                        self.sink.emit(PlaybackEvent::Playing);
                    }

                    if let Some(estimate) = estimator.sample(response.body.len(), elapsed) {
                        let next = select_level(&variants, estimate, self.config.abr_safety_factor);
                        if next != level {
                            match self.ensure_playlist(&variants, &mut playlists, next).await {
                                Ok(()) => {
                                    debug!(from = level, to = next, estimate_bps = estimate, "Quality switch");
                                    level = next;
                                    summary.quality_switches += 1;
                                    self.sink.emit(PlaybackEvent::QualityChanged { selected_index: level });
                                }
                                Err(e) => warn!(level = next, error = %e, "Variant unavailable, keeping quality"),
                            }
                        }
                    }
                }
                Err(e) => {
                    summary.segments_failed += 1;
                    warn!(index, url = %segment.uri, error = %e, "Segment failed, skipping");
                }
            }

            index += 1;
        }

        // Play out what is buffered
        if buffer.started && !buffer.stalled {
            let drain = buffer.remaining(limit).map_or(buffer.buffered, |r| r.min(buffer.buffered));
            let drain = Duration::from_secs_f64(drain.max(0.0));
            sleep(drain).await;
            buffer.advance(drain);
        }

        if buffer.limit_reached(limit) {
            return Ok(self.pause(buffer, summary));
        }

        summary.ended = true;
        summary.played = Duration::from_secs_f64(buffer.played);
        self.sink.emit(PlaybackEvent::Ended);
        info!(
            loaded = summary.segments_loaded,
            failed = summary.segments_failed,
            stalls = summary.stalls,
            "Playback ended"
        );
        Ok(summary)
    }

    async fn ensure_playlist(
        &self,
        variants: &[Variant],
        playlists: &mut [Option<SegmentList>],
        level: usize,
    ) -> Result<()> {
        if playlists[level].is_none() {
            playlists[level] = Some(manifest::load_segments(&self.transport, &variants[level]).await?);
        }
        Ok(())
    }

    fn pause(&self, buffer: BufferModel, mut summary: PlaybackSummary) -> PlaybackSummary {
        summary.played = Duration::from_secs_f64(buffer.played);
        self.sink.emit(PlaybackEvent::Pause);
        info!(played_secs = buffer.played, "Watch limit reached, paused");
        summary
    }

    fn fatal(&self, message: &str) {
        self.sink.emit(PlaybackEvent::Error {
            message: message.to_string(),
            fatal: true,
        });
    }
}
