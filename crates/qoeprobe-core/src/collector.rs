//! Session metrics collector
//!
//! Observes one playback session and derives QoE metrics from the engine's
//! asynchronous events:
//! - Time to first byte (completed by an independent probe)
//! - Throughput over a one-shot measurement window
//! - Upscaling time (selected level below the target width)
//! - Stall count and mean rebuffer latency
//! - Request error rate
//! - Mean selected bitrate
//!
//! The collector is a plain state object. Every state change happens in one
//! of the `handle`/`complete_ttfb`/`on_throughput_deadline` calls, which the
//! session driver issues strictly in delivery order.

use crate::{
    config::MeasureConfig,
    timing::{OneShot, RunningMean, TimingWindow},
    types::*,
    Error,
    Result,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// What the collector reads from the bound playback engine
pub trait PlaybackEngine: Send {
    /// Cumulative media bytes moved by the engine's transport, if it exposes them
    fn media_bytes_transferred(&self) -> Option<u64>;

    /// Width of the rendering element in pixels, if there is one
    fn element_width(&self) -> Option<u32>;
}

/// Throughput one-shot measurement
#[derive(Debug, Default)]
struct ThroughputProbe {
    phase: Phase,
    started: Option<(Instant, u64)>,
    timer: OneShot,
    bps: f64,
}

/// Collects metrics for a single playback session
pub struct SessionCollector<E: PlaybackEngine> {
    id: SessionId,
    source: Url,
    config: MeasureConfig,
    state: CollectorState,
    engine: Option<E>,
    is_playing: bool,

    /// Mirror of the engine's quality levels
    levels: Vec<QualityLevel>,
    selected: Option<usize>,
    native_width: u32,

    ttfb: Phase,
    ttfb_value: Option<Duration>,

    throughput: ThroughputProbe,

    upscaling: TimingWindow,
    upscaling_phase: Phase,

    rebuffer: TimingWindow,
    latency: RunningMean,
    stall_count: u32,

    bitrate: RunningMean,

    request_count: u64,
    failed_count: u64,
    error_rate: f64,
}

impl<E: PlaybackEngine> SessionCollector<E> {
    /// Create an idle collector for one stream source
    pub fn new(source: Url, config: MeasureConfig) -> Self {
        Self {
            id: SessionId::new(),
            source,
            config,
            state: CollectorState::Idle,
            engine: None,
            is_playing: false,
            levels: Vec::new(),
            selected: None,
            native_width: 0,
            ttfb: Phase::Pending,
            ttfb_value: None,
            throughput: ThroughputProbe::default(),
            upscaling: TimingWindow::new(),
            upscaling_phase: Phase::Pending,
            rebuffer: TimingWindow::new(),
            latency: RunningMean::default(),
            stall_count: 0,
            bitrate: RunningMean::default(),
            request_count: 0,
            failed_count: 0,
            error_rate: 0.0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn config(&self) -> &MeasureConfig {
        &self.config
    }

    fn set_state(&mut self, new_state: CollectorState) -> Result<()> {
        if !self.state.can_transition_to(new_state) {
            return Err(Error::Internal(format!(
                "invalid collector transition: {} -> {}",
                self.state, new_state
            )));
        }
        info!(session_id = %self.id, from = %self.state, to = %new_state, "Collector state transition");
        self.state = new_state;
        Ok(())
    }

    /// Bind to a freshly constructed engine. TTFB measurement starts now.
    pub fn attach(&mut self, engine: E) -> Result<()> {
        self.set_state(CollectorState::Attached)?;
        self.engine = Some(engine);
        self.ttfb.begin();
        info!(session_id = %self.id, url = %self.source, "Collector attached");
        Ok(())
    }

    /// Dispatch one engine event.
    ///
    /// Returns the finalized snapshot when natural end of playback triggers
    /// an automatic record.
    pub fn handle(&mut self, event: PlaybackEvent) -> Option<MetricsSnapshot> {
        if self.state != CollectorState::Attached {
            debug!(session_id = %self.id, event = event.name(), state = %self.state, "Ignoring event");
            return None;
        }

        let now = Instant::now();
        debug!(session_id = %self.id, event = event.name(), "Playback event");

        match event {
            PlaybackEvent::Play => self.on_play(now),
            PlaybackEvent::Pause => self.early_stop(now),
            PlaybackEvent::Ended => return self.on_ended(now),
            PlaybackEvent::Waiting => self.on_waiting(now),
            PlaybackEvent::Playing => self.on_playing(now),
            PlaybackEvent::QualityAdded(level) => self.on_quality_added(level),
            PlaybackEvent::QualityChanged { selected_index } => {
                self.on_quality_changed(selected_index, now)
            }
            PlaybackEvent::RequestIssued => self.request_count += 1,
            PlaybackEvent::RequestCompleted { failed } => self.on_request_completed(failed),
            PlaybackEvent::Error { message, fatal } => {
                warn!(session_id = %self.id, fatal, "Engine error: {}", message);
            }
        }

        None
    }

    fn on_play(&mut self, now: Instant) {
        self.is_playing = true;

        if let Some(level) = self.selected_level() {
            if self.is_upscaled(&level) {
                self.open_upscaling(now);
            }
        }

        if self.throughput.phase == Phase::Pending {
            let bytes = self.bytes_transferred().unwrap_or(0);
            self.throughput.started = Some((now, bytes));
            self.throughput.timer.arm(now, self.config.min_measure_duration());
            self.throughput.phase.begin();
            debug!(
                session_id = %self.id,
                window_secs = self.config.min_measure_time,
                "Throughput measurement armed"
            );
        }
    }

    fn on_ended(&mut self, now: Instant) -> Option<MetricsSnapshot> {
        self.early_stop(now);
        self.finalize();
        if self.config.auto_record {
            info!(session_id = %self.id, "Auto-recording at end of playback");
            Some(self.snapshot())
        } else {
            None
        }
    }

    fn on_waiting(&mut self, now: Instant) {
        self.stall_count += 1;
        self.rebuffer.open(now);
        debug!(session_id = %self.id, stalls = self.stall_count, "Stall started");
    }

    fn on_playing(&mut self, now: Instant) {
        if let Some(span) = self.rebuffer.close(now) {
            let mean = self.latency.push(duration_ms(span));
            debug!(
                session_id = %self.id,
                rebuffer_ms = duration_ms(span),
                mean_ms = mean,
                "Stall ended"
            );
        }
    }

    fn on_quality_added(&mut self, level: QualityLevel) {
        self.native_width = self.native_width.max(level.width);
        self.levels.push(level);
    }

    fn on_quality_changed(&mut self, selected_index: usize, now: Instant) {
        self.selected = Some(selected_index);
        let Some(level) = self.selected_level() else {
            debug!(session_id = %self.id, selected_index, "Selected level is unknown");
            return;
        };

        let mean = self.bitrate.push(level.bitrate_kbps());
        debug!(session_id = %self.id, level = %level, average_kbps = mean, "Quality changed");

        if !self.is_playing {
            return;
        }

        if self.is_upscaled(&level) {
            self.open_upscaling(now);
        } else {
            self.close_upscaling(now);
        }
    }

    fn on_request_completed(&mut self, failed: bool) {
        if failed {
            self.failed_count += 1;
        }
        debug_assert!(
            self.failed_count <= self.request_count,
            "request completed without being issued"
        );
        self.error_rate = if self.request_count == 0 {
            0.0
        } else {
            self.failed_count as f64 / self.request_count as f64 * 100.0
        };
    }

    /// Pause, end and record all stop measuring the same way
    fn early_stop(&mut self, now: Instant) {
        if self.throughput.timer.is_pending() {
            self.compute_throughput(now);
        }
        self.close_upscaling(now);
        self.is_playing = false;
    }

    fn finalize(&mut self) {
        if self.state == CollectorState::Attached {
            // Attached -> Finalized is always valid
            let _ = self.set_state(CollectorState::Finalized);
        }
        self.upscaling_phase.settle();
    }

    fn compute_throughput(&mut self, now: Instant) {
        if self.throughput.phase.is_settled() {
            return;
        }
        let Some((start, start_bytes)) = self.throughput.started else {
            return;
        };
        self.throughput.timer.cancel();

        let bytes = self.bytes_transferred().unwrap_or(start_bytes);
        let transferred = bytes.saturating_sub(start_bytes);
        let elapsed = now.saturating_duration_since(start).as_secs_f64();

        self.throughput.bps = if elapsed > 0.0 {
            transferred as f64 * 8.0 / elapsed
        } else {
            0.0
        };
        self.throughput.phase.settle();

        info!(
            session_id = %self.id,
            bytes = transferred,
            elapsed_secs = elapsed,
            throughput_mbps = self.throughput.bps / 1_000_000.0,
            "Throughput measured"
        );
    }

    /// Deadline of the pending throughput one-shot, if any
    pub fn throughput_deadline(&self) -> Option<Instant> {
        if self.state != CollectorState::Attached {
            return None;
        }
        self.throughput.timer.deadline()
    }

    /// Called when the throughput deadline elapses
    pub fn on_throughput_deadline(&mut self) {
        if self.state != CollectorState::Attached {
            return;
        }
        let now = Instant::now();
        if self.throughput.timer.fire(now) {
            self.compute_throughput(now);
        }
    }

    /// Deliver the result of the TTFB probe
    pub fn complete_ttfb(&mut self, result: Result<Duration>) {
        if self.state == CollectorState::Detached || self.ttfb.is_settled() {
            return;
        }
        match result {
            Ok(elapsed) => {
                info!(session_id = %self.id, ttfb_ms = duration_ms(elapsed), "Time to first byte measured");
                self.ttfb_value = Some(elapsed);
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Time to first byte measurement failed");
            }
        }
        self.ttfb.settle();
    }

    /// Explicit record: stop measuring and return the best-effort snapshot
    pub fn record(&mut self) -> MetricsSnapshot {
        if self.state == CollectorState::Attached {
            self.early_stop(Instant::now());
            self.finalize();
        }
        self.snapshot()
    }

    /// Live snapshot of every metric
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Instant::now();
        MetricsSnapshot {
            time_to_first_byte_ms: self.ttfb_value.map(duration_ms).unwrap_or(0.0),
            ttfb_measuring: self.ttfb.is_measuring(),
            throughput_bps: self.throughput.bps,
            throughput_measuring: self.throughput.phase.is_measuring(),
            error_rate: self.error_rate,
            request_count: self.request_count,
            failed_request_count: self.failed_count,
            stall_count: self.stall_count,
            upscaling_time_secs: self.upscaling.total(now).as_secs_f64(),
            upscaling_measuring: self.upscaling_phase.is_measuring(),
            average_bitrate_kbps: self.bitrate.mean(),
            latency_ms: self.latency.mean(),
        }
    }

    /// Tear down: cancel the deadline and release the engine
    pub fn detach(&mut self) -> Option<E> {
        if self.state == CollectorState::Detached {
            return None;
        }
        self.throughput.timer.cancel();
        self.is_playing = false;
        // Every live state may detach
        let _ = self.set_state(CollectorState::Detached);
        self.engine.take()
    }

    /// Lesser of the highest native width and the element width
    pub fn target_width(&self) -> u32 {
        match self.engine.as_ref().and_then(|e| e.element_width()) {
            Some(element) => self.native_width.min(element),
            None => self.native_width,
        }
    }

    /// True if `level` renders below the hysteresis margin of the target width
    pub fn is_upscaled(&self, level: &QualityLevel) -> bool {
        let target = self.target_width();
        target > 0 && (level.width as f64) < target as f64 * self.config.upscale_threshold
    }

    fn selected_level(&self) -> Option<QualityLevel> {
        self.selected.and_then(|i| self.levels.get(i)).copied()
    }

    fn bytes_transferred(&self) -> Option<u64> {
        self.engine.as_ref().and_then(|e| e.media_bytes_transferred())
    }

    fn open_upscaling(&mut self, now: Instant) {
        if self.upscaling.open(now) {
            self.upscaling_phase.begin();
            debug!(session_id = %self.id, target_width = self.target_width(), "Upscaling started");
        }
    }

    fn close_upscaling(&mut self, now: Instant) {
        if let Some(span) = self.upscaling.close(now) {
            debug!(
                session_id = %self.id,
                span_secs = span.as_secs_f64(),
                total_secs = self.upscaling.accumulated().as_secs_f64(),
                "Upscaling stopped"
            );
        }
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
