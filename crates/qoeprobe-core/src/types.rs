//! Core types for qoeprobe

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a measurement session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One adaptive-bitrate rendition as the playback engine reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualityLevel {
    /// Encoded width in pixels (0 when the stream does not advertise it)
    pub width: u32,
    /// Bitrate in bits per second
    pub bitrate: u64,
}

impl QualityLevel {
    pub fn new(width: u32, bitrate: u64) -> Self {
        Self { width, bitrate }
    }

    /// Bitrate in kbps, as reported in snapshots
    pub fn bitrate_kbps(&self) -> f64 {
        self.bitrate as f64 / 1000.0
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}px@{}kbps", self.width, self.bitrate / 1000)
    }
}

/// Events delivered by the playback engine and its transport layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlaybackEvent {
    /// Playback requested
    Play,
    /// Playback paused
    Pause,
    /// End of stream reached
    Ended,
    /// Playback stalled waiting for data
    Waiting,
    /// Playback resumed after start or stall
    Playing,
    /// A new rendition became known
    QualityAdded(QualityLevel),
    /// The engine switched to the level at `selected_index`
    QualityChanged { selected_index: usize },
    /// The transport issued a request
    RequestIssued,
    /// A transport request completed
    RequestCompleted { failed: bool },
    /// Engine-level error
    Error { message: String, fatal: bool },
}

impl PlaybackEvent {
    /// Short event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackEvent::Play => "play",
            PlaybackEvent::Pause => "pause",
            PlaybackEvent::Ended => "ended",
            PlaybackEvent::Waiting => "waiting",
            PlaybackEvent::Playing => "playing",
            PlaybackEvent::QualityAdded(_) => "addqualitylevel",
            PlaybackEvent::QualityChanged { .. } => "change",
            PlaybackEvent::RequestIssued => "request",
            PlaybackEvent::RequestCompleted { .. } => "response",
            PlaybackEvent::Error { .. } => "error",
        }
    }
}

/// Collector lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectorState {
    /// Created, not bound to an engine
    Idle,
    /// Bound to an engine; measurements progressing
    Attached,
    /// Recorded or ended; terminal for the session
    Finalized,
    /// Engine released; nothing is measured anymore
    Detached,
}

impl CollectorState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: CollectorState) -> bool {
        use CollectorState::*;
        matches!(
            (self, target),
            (Idle, Attached)
                | (Idle, Detached)
                | (Attached, Finalized)
                | (Attached, Detached)
                | (Finalized, Detached)
        )
    }
}

impl std::fmt::Display for CollectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorState::Idle => write!(f, "idle"),
            CollectorState::Attached => write!(f, "attached"),
            CollectorState::Finalized => write!(f, "finalized"),
            CollectorState::Detached => write!(f, "detached"),
        }
    }
}

/// Progress of one measurement. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Pending,
    Measuring,
    Settled,
}

impl Phase {
    /// Pending -> Measuring. No effect once measuring or settled.
    pub fn begin(&mut self) {
        if *self == Phase::Pending {
            *self = Phase::Measuring;
        }
    }

    /// Any -> Settled
    pub fn settle(&mut self) {
        *self = Phase::Settled;
    }

    pub fn is_measuring(&self) -> bool {
        *self == Phase::Measuring
    }

    pub fn is_settled(&self) -> bool {
        *self == Phase::Settled
    }
}

/// Metrics of one playback session at a point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Time to first byte of the source in milliseconds
    pub time_to_first_byte_ms: f64,
    pub ttfb_measuring: bool,
    /// Throughput estimate in bits per second
    pub throughput_bps: f64,
    pub throughput_measuring: bool,
    /// Failed requests as a percentage of issued requests
    pub error_rate: f64,
    pub request_count: u64,
    pub failed_request_count: u64,
    /// Number of stalls
    pub stall_count: u32,
    /// Time spent below the target resolution in seconds
    pub upscaling_time_secs: f64,
    pub upscaling_measuring: bool,
    /// Mean bitrate of selected levels in kbps
    pub average_bitrate_kbps: f64,
    /// Mean rebuffer duration in milliseconds
    pub latency_ms: f64,
}

impl MetricsSnapshot {
    /// Throughput in Mbps
    pub fn throughput_mbps(&self) -> f64 {
        self.throughput_bps / 1_000_000.0
    }

    /// True while any measurement is still in flight
    pub fn is_partial(&self) -> bool {
        self.ttfb_measuring || self.throughput_measuring || self.upscaling_measuring
    }
}
