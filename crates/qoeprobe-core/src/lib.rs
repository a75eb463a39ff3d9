//! QoeProbe Core - Quality-of-Experience measurement for adaptive-bitrate video
//!
//! This crate provides:
//! - A per-session metrics collector driven by playback engine events
//! - Time-to-first-byte probing and request error accounting
//! - Per-source aggregation of recorded sessions, with JSON persistence
//! - Report export with device identity
//! - A headless HLS engine so streams can be measured outside a browser
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         QoeProbe Core                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  events   ┌──────────────┐  ┌──────────────┐  │
//! │  │   Headless   │──────────▶│   Metrics    │◀─│  TTFB Probe  │  │
//! │  │    Player    │           │   Session    │  └──────────────┘  │
//! │  └──────┬───────┘           └──────┬───────┘                    │
//! │         │                          │                            │
//! │  ┌──────┴───────┐           ┌──────┴───────┐                    │
//! │  │  Observed    │ requests  │   Session    │                    │
//! │  │  Transport   │──────────▶│  Collector   │                    │
//! │  └──────────────┘           └──────┬───────┘                    │
//! │                                    │ snapshots                  │
//! │                             ┌──────┴───────┐  ┌──────────────┐  │
//! │                             │   Metrics    │─▶│    Report    │  │
//! │                             │  Aggregator  │  │    Export    │  │
//! │                             └──────────────┘  └──────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod timing;
pub mod collector;
pub mod session;
pub mod ttfb;
pub mod transport;
pub mod manifest;
pub mod player;
pub mod aggregator;
pub mod sources;
pub mod device;
pub mod report;

pub use error::{Error, Result};
pub use types::*;
pub use config::{MeasureConfig, PlayerConfig, QoeConfig};
pub use collector::{PlaybackEngine, SessionCollector};
pub use session::{EventSender, MetricsSession, RecordSink};
pub use ttfb::{FirstByteProbe, HttpFirstByteProbe};
pub use transport::{HttpTransport, ObservedTransport, RequestObserver, Transport, TransportStats};
pub use player::{EngineHandle, EventSink, HeadlessPlayer, PlaybackSummary};
pub use aggregator::{Metric, MetricDetail, MetricsAggregator, StreamSource};
pub use sources::SourceCatalog;
pub use device::{DeviceInfo, DeviceInfoProvider, SystemDeviceInfo};
pub use report::{write_report, MetricsReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log library start-up
pub fn init() {
    tracing::info!(version = VERSION, "QoeProbe Core initialized");
}
