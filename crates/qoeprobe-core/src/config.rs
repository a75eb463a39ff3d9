//! Measurement and headless-player configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default throughput measurement window (seconds)
pub const DEFAULT_MIN_MEASURE_TIME: f64 = 10.0;

/// Default upscaling hysteresis: a level is upscaled below 90% of the target width
pub const DEFAULT_UPSCALE_THRESHOLD: f64 = 0.9;

/// Collector policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureConfig {
    /// Throughput one-shot deadline after the first play (seconds)
    pub min_measure_time: f64,
    /// Fraction of the target width below which a level counts as upscaled
    pub upscale_threshold: f64,
    /// Hand the snapshot off automatically at natural end of playback
    pub auto_record: bool,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            min_measure_time: DEFAULT_MIN_MEASURE_TIME,
            upscale_threshold: DEFAULT_UPSCALE_THRESHOLD,
            auto_record: false,
        }
    }
}

impl MeasureConfig {
    pub fn min_measure_duration(&self) -> Duration {
        Duration::from_secs_f64(self.min_measure_time)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min_measure_time.is_finite() && self.min_measure_time > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "min_measure_time must be positive, got {}",
                self.min_measure_time
            )));
        }
        if !(self.upscale_threshold > 0.0 && self.upscale_threshold <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "upscale_threshold must be in (0, 1], got {}",
                self.upscale_threshold
            )));
        }
        Ok(())
    }
}

/// Headless player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Width of the rendering surface in pixels
    pub viewport_width: Option<u32>,
    /// Maximum buffer level (seconds)
    pub max_buffer_time: f64,
    /// How long to watch before pausing (seconds, 0 = until the stream ends)
    pub watch_duration: f64,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Fraction of the bandwidth estimate the ABR may spend
    pub abr_safety_factor: f64,
    /// Start at the lowest rendition
    pub start_at_lowest: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            viewport_width: Some(1280),
            max_buffer_time: 30.0,
            watch_duration: 30.0,
            request_timeout_ms: 10000,
            abr_safety_factor: 0.8,
            start_at_lowest: true,
        }
    }
}

impl PlayerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Watch limit, `None` when playing to the end
    pub fn watch_limit(&self) -> Option<Duration> {
        (self.watch_duration > 0.0).then(|| Duration::from_secs_f64(self.watch_duration))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_buffer_time.is_finite() && self.max_buffer_time > 0.0) {
            return Err(Error::InvalidConfig("max_buffer_time must be positive".into()));
        }
        if !(self.watch_duration.is_finite() && self.watch_duration >= 0.0) {
            return Err(Error::InvalidConfig("watch_duration must not be negative".into()));
        }
        if !(self.abr_safety_factor > 0.0 && self.abr_safety_factor <= 1.0) {
            return Err(Error::InvalidConfig("abr_safety_factor must be in (0, 1]".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig("request_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QoeConfig {
    pub measure: MeasureConfig,
    pub player: PlayerConfig,
}

impl QoeConfig {
    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: QoeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.measure.validate()?;
        self.player.validate()
    }
}
