//! Per-source metric history
//!
//! Accumulates one record per measured quantity for every finalized session
//! snapshot and keeps each quantity's arithmetic mean over all its records.

use crate::{types::MetricsSnapshot, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// One recorded value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub value: f64,
}

/// History of one quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDetail {
    pub unit: String,
    pub average_value: f64,
    pub records: Vec<MetricRecord>,
}

impl MetricDetail {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            average_value: 0.0,
            records: Vec::new(),
        }
    }

    /// Append a record and recompute the mean over all records
    pub fn append(&mut self, timestamp: i64, value: f64) {
        self.records.push(MetricRecord { timestamp, value });
        let sum: f64 = self.records.iter().map(|r| r.value).sum();
        self.average_value = sum / self.records.len() as f64;
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.average_value = 0.0;
    }
}

/// Identity of a stream source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamSource {
    pub video_url: String,
    pub cdn_provider: String,
}

impl StreamSource {
    pub fn new(video_url: impl Into<String>, cdn_provider: impl Into<String>) -> Self {
        Self {
            video_url: video_url.into(),
            cdn_provider: cdn_provider.into(),
        }
    }
}

/// Recorded history of one stream source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    #[serde(flatten)]
    pub source: StreamSource,
    pub time_to_first_byte: MetricDetail,
    pub throughput: MetricDetail,
    pub latency: MetricDetail,
    pub error_rate: MetricDetail,
    pub average_bitrate: MetricDetail,
    #[serde(rename = "stall_rate")]
    pub stall_count: MetricDetail,
    pub upscaling_time: MetricDetail,
}

impl Metric {
    /// Empty history with the unit of every quantity
    pub fn new(source: StreamSource) -> Self {
        Self {
            source,
            time_to_first_byte: MetricDetail::new("ms"),
            throughput: MetricDetail::new("mbps"),
            latency: MetricDetail::new("ms"),
            error_rate: MetricDetail::new("%"),
            average_bitrate: MetricDetail::new("kbps"),
            stall_count: MetricDetail::new("time"),
            upscaling_time: MetricDetail::new("second"),
        }
    }

    pub fn append(&mut self, snapshot: &MetricsSnapshot, timestamp: i64) {
        self.time_to_first_byte.append(timestamp, snapshot.time_to_first_byte_ms);
        self.throughput.append(timestamp, snapshot.throughput_mbps());
        self.latency.append(timestamp, snapshot.latency_ms);
        self.error_rate.append(timestamp, snapshot.error_rate);
        self.average_bitrate.append(timestamp, snapshot.average_bitrate_kbps);
        self.stall_count.append(timestamp, snapshot.stall_count as f64);
        self.upscaling_time.append(timestamp, snapshot.upscaling_time_secs);
    }

    /// Clear every record, keeping the source identity
    pub fn reset(&mut self) {
        for detail in self.details_mut() {
            detail.reset();
        }
    }

    /// Quantities in report order, keyed by their JSON name
    pub fn details(&self) -> [(&'static str, &MetricDetail); 7] {
        [
            ("time_to_first_byte", &self.time_to_first_byte),
            ("throughput", &self.throughput),
            ("latency", &self.latency),
            ("error_rate", &self.error_rate),
            ("average_bitrate", &self.average_bitrate),
            ("stall_rate", &self.stall_count),
            ("upscaling_time", &self.upscaling_time),
        ]
    }

    fn details_mut(&mut self) -> [&mut MetricDetail; 7] {
        [
            &mut self.time_to_first_byte,
            &mut self.throughput,
            &mut self.latency,
            &mut self.error_rate,
            &mut self.average_bitrate,
            &mut self.stall_count,
            &mut self.upscaling_time,
        ]
    }

    /// Number of recorded sessions
    pub fn record_count(&self) -> usize {
        self.details().iter().map(|(_, d)| d.records.len()).max().unwrap_or(0)
    }
}

/// Per-source history of recorded sessions
#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
    metrics: Vec<Metric>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_metrics(metrics: Vec<Metric>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn into_metrics(self) -> Vec<Metric> {
        self.metrics
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn get(&self, video_url: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.source.video_url == video_url)
    }

    /// Metric for `source`, created empty on first use
    pub fn get_or_create(&mut self, source: &StreamSource) -> &mut Metric {
        let idx = match self
            .metrics
            .iter()
            .position(|m| m.source.video_url == source.video_url)
        {
            Some(idx) => idx,
            None => {
                debug!(url = %source.video_url, provider = %source.cdn_provider, "New metric source");
                self.metrics.push(Metric::new(source.clone()));
                self.metrics.len() - 1
            }
        };
        &mut self.metrics[idx]
    }

    /// Append a snapshot recorded now
    pub fn append(&mut self, source: &StreamSource, snapshot: &MetricsSnapshot) -> &Metric {
        self.append_at(source, snapshot, chrono::Utc::now().timestamp_millis())
    }

    /// Append a snapshot with an explicit timestamp (ms since epoch)
    pub fn append_at(
        &mut self,
        source: &StreamSource,
        snapshot: &MetricsSnapshot,
        timestamp: i64,
    ) -> &Metric {
        let metric = self.get_or_create(source);
        metric.append(snapshot, timestamp);
        info!(
            url = %metric.source.video_url,
            records = metric.record_count(),
            "Snapshot appended"
        );
        metric
    }

    /// Clear one source's records, keeping its identity
    pub fn reset(&mut self, video_url: &str) -> Result<()> {
        let metric = self
            .metrics
            .iter_mut()
            .find(|m| m.source.video_url == video_url)
            .ok_or_else(|| Error::UnknownSource(video_url.to_string()))?;
        metric.reset();
        info!(url = %video_url, "Metric reset");
        Ok(())
    }

    pub fn reset_all(&mut self) {
        for metric in &mut self.metrics {
            metric.reset();
        }
        info!(sources = self.metrics.len(), "All metrics reset");
    }

    /// Load history from a JSON file. A missing file is an empty history.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let metrics: Vec<Metric> = serde_json::from_str(&content)?;
        debug!(path = %path.display(), sources = metrics.len(), "History loaded");
        Ok(Self::from_metrics(metrics))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.metrics)?;
        std::fs::write(path.as_ref(), json)?;
        debug!(path = %path.as_ref().display(), "History saved");
        Ok(())
    }
}
