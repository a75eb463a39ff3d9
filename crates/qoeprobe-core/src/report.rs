//! Metrics report export

use crate::{aggregator::Metric, device::DeviceInfo, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub device_info: DeviceInfo,
    pub metrics: Vec<Metric>,
}

impl MetricsReport {
    pub fn new(device_info: DeviceInfo, metrics: Vec<Metric>) -> Self {
        Self { device_info, metrics }
    }
}

/// `metrics-report-<ISO-8601 timestamp>.json`
pub fn report_file_name(at: DateTime<Utc>) -> String {
    format!(
        "metrics-report-{}.json",
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

/// Write the report as pretty JSON into `dir`, returning the file path
pub fn write_report(dir: impl AsRef<Path>, report: &MetricsReport) -> Result<PathBuf> {
    write_report_at(dir, report, Utc::now())
}

pub fn write_report_at(
    dir: impl AsRef<Path>,
    report: &MetricsReport,
    at: DateTime<Utc>,
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let path = dir.join(report_file_name(at));
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)?;
    info!(path = %path.display(), sources = report.metrics.len(), "Report exported");
    Ok(path)
}
