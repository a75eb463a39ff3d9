//! Output formatting for CLI

use chrono::{TimeZone, Utc};
use console::style;
use qoeprobe_core::{Metric, MetricsSnapshot, SourceCatalog};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

/// Yellow while still measuring, green once settled
fn phase_value(value: String, measuring: bool) -> String {
    if measuring {
        style(value).yellow().to_string()
    } else {
        style(value).green().to_string()
    }
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Metric")]
    metric: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

pub fn snapshot_table(snapshot: &MetricsSnapshot) -> String {
    let rows = vec![
        SnapshotRow {
            metric: "Time to first byte",
            value: phase_value(
                format!("{:.0} ms", snapshot.time_to_first_byte_ms),
                snapshot.ttfb_measuring,
            ),
        },
        SnapshotRow {
            metric: "Throughput",
            value: phase_value(
                format!("{:.2} Mbps", snapshot.throughput_mbps()),
                snapshot.throughput_measuring,
            ),
        },
        SnapshotRow {
            metric: "Latency",
            value: format!("{:.0} ms", snapshot.latency_ms),
        },
        SnapshotRow {
            metric: "Error rate",
            value: format!(
                "{:.1} % ({}/{})",
                snapshot.error_rate, snapshot.failed_request_count, snapshot.request_count
            ),
        },
        SnapshotRow {
            metric: "Average bitrate",
            value: format!("{:.0} kbps", snapshot.average_bitrate_kbps),
        },
        SnapshotRow {
            metric: "Stalls",
            value: snapshot.stall_count.to_string(),
        },
        SnapshotRow {
            metric: "Upscaling time",
            value: phase_value(
                format!("{:.2} s", snapshot.upscaling_time_secs),
                snapshot.upscaling_measuring,
            ),
        },
    ];
    Table::new(rows).with(Style::rounded()).to_string()
}

/// One-line live view for the progress spinner
pub fn live_line(snapshot: &MetricsSnapshot) -> String {
    format!(
        "ttfb {} | tput {} | stalls {} | bitrate {:.0} kbps | errors {:.1}% | upscaled {}",
        phase_value(
            format!("{:.0}ms", snapshot.time_to_first_byte_ms),
            snapshot.ttfb_measuring
        ),
        phase_value(
            format!("{:.2}Mbps", snapshot.throughput_mbps()),
            snapshot.throughput_measuring
        ),
        snapshot.stall_count,
        snapshot.average_bitrate_kbps,
        snapshot.error_rate,
        phase_value(
            format!("{:.1}s", snapshot.upscaling_time_secs),
            snapshot.upscaling_measuring
        ),
    )
}

#[derive(Tabled)]
struct SourceRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "URL")]
    url: String,
}

pub fn sources_table(catalog: &SourceCatalog) -> String {
    let rows: Vec<SourceRow> = catalog
        .groups()
        .iter()
        .flat_map(|group| {
            group.videos.iter().map(move |source| SourceRow {
                file: group.file.clone(),
                provider: source.cdn_provider.clone(),
                url: source.video_url.clone(),
            })
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Sessions")]
    sessions: usize,
    #[tabled(rename = "TTFB (ms)")]
    ttfb: String,
    #[tabled(rename = "Throughput (Mbps)")]
    throughput: String,
    #[tabled(rename = "Latency (ms)")]
    latency: String,
    #[tabled(rename = "Errors (%)")]
    error_rate: String,
    #[tabled(rename = "Bitrate (kbps)")]
    bitrate: String,
    #[tabled(rename = "Stalls")]
    stalls: String,
    #[tabled(rename = "Upscaling (s)")]
    upscaling: String,
    #[tabled(rename = "URL")]
    url: String,
}

/// Per-source averages
pub fn metrics_table(metrics: &[Metric]) -> String {
    let rows: Vec<MetricRow> = metrics
        .iter()
        .map(|m| MetricRow {
            provider: m.source.cdn_provider.clone(),
            sessions: m.record_count(),
            ttfb: format!("{:.0}", m.time_to_first_byte.average_value),
            throughput: format!("{:.2}", m.throughput.average_value),
            latency: format!("{:.0}", m.latency.average_value),
            error_rate: format!("{:.1}", m.error_rate.average_value),
            bitrate: format!("{:.0}", m.average_bitrate.average_value),
            stalls: format!("{:.1}", m.stall_count.average_value),
            upscaling: format!("{:.2}", m.upscaling_time.average_value),
            url: m.source.video_url.clone(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Recorded at")]
    at: String,
    #[tabled(rename = "TTFB")]
    ttfb: String,
    #[tabled(rename = "Throughput")]
    throughput: String,
    #[tabled(rename = "Latency")]
    latency: String,
    #[tabled(rename = "Errors")]
    error_rate: String,
    #[tabled(rename = "Bitrate")]
    bitrate: String,
    #[tabled(rename = "Stalls")]
    stalls: String,
    #[tabled(rename = "Upscaling")]
    upscaling: String,
}

/// Individual records of one source
pub fn records_table(metric: &Metric) -> String {
    let value = |detail: &qoeprobe_core::MetricDetail, i: usize, precision: usize| {
        detail
            .records
            .get(i)
            .map(|r| format!("{:.*} {}", precision, r.value, detail.unit))
            .unwrap_or_default()
    };

    let rows: Vec<RecordRow> = (0..metric.record_count())
        .map(|i| RecordRow {
            index: i + 1,
            at: metric
                .time_to_first_byte
                .records
                .get(i)
                .and_then(|r| Utc.timestamp_millis_opt(r.timestamp).single())
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            ttfb: value(&metric.time_to_first_byte, i, 0),
            throughput: value(&metric.throughput, i, 2),
            latency: value(&metric.latency, i, 0),
            error_rate: value(&metric.error_rate, i, 1),
            bitrate: value(&metric.average_bitrate, i, 0),
            stalls: value(&metric.stall_count, i, 0),
            upscaling: value(&metric.upscaling_time, i, 2),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qoeprobe_core::StreamSource;

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::from("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from("text"), OutputFormat::Text);
        assert_eq!(OutputFormat::from("table"), OutputFormat::Text);
    }

    #[test]
    fn test_metrics_table_lists_provider() {
        let mut metric = Metric::new(StreamSource::new("https://a.example.com/m.m3u8", "Cloudflare"));
        metric.append(&MetricsSnapshot::default(), 0);
        let table = metrics_table(&[metric.clone()]);
        assert!(table.contains("Cloudflare"));
        assert!(records_table(&metric).contains("1970-01-01 00:00:00"));
    }

    #[test]
    fn test_sources_table_has_every_entry() {
        let table = sources_table(&SourceCatalog::default());
        assert!(table.contains("File 5"));
        assert!(table.contains("Byteplus"));
    }
}
