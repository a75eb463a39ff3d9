//! CLI command implementations

use crate::output::{self, OutputFormat};
use anyhow::Context as _;
use indicatif::{ProgressBar, ProgressStyle};
use qoeprobe_core::{
    device::SystemDeviceInfo,
    report::{write_report, MetricsReport},
    DeviceInfoProvider, EngineHandle, HeadlessPlayer, HttpFirstByteProbe, HttpTransport,
    MetricsAggregator, MetricsSession, MetricsSnapshot, ObservedTransport, QoeConfig,
    SourceCatalog, StreamSource,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

/// Options shared by every command
pub struct Context {
    pub format: OutputFormat,
    pub config: Option<PathBuf>,
    pub history: PathBuf,
}

impl Context {
    fn load_config(&self) -> anyhow::Result<QoeConfig> {
        match &self.config {
            Some(path) => QoeConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display())),
            None => Ok(QoeConfig::default()),
        }
    }

    fn load_history(&self) -> anyhow::Result<MetricsAggregator> {
        MetricsAggregator::load(&self.history)
            .with_context(|| format!("loading history {}", self.history.display()))
    }

    fn save_history(&self, aggregator: &MetricsAggregator) -> anyhow::Result<()> {
        aggregator
            .save(&self.history)
            .with_context(|| format!("saving history {}", self.history.display()))
    }
}

/// Flags of the measure command, overriding the config file
pub struct MeasureOptions {
    pub provider: Option<String>,
    pub sessions: usize,
    pub duration: Option<f64>,
    pub auto_record: bool,
    pub min_measure_time: Option<f64>,
    pub upscale_threshold: Option<f64>,
    pub width: Option<u32>,
}

impl MeasureOptions {
    fn apply(&self, config: &mut QoeConfig) {
        if let Some(duration) = self.duration {
            config.player.watch_duration = duration;
        }
        if self.auto_record {
            config.measure.auto_record = true;
        }
        if let Some(secs) = self.min_measure_time {
            config.measure.min_measure_time = secs;
        }
        if let Some(threshold) = self.upscale_threshold {
            config.measure.upscale_threshold = threshold;
        }
        if let Some(width) = self.width {
            config.player.viewport_width = Some(width);
        }
    }
}

/// Run measurement sessions against a stream
pub async fn measure(ctx: &Context, url: &str, options: MeasureOptions) -> anyhow::Result<()> {
    let url = Url::parse(url)?;
    let mut config = ctx.load_config()?;
    options.apply(&mut config);
    config.validate()?;

    let catalog = SourceCatalog::default();
    let source = match &options.provider {
        Some(provider) => StreamSource::new(url.as_str(), provider.as_str()),
        None => catalog.source_for(url.as_str()),
    };

    let mut aggregator = ctx.load_history()?;
    let sessions = options.sessions.max(1);

    if ctx.format == OutputFormat::Text {
        println!(
            "Measuring {} ({}) - {} session(s)",
            source.video_url, source.cdn_provider, sessions
        );
    }

    let mut snapshots = Vec::with_capacity(sessions);
    for n in 1..=sessions {
        let snapshot = run_session(ctx, &url, &config, n, sessions).await?;
        aggregator.append(&source, &snapshot);
        ctx.save_history(&aggregator)?;

        if ctx.format == OutputFormat::Text {
            println!("\nSession {}/{}", n, sessions);
            println!("{}", output::snapshot_table(&snapshot));
        }
        snapshots.push(snapshot);
    }

    match ctx.format {
        OutputFormat::Json => output::print_json(&snapshots)?,
        OutputFormat::Text => {
            if let Some(metric) = aggregator.get(&source.video_url) {
                println!("\nAverages over {} recorded session(s):", metric.record_count());
                println!("{}", output::metrics_table(std::slice::from_ref(metric)));
            }
        }
    }

    Ok(())
}

/// One fresh session: new transport, engine and collector
async fn run_session(
    ctx: &Context,
    url: &Url,
    config: &QoeConfig,
    n: usize,
    total: usize,
) -> anyhow::Result<MetricsSnapshot> {
    let http = HttpTransport::new(config.player.request_timeout())?;
    let stats = http.stats();
    let engine = EngineHandle::new(stats.clone(), config.player.viewport_width);
    let probe = Arc::new(HttpFirstByteProbe::new(config.player.request_timeout())?);
    let (sink, mut records) = mpsc::unbounded_channel();

    let session = MetricsSession::attach(url.clone(), engine, probe, config.measure.clone(), Some(sink))?;
    let transport = ObservedTransport::new(http, session.events());
    let player = HeadlessPlayer::new(
        url.clone(),
        transport,
        stats,
        session.events(),
        config.player.clone(),
    );

    let progress = if ctx.format == OutputFormat::Text {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {prefix} {msg}")?);
        bar.set_prefix(format!("session {}/{}", n, total));
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    } else {
        ProgressBar::hidden()
    };

    let playback = player.run();
    tokio::pin!(playback);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    let summary = loop {
        tokio::select! {
            result = &mut playback => break result,
            _ = ticker.tick() => {
                if let Ok(live) = session.snapshot().await {
                    progress.set_message(output::live_line(&live));
                }
            }
        }
    };
    progress.finish_and_clear();

    // A stream that fails to play is still a measurement of its CDN
    let snapshot = match summary {
        Ok(summary) => {
            info!(
                session = n,
                loaded = summary.segments_loaded,
                failed = summary.segments_failed,
                ended = summary.ended,
                "Playback finished"
            );
            if summary.ended && config.measure.auto_record {
                match records.recv().await {
                    Some(snapshot) => snapshot,
                    None => session.record().await?,
                }
            } else {
                session.record().await?
            }
        }
        Err(e) => {
            warn!(session = n, url = %url, error = %e, "Playback failed, recording partial metrics");
            if ctx.format == OutputFormat::Text {
                println!("Playback of {} failed: {}", url, e);
            }
            session.record().await?
        }
    };

    session.detach().await?;
    Ok(snapshot)
}

/// List the source catalog
pub fn sources(ctx: &Context) -> anyhow::Result<()> {
    let catalog = SourceCatalog::default();
    match ctx.format {
        OutputFormat::Json => output::print_json(&catalog),
        OutputFormat::Text => {
            println!("{}", output::sources_table(&catalog));
            Ok(())
        }
    }
}

/// Show recorded metrics, all sources or one
pub fn show(ctx: &Context, url: Option<&str>) -> anyhow::Result<()> {
    let aggregator = ctx.load_history()?;

    let Some(url) = url else {
        return match ctx.format {
            OutputFormat::Json => output::print_json(aggregator.metrics()),
            OutputFormat::Text => {
                if aggregator.is_empty() {
                    println!("No metrics recorded yet");
                } else {
                    println!("{}", output::metrics_table(aggregator.metrics()));
                }
                Ok(())
            }
        };
    };

    let metric = aggregator
        .get(url)
        .with_context(|| format!("no metrics recorded for {}", url))?;

    match ctx.format {
        OutputFormat::Json => output::print_json(metric),
        OutputFormat::Text => {
            println!("{}", output::metrics_table(std::slice::from_ref(metric)));
            if metric.record_count() > 0 {
                println!("\nRecords:");
                println!("{}", output::records_table(metric));
            }
            Ok(())
        }
    }
}

/// Reset one source or every source
pub fn reset(ctx: &Context, url: Option<&str>, all: bool) -> anyhow::Result<()> {
    let mut aggregator = ctx.load_history()?;

    match (url, all) {
        (_, true) => {
            aggregator.reset_all();
            println!("Reset {} source(s)", aggregator.len());
        }
        (Some(url), false) => {
            aggregator.reset(url)?;
            println!("Reset {}", url);
        }
        (None, false) => anyhow::bail!("give a source URL or --all"),
    }

    ctx.save_history(&aggregator)
}

/// Write the metrics report with device information.
///
/// On failure prints the cause and exits with status 1.
pub async fn export(
    ctx: &Context,
    output_dir: &Path,
    ipinfo_url: Option<String>,
    device_id_file: PathBuf,
) -> anyhow::Result<()> {
    match write_export(ctx, output_dir, ipinfo_url, device_id_file).await {
        Ok(path) => {
            match ctx.format {
                OutputFormat::Json => output::print_json(&serde_json::json!({ "path": path }))?,
                OutputFormat::Text => println!("Report written to {}", path.display()),
            }
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Report export failed");
            eprintln!("{}", export_failure(&e));
            std::process::exit(1);
        }
    }
}

/// Build and write the report. Only reads the history.
async fn write_export(
    ctx: &Context,
    output_dir: &Path,
    ipinfo_url: Option<String>,
    device_id_file: PathBuf,
) -> anyhow::Result<PathBuf> {
    let aggregator = ctx.load_history()?;

    let mut device = SystemDeviceInfo::new(device_id_file)?;
    if let Some(url) = ipinfo_url {
        device = device.with_ipinfo_url(url);
    }

    let device_info = device.device_info().await?;
    let report = MetricsReport::new(device_info, aggregator.into_metrics());
    let path = write_report(output_dir, &report)
        .with_context(|| format!("writing report to {}", output_dir.display()))?;
    Ok(path)
}

fn export_failure(e: &anyhow::Error) -> String {
    format!("Failed to export report: {:#}", e)
}
