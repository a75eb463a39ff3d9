//! QoeProbe CLI - Headless QoE measurement for HLS streams
//!
//! Features:
//! - Measure sessions against a stream with a headless player
//! - Per-source history of recorded sessions
//! - Source catalog listing
//! - Report export with device information

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

/// QoeProbe CLI - Stream QoE measurement toolkit
#[derive(Parser)]
#[command(name = "qoeprobe")]
#[command(version)]
#[command(about = "Measure and compare the QoE of adaptive-bitrate streams", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, global = true, default_value = "text")]
    format: String,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Metrics history file
    #[arg(long, global = true, default_value = "qoeprobe-history.json")]
    history: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure playback sessions of a stream
    Measure {
        /// URL of the master or media playlist
        url: String,

        /// CDN provider label (defaults to the catalog entry, or "Unknown")
        #[arg(short, long)]
        provider: Option<String>,

        /// Number of sessions to run
        #[arg(short = 'n', long, default_value = "1")]
        sessions: usize,

        /// Seconds to watch per session (0 = until the stream ends)
        #[arg(short, long)]
        duration: Option<f64>,

        /// Record automatically when playback reaches the end
        #[arg(long)]
        auto_record: bool,

        /// Throughput measurement window in seconds
        #[arg(long)]
        min_measure_time: Option<f64>,

        /// Fraction of the target width below which a level is upscaled
        #[arg(long)]
        upscale_threshold: Option<f64>,

        /// Viewport width in pixels
        #[arg(short, long)]
        width: Option<u32>,
    },

    /// List the source catalog
    Sources,

    /// Show recorded metrics
    Show {
        /// Only this source, with its individual records
        url: Option<String>,
    },

    /// Reset recorded metrics
    Reset {
        /// Source to reset
        url: Option<String>,

        /// Reset every source
        #[arg(long, conflicts_with = "url")]
        all: bool,
    },

    /// Export a metrics report
    Export {
        /// Directory the report file is written to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// IP information endpoint used for the ISP name
        #[arg(long)]
        ipinfo_url: Option<String>,

        /// File holding the persistent device id
        #[arg(long, default_value = "qoeprobe-device-id")]
        device_id_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins over --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    qoeprobe_core::init();

    let ctx = commands::Context {
        format: output::OutputFormat::from(cli.format.as_str()),
        config: cli.config,
        history: cli.history,
    };

    match cli.command {
        Commands::Measure {
            url,
            provider,
            sessions,
            duration,
            auto_record,
            min_measure_time,
            upscale_threshold,
            width,
        } => {
            let options = commands::MeasureOptions {
                provider,
                sessions,
                duration,
                auto_record,
                min_measure_time,
                upscale_threshold,
                width,
            };
            commands::measure(&ctx, &url, options).await?;
        }
        Commands::Sources => {
            commands::sources(&ctx)?;
        }
        Commands::Show { url } => {
            commands::show(&ctx, url.as_deref())?;
        }
        Commands::Reset { url, all } => {
            commands::reset(&ctx, url.as_deref(), all)?;
        }
        Commands::Export {
            output_dir,
            ipinfo_url,
            device_id_file,
        } => {
            commands::export(&ctx, &output_dir, ipinfo_url, device_id_file).await?;
        }
    }

    Ok(())
}
