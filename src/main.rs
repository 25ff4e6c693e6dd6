//! Stereo MJPEG streaming server

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use stereo_mjpeg_streamer::capture::platform::detect_platform;
use stereo_mjpeg_streamer::config::{Config, SourceKind};
use stereo_mjpeg_streamer::{AppContext, Pipelines, StreamingServer};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Parser, Debug)]
#[command(name = "stereo-streamer")]
#[command(about = "MJPEG-over-HTTP streaming for Raspberry Pi stereo cameras")]
#[command(version)]
struct Cli {
    /// Path to configuration file (defaults to ./config.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<String>,

    /// HTTP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve generated frames instead of capturing from cameras
    #[arg(long)]
    test_mode: bool,

    /// Only use the left camera
    #[arg(long)]
    single: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).with_target(false).init();

    info!("Stereo MJPEG streamer starting");

    let config = load_config(&cli)?;
    info!(
        platform = ?detect_platform(),
        left_enabled = config.camera.left.enabled,
        right_enabled = config.camera.right.enabled,
        "Configuration loaded"
    );

    let mut pipelines = Pipelines::detect(&config.camera);
    if !pipelines.start_recording() {
        error!("No camera available, not starting the server");
        return Ok(());
    }

    let context = Arc::new(AppContext::from_pipelines(&pipelines, &config));
    info!(page = ?context.page_variant(), "Serving viewer page");

    let bind_addr = config.server.bind_addr();
    let server = StreamingServer::bind(&bind_addr, context)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    let stats_interval = config.server.stats_interval_seconds;

    info!("Streaming started, press Ctrl+C to stop");
    tokio::select! {
        _ = server.run() => {}
        _ = log_stats_periodically(&pipelines, stats_interval) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Shutting down");
        }
    }

    pipelines.stop_recording();
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => load_from(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => load_from(Path::new(DEFAULT_CONFIG_PATH))?,
        None => {
            info!("No configuration file, using defaults");
            Config::default()
        }
    };

    if let Some(bind) = &cli.bind {
        config.server.bind_ip = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.test_mode {
        config.camera.left.source = SourceKind::TestPattern;
        config.camera.right.source = SourceKind::TestPattern;
    }
    if cli.single {
        config.camera.right.enabled = false;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_from(path: &Path) -> Result<Config> {
    info!(config_path = %path.display(), "Loading configuration");
    Config::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

async fn log_stats_periodically(pipelines: &Pipelines, interval_secs: u64) {
    if interval_secs == 0 {
        return std::future::pending().await;
    }

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.tick().await;
    loop {
        interval.tick().await;
        pipelines.log_stats();
    }
}
