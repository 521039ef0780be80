use anyhow::Context;
use camera_livestream::{
    CameraVersion, LiveStream, ServerBinding, Settings, StreamConfig, SyntheticCamera,
};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Serve a synthetic test-pattern camera as an HTTP multipart live stream.
#[derive(Parser, Debug)]
#[command(name = "livestream", version, about)]
struct Cli {
    /// JSON file with `stream` and/or `server` sections
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    path: Option<String>,
    #[arg(long)]
    hostname: Option<String>,
    #[arg(long)]
    bind: Option<String>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    fps: Option<u32>,
    /// One of JPEG, GIF, PNG, PPM, TGA, BMP
    #[arg(long)]
    encoding: Option<String>,
    #[arg(long)]
    quality: Option<u8>,
    /// Camera module generation (1 or 2), used for resolution limits
    #[arg(long, default_value_t = 2)]
    camera_version: u8,
    /// Give up on camera operations after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    stream: Option<StreamConfig>,
    #[serde(default)]
    server: Option<ServerBinding>,
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let file = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<ConfigFile>(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => ConfigFile::default(),
    };
    let mut settings = Settings::new(
        file.stream.unwrap_or_default(),
        file.server.unwrap_or_default(),
    )?;

    let version = CameraVersion::try_from(cli.camera_version)?;
    if let Some(port) = cli.port {
        settings.set_port(port);
    }
    if let Some(path) = &cli.path {
        settings.set_pathname(path);
    }
    if let Some(hostname) = &cli.hostname {
        settings.set_hostname(hostname)?;
    }
    if let Some(bind) = &cli.bind {
        settings.set_bind_address(bind)?;
    }
    if let Some(width) = cli.width {
        settings.set_width(width, version)?;
    }
    if let Some(height) = cli.height {
        settings.set_height(height, version)?;
    }
    if let Some(fps) = cli.fps {
        settings.set_fps(fps)?;
    }
    if let Some(encoding) = &cli.encoding {
        settings.set_encoding(encoding)?;
    }
    if let Some(quality) = cli.quality {
        settings.set_quality(quality)?;
    }
    settings.set_operation_timeout(cli.timeout_ms.map(Duration::from_millis))?;
    settings.set_verbose_mode(cli.verbose);
    Ok(settings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    let stream = LiveStream::with_settings(SyntheticCamera::new(), settings);

    let url = stream.start().await?;
    log::info!("Open {} in a browser; Ctrl+C to stop", url);

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down ({} clients connected)", stream.connected_clients());
    stream.stop().await?;
    Ok(())
}
