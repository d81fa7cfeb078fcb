use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use whip_publisher::capture;
use whip_publisher::engine::Str0mEngine;
use whip_publisher::signaling::WhipClient;
use whip_publisher::{PublisherConfig, SessionController};

#[derive(Parser, Debug)]
#[command(name = "whip-publisher")]
#[command(version, about = "Publish a camera to a WebRTC server over WHIP", long_about = None)]
struct CliArgs {
    /// JSON configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Camera index or device path
    #[arg(short = 'd', long, value_name = "DEVICE")]
    device: Option<String>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long, value_name = "FPS")]
    frame_rate: Option<u32>,

    /// Mirror horizontally and vertically
    #[arg(long)]
    flip: bool,

    /// Media server host
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Media server WebRTC port
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Stream name on the server
    #[arg(short = 'e', long, value_name = "NAME")]
    endpoint: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl CliArgs {
    fn apply(&self, config: &mut PublisherConfig) {
        let camera = &mut config.camera;
        if let Some(device) = &self.device {
            camera.device = device.clone();
        }
        if let Some(width) = self.width {
            camera.width = width;
        }
        if let Some(height) = self.height {
            camera.height = height;
        }
        if let Some(fps) = self.frame_rate {
            camera.frame_rate = fps;
        }
        if self.flip {
            camera.hflip = true;
            camera.vflip = true;
        }

        let server = &mut config.server;
        if let Some(host) = &self.host {
            server.host = host.clone();
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if let Some(endpoint) = &self.endpoint {
            server.endpoint = endpoint.clone();
        }
    }
}

fn init_log(level: &str, verbose: u8) {
    let level = match verbose {
        0 => level,
        1 => "debug",
        _ => "trace",
    };
    let filter = format!("whip_publisher={level},str0m=warn,warn");
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_log(&args.log_level, args.verbose);

    let mut config = PublisherConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!("Publishing to {}", config.whip_url()?);

    let signaling = WhipClient::new(config.signaling_timeout())?;
    let mut controller = SessionController::new(config, Str0mEngine, signaling);

    let stop = CancellationToken::new();
    let on_signal = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Stopped by user");
                on_signal.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let end = controller.run(capture::open_default, stop).await?;
    info!("Session closed ({:?})", end);
    Ok(())
}
