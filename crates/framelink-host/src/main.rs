//! Framelink host bridge: stand-alone entry point.
//!
//! Runs the bridge against a synthetic moving test pattern so consumers and
//! controllers can be developed without a render host.  An embedding engine
//! links `framelink_host` and drives [`BridgeHost::tick`] from its own frame
//! loop instead.
//!
//! # Usage
//!
//! ```text
//! framelink-host [OPTIONS]
//!
//! Options:
//!   --config <PATH>        Config file [default: platform config dir]
//!   --frames <ADDR>        Override the `frames` publisher address
//!   --commands <ADDR>      Override the `commands` subscriber address
//!   --tick-rate <HZ>       Override the host tick rate
//!   --write-config         Write the effective config back and exit
//! ```
//!
//! | Variable              | Description                      |
//! |-----------------------|----------------------------------|
//! | `FRAMELINK_CONFIG`    | Config file path                 |
//! | `FRAMELINK_FRAMES`    | Frame publisher address          |
//! | `FRAMELINK_COMMANDS`  | Command subscriber address       |
//! | `RUST_LOG`            | Log filter; beats `log_level`    |

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::runtime::Handle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use framelink_host::application::bridge_host::{BridgeHost, BridgeParts};
use framelink_host::infrastructure::frame_source::synthetic::SyntheticFrameSource;
use framelink_host::infrastructure::frame_source::FrameSource;
use framelink_host::infrastructure::image_encoding::CompressingImageEncoder;
use framelink_host::infrastructure::scene::InMemoryScene;
use framelink_host::infrastructure::storage::config::{
    config_file_path, load_config_from, save_config_to, HostConfig,
};
use framelink_session::transport::TcpTransport;

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "framelink-host",
    about = "Publishes rendered frames and applies control commands over message-queue sockets",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "FRAMELINK_CONFIG")]
    config: Option<PathBuf>,

    /// Address of the `frames` publisher, e.g. `tcp://*:5555`.
    #[arg(long, env = "FRAMELINK_FRAMES")]
    frames: Option<String>,

    /// Address of the `commands` subscriber, e.g. `tcp://127.0.0.1:5556`.
    #[arg(long, env = "FRAMELINK_COMMANDS")]
    commands: Option<String>,

    /// Host ticks per second.
    #[arg(long)]
    tick_rate: Option<u32>,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    write_config: bool,
}

impl Cli {
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(config_file_path()?),
        }
    }

    /// Applies command-line overrides on top of the loaded file.
    fn apply_overrides(&self, config: &mut HostConfig) {
        let overrides = [("frames", &self.frames), ("commands", &self.commands)];
        for (name, address) in overrides {
            let Some(address) = address else { continue };
            if let Some(ep) = config.endpoints.iter_mut().find(|e| e.name == name) {
                ep.address = address.clone();
            }
        }
        if let Some(hz) = self.tick_rate {
            config.host.tick_rate_hz = hz;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let path = cli.config_path()?;
    let mut config = load_config_from(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    cli.apply_overrides(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.host.log_level)),
        )
        .init();

    if cli.write_config {
        save_config_to(&config, &path)?;
        info!("config written to {}", path.display());
        return Ok(());
    }

    let mut sources: HashMap<String, Box<dyn FrameSource>> = HashMap::new();
    for camera in &config.cameras {
        let source = SyntheticFrameSource::new(camera.width, camera.height)
            .with_context(|| format!("camera `{}`", camera.id))?;
        sources.insert(camera.id.clone(), Box::new(source));
    }
    let rig = InMemoryScene::with_cameras(config.cameras.iter().map(|c| c.id.as_str()));

    let parts = BridgeParts {
        transport: Arc::new(TcpTransport::new(Handle::current())),
        encoder: Arc::new(CompressingImageEncoder::new(config.host.jpeg_quality)),
        rig: Arc::new(rig),
        sources,
    };
    let mut host = BridgeHost::start(&config, parts).context("starting bridge")?;
    info!(
        tick_rate_hz = config.host.tick_rate_hz,
        "Framelink host running; press Ctrl+C to stop"
    );

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = host.running_flag();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, stopping");
                running.store(false, Ordering::Release);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    let abandoned = host.run(config.host.tick_interval()).await;
    let stats = serde_json::to_string(&host.stats())?;
    info!(abandoned, %stats, "Framelink host stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
