//! Framelink relay hub: stand-alone entry point.
//!
//! ```text
//! framelink-hub [OPTIONS] [COMMAND]
//!
//! Commands:
//!   camera   Send one CAMERA_TRANSFORM to the host, then exit
//!
//! Options:
//!   --config <PATH>          Config file [default: platform config dir]
//!   --upstream <ADDR>        Override the host frame publisher address
//!   --camera <ID>            Relay only this camera (repeatable)
//!   --write-config           Write the effective config back and exit
//! ```
//!
//! | Variable                | Description                   |
//! |-------------------------|-------------------------------|
//! | `FRAMELINK_HUB_CONFIG`  | Config file path              |
//! | `FRAMELINK_UPSTREAM`    | Host frame publisher address  |
//! | `RUST_LOG`              | Log filter; beats `log_level` |

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::runtime::Handle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use framelink_core::{Rotation, Vector3};
use framelink_session::transport::TcpTransport;
use framelink_hub::application::relay::Relay;
use framelink_hub::infrastructure::config::{
    hub_config_path, load_hub_config_from, save_hub_config_to, HubConfig,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "framelink-hub",
    about = "Relays Framelink frames to consumers and their commands to the host",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "FRAMELINK_HUB_CONFIG")]
    config: Option<PathBuf>,

    /// Address of the host's frame publisher, e.g. `tcp://10.0.0.5:5555`.
    #[arg(long, env = "FRAMELINK_UPSTREAM")]
    upstream: Option<String>,

    /// Relay only these camera ids.
    #[arg(long = "camera")]
    cameras: Vec<String>,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    write_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one camera transform to the host and exit.
    Camera {
        /// Target camera id; omit to move every camera.
        #[arg(long)]
        target: Option<String>,
        /// Location as `X Y Z`.
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], default_values_t = [0.0, 0.0, 0.0])]
        location: Vec<f64>,
        /// Rotation as `PITCH YAW ROLL` in degrees.
        #[arg(long, num_args = 3, value_names = ["PITCH", "YAW", "ROLL"], default_values_t = [0.0, 0.0, 0.0])]
        rotation: Vec<f64>,
        /// Time given to the host to connect before sending.
        #[arg(long, default_value_t = 1000)]
        settle_ms: u64,
    },
}

impl Cli {
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(hub_config_path()?),
        }
    }

    fn apply_overrides(&self, config: &mut HubConfig) {
        if let Some(address) = &self.upstream {
            config.upstream_frames.address = address.clone();
        }
        if !self.cameras.is_empty() {
            config.hub.camera_filter = self.cameras.clone();
        }
    }
}

fn vector(values: &[f64]) -> Vector3 {
    match values {
        [x, y, z] => Vector3 { x: *x, y: *y, z: *z },
        _ => Vector3::default(),
    }
}

fn rotation(values: &[f64]) -> Rotation {
    match values {
        [pitch, yaw, roll] => Rotation {
            pitch: *pitch,
            yaw: *yaw,
            roll: *roll,
        },
        _ => Rotation::default(),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let path = cli.config_path()?;
    let mut config = load_hub_config_from(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    cli.apply_overrides(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.hub.log_level)),
        )
        .init();

    if cli.write_config {
        save_hub_config_to(&config, &path)?;
        info!("config written to {}", path.display());
        return Ok(());
    }

    let transport = Arc::new(TcpTransport::new(Handle::current()));
    let mut relay = Relay::start(&config, transport).context("starting relay")?;

    if let Some(Command::Camera {
        target,
        location,
        rotation: rot,
        settle_ms,
    }) = &cli.command
    {
        // The host's subscriber connects to us; give it time to arrive.
        let settle = Instant::now() + Duration::from_millis(*settle_ms);
        while Instant::now() < settle {
            relay.poll(Instant::now());
            tokio::time::sleep(config.hub.poll_interval()).await;
        }
        let request_id = relay.send_camera_command(target.as_deref(), vector(location), rotation(rot))?;
        let abandoned = relay.stop().await;
        info!(%request_id, abandoned, "camera command done");
        return Ok(());
    }

    info!(
        downstream = %config.downstream_frames.address,
        control = %config.downstream_control.address,
        "Framelink hub running; press Ctrl+C to stop"
    );

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = relay.running_flag();
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

    let abandoned = relay.run(config.hub.poll_interval()).await;
    let stats = serde_json::to_string(&relay.stats())?;
    info!(abandoned, cameras = ?relay.known_cameras(), %stats, "Framelink hub stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
