//! atv-remote command-line entry point.
//!
//! Wires a [`RemoteService`] over pyatv and pymobiledevice3 and runs one
//! subcommand against it.  Results are printed to stdout as JSON in the same
//! `{ success, data, error }` shape a network front end would send; logs go
//! to stderr.
//!
//! # Usage
//!
//! ```text
//! atv-remote scan
//! atv-remote pair <DEVICE_ID> [--pin 1234]
//! atv-remote send <DEVICE_ID> play_pause
//! atv-remote playing <DEVICE_ID>
//! atv-remote capture <DEVICE_ID> --quality 70 --output shot.jpg
//! atv-remote stream <DEVICE_ID> --interval-ms 500
//! ```
//!
//! Pending pairings and sessions live in memory, so `pair` completes the
//! whole PIN exchange interactively within one run.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use atv_core::DeviceId;
use atv_remote::infrastructure::service::{CommandResult, PairResponse, RemoteService};
use atv_remote::infrastructure::storage::config::{
    config_file_path, credentials_path_for, legacy_credentials_path, load_config_from,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Remote control for network media devices.
#[derive(Debug, Parser)]
#[command(name = "atv-remote", version)]
struct Cli {
    /// Path to `config.toml`.  The credential file is kept beside it.
    #[arg(long, global = true, env = "ATV_REMOTE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset; overrides the config file.
    #[arg(long, global = true, env = "ATV_REMOTE_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List devices on the network.
    Scan,
    /// Pair with a device, prompting for the PIN when needed.
    Pair {
        device_id: String,
        /// PIN to submit immediately instead of prompting.
        #[arg(long)]
        pin: Option<String>,
    },
    /// Open a session to check that a paired device is reachable.
    Connect { device_id: String },
    Disconnect { device_id: String },
    /// Forget the stored credentials for a device.
    Unpair { device_id: String },
    /// Send a remote-control action, e.g. `select`, `play_pause`, `volume_up`.
    Send {
        device_id: String,
        action: String,
        #[arg(long)]
        value: Option<i32>,
    },
    /// Show what a device is playing.
    Playing { device_id: String },
    /// Capture one screenshot.
    Capture {
        device_id: String,
        /// JPEG quality, 1 to 100.
        #[arg(long)]
        quality: Option<u8>,
        /// Write the JPEG here instead of printing base64.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Start the capture tunnel daemon first.
        #[arg(long)]
        tunnel: bool,
    },
    /// Stream screenshots as JSON lines until Ctrl-C.
    Stream {
        device_id: String,
        #[arg(long)]
        interval_ms: Option<u64>,
        #[arg(long)]
        tunnel: bool,
    },
    /// Pair the screen-capture channel with a device.
    PairCapture { device_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config_file_path().context("cannot locate the configuration directory")?,
    };
    let config = load_config_from(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.general.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with_writer(std::io::stderr)
        .init();

    let credentials = credentials_path_for(&config_path);
    if let Some(dir) = credentials.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    info!(credentials = %credentials.display(), "atv-remote starting");

    let legacy = legacy_credentials_path();
    let service = RemoteService::from_config(config, &credentials, Some(&legacy));

    let success = tokio::select! {
        success = run(&service, cli.command) => success?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            false
        }
    };

    service.shutdown().await;
    Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Runs one subcommand, returning whether it succeeded.
async fn run(service: &RemoteService, command: Command) -> anyhow::Result<bool> {
    match command {
        Command::Scan => print(&service.list_devices().await),
        Command::Pair { device_id, pin } => pair(service, &DeviceId::new(device_id), pin).await,
        Command::Connect { device_id } => print(&service.connect_device(&DeviceId::new(device_id)).await),
        Command::Disconnect { device_id } => {
            print(&service.disconnect_device(&DeviceId::new(device_id)).await)
        }
        Command::Unpair { device_id } => print(&service.unpair_device(&DeviceId::new(device_id)).await),
        Command::Send {
            device_id,
            action,
            value,
        } => print(
            &service
                .send_command(&DeviceId::new(device_id), &action, value)
                .await,
        ),
        Command::Playing { device_id } => print(&service.playing(&DeviceId::new(device_id)).await),
        Command::Capture {
            device_id,
            quality,
            output,
            tunnel,
        } => {
            if tunnel && !print(&service.start_tunnel().await)? {
                return Ok(false);
            }
            let result = service
                .capture_screenshot(&DeviceId::new(device_id), quality)
                .await;
            match (output, &result.data) {
                (Some(path), Some(shot)) => {
                    let jpeg = BASE64
                        .decode(&shot.image)
                        .context("capture returned an invalid payload")?;
                    tokio::fs::write(&path, jpeg)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!(path = %path.display(), "screenshot saved");
                    Ok(true)
                }
                _ => print(&result),
            }
        }
        Command::Stream {
            device_id,
            interval_ms,
            tunnel,
        } => {
            if tunnel && !print(&service.start_tunnel().await)? {
                return Ok(false);
            }
            stream(service, &DeviceId::new(device_id), interval_ms.map(Duration::from_millis)).await
        }
        Command::PairCapture { device_id } => {
            print(&service.pair_capture_channel(&DeviceId::new(device_id)).await)
        }
    }
}

/// Drives the PIN exchange to completion, prompting on stdin.
async fn pair(service: &RemoteService, id: &DeviceId, pin: Option<String>) -> anyhow::Result<bool> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut response: PairResponse = service.pair_device(id, pin.as_deref()).await;

    loop {
        if response.needs_pin {
            eprint!("Enter the PIN shown on the device: ");
        } else if response.provide_pin {
            eprint!(
                "Enter PIN {} on the device, then press Enter: ",
                response.pin.as_deref().unwrap_or_default()
            );
        } else {
            println!("{}", serde_json::to_string_pretty(&response)?);
            return Ok(response.success);
        }

        let line = stdin
            .next_line()
            .await
            .context("failed to read PIN")?
            .unwrap_or_default();
        // The host-PIN flow completes with the PIN it displayed.
        let answer = if response.provide_pin {
            response.pin.clone().unwrap_or_default()
        } else {
            line.trim().to_string()
        };
        if answer.is_empty() {
            warn!("no PIN entered; abandoning pairing");
            print(&service.cancel_pairing(id).await)?;
            return Ok(false);
        }
        response = service.pair_device(id, Some(&answer)).await;
    }
}

/// Prints events for `id` as JSON lines until the stream ends or Ctrl-C.
async fn stream(service: &RemoteService, id: &DeviceId, interval: Option<Duration>) -> anyhow::Result<bool> {
    let mut events = service.subscribe();
    if !print(&service.start_stream(id, interval).await)? {
        return Ok(false);
    }

    loop {
        match events.recv().await {
            Ok(event) if event.device_id() == id => println!("{}", event.to_json()),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "output fell behind; frames dropped"),
            Err(RecvError::Closed) => return Ok(true),
        }
    }
}

fn print<T: Serialize>(result: &CommandResult<T>) -> anyhow::Result<bool> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(result.success)
}
