//! Device transport backed by pyatv's command-line tools.
//!
//! - `atvscript` answers scan, remote-control, and metadata requests with one
//!   JSON document per invocation.
//! - `atvremote pair` drives the interactive PIN exchange over the child's
//!   stdin and stdout.
//!
//! Sessions are stateless from the tool's point of view: every operation is a
//! fresh `atvscript` run that carries the identifier and the stored
//! credentials on its command line.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atv_core::{Capabilities, DeviceId, DeviceState, Protocol, RemoteOperation};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    DeviceConfig, DeviceError, DeviceSession, DeviceTransport, PairedCredentials, PairingHandshake,
    PinRequirement, PlayingMetadata, ServiceDescriptor,
};

const DEVICE_PIN_PROMPT: &str = "Enter PIN";
const HOST_PIN_MARKER: &str = "Use ";
const CREDENTIALS_MARKER: &str = "credentials: ";
/// Upper bound on waiting for credentials once the PIN has been submitted.
const FINISH_TIMEOUT: Duration = Duration::from_secs(30);

/// [`DeviceTransport`] implementation that shells out to pyatv.
#[derive(Debug, Clone)]
pub struct AtvScriptTransport {
    atvscript: String,
    atvremote: String,
}

impl AtvScriptTransport {
    pub fn new(atvscript: impl Into<String>, atvremote: impl Into<String>) -> Self {
        Self {
            atvscript: atvscript.into(),
            atvremote: atvremote.into(),
        }
    }
}

// ── atvscript JSON output ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ScriptResult {
    result: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScanOutput {
    #[serde(default)]
    devices: Vec<ScannedDevice>,
}

#[derive(Debug, Deserialize)]
struct ScannedDevice {
    name: String,
    address: String,
    identifier: String,
    #[serde(default)]
    device_info: Option<ScannedDeviceInfo>,
    #[serde(default)]
    services: Vec<ScannedService>,
}

#[derive(Debug, Deserialize)]
struct ScannedDeviceInfo {
    #[serde(default)]
    model_str: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScannedService {
    protocol: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
struct PlayingOutput {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    album: Option<String>,
    #[serde(default)]
    app: Option<String>,
    #[serde(default)]
    device_state: Option<String>,
    #[serde(default)]
    position: Option<f64>,
    #[serde(default)]
    total_time: Option<f64>,
}

/// Checks the `result` field and surfaces the tool's error message.
fn check_result(stdout: &str) -> Result<(), DeviceError> {
    let result: ScriptResult =
        serde_json::from_str(stdout).map_err(|e| DeviceError::Protocol(e.to_string()))?;
    if result.result == "success" {
        Ok(())
    } else {
        Err(DeviceError::Rejected(
            result.error.unwrap_or_else(|| "unknown failure".to_string()),
        ))
    }
}

fn parse_scan(stdout: &str) -> Result<Vec<DeviceConfig>, DeviceError> {
    check_result(stdout)?;
    let output: ScanOutput =
        serde_json::from_str(stdout).map_err(|e| DeviceError::Protocol(e.to_string()))?;

    Ok(output
        .devices
        .into_iter()
        .map(|d| {
            let services = d
                .services
                .into_iter()
                .filter_map(|s| match s.protocol.parse::<Protocol>() {
                    Ok(protocol) => Some(ServiceDescriptor {
                        protocol,
                        port: s.port,
                        credentials: None,
                    }),
                    Err(e) => {
                        debug!("skipping service: {e}");
                        None
                    }
                })
                .collect();
            let (model, os_version) = match d.device_info {
                Some(info) => (info.model_str.or(info.model), info.version),
                None => (None, None),
            };
            DeviceConfig {
                identifier: DeviceId::new(d.identifier),
                name: d.name,
                address: d.address,
                model,
                os_version,
                services,
            }
        })
        .collect())
}

fn parse_playing(stdout: &str) -> Result<PlayingMetadata, DeviceError> {
    check_result(stdout)?;
    let output: PlayingOutput =
        serde_json::from_str(stdout).map_err(|e| DeviceError::Protocol(e.to_string()))?;
    Ok(PlayingMetadata {
        title: output.title,
        artist: output.artist,
        album: output.album,
        app: output.app,
        device_state: output.device_state.as_deref().and_then(DeviceState::parse),
        position: output.position,
        total_time: output.total_time,
    })
}

/// Command-line flag carrying credentials for `protocol`.
fn credentials_flag(protocol: Protocol) -> String {
    format!("--{}-credentials", protocol.as_str().to_ascii_lowercase())
}

/// Arguments identifying the device and its credentials on every invocation.
fn session_args(config: &DeviceConfig) -> Vec<String> {
    let mut args = vec![
        "-s".to_string(),
        config.address.clone(),
        "-i".to_string(),
        config.identifier.to_string(),
    ];
    for service in &config.services {
        if let Some(creds) = &service.credentials {
            args.push(credentials_flag(service.protocol));
            args.push(creds.clone());
        }
    }
    args
}

/// Four-digit PIN shown to the user when the host provides it.
fn generate_host_pin() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    let n = u16::from_le_bytes([bytes[0], bytes[1]]) % 10_000;
    format!("{n:04}")
}

async fn run_tool(program: &str, args: &[String]) -> Result<String, DeviceError> {
    debug!(program, ?args, "running device tool");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;
    // atvscript reports failures as JSON on stdout with a zero or non-zero
    // exit status, so stdout is parsed either way.
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if stdout.trim().is_empty() && !output.status.success() {
        return Err(DeviceError::Protocol(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(stdout)
}

#[async_trait]
impl DeviceTransport for AtvScriptTransport {
    async fn scan(
        &self,
        timeout: Duration,
        identifier: Option<&DeviceId>,
    ) -> Result<Vec<DeviceConfig>, DeviceError> {
        let mut args = vec!["-t".to_string(), timeout.as_secs().max(1).to_string()];
        if let Some(id) = identifier {
            args.push("-i".to_string());
            args.push(id.to_string());
        }
        args.push("scan".to_string());
        parse_scan(&run_tool(&self.atvscript, &args).await?)
    }

    async fn pair(
        &self,
        config: &DeviceConfig,
        protocol: Protocol,
    ) -> Result<Box<dyn PairingHandshake>, DeviceError> {
        if config.get_service(protocol).is_none() {
            return Err(DeviceError::ServiceUnavailable(protocol));
        }
        Ok(Box::new(AtvRemoteHandshake {
            program: self.atvremote.clone(),
            config: config.clone(),
            protocol,
            host_pin: generate_host_pin(),
            child: None,
            stdin: None,
            stdout: None,
            requirement: PinRequirement::DeviceDisplays,
            pin: None,
        }))
    }

    async fn connect(&self, config: &DeviceConfig) -> Result<Arc<dyn DeviceSession>, DeviceError> {
        let with_credentials: Vec<Protocol> = config
            .services
            .iter()
            .filter(|s| s.credentials.is_some())
            .map(|s| s.protocol)
            .collect();
        let mut capabilities = Capabilities::for_protocols(with_credentials);
        if capabilities.supported_actions().is_empty() {
            // Let the device decide rather than refusing everything locally.
            capabilities = Capabilities::for_protocols(config.protocols());
        }

        Ok(Arc::new(AtvScriptSession {
            program: self.atvscript.clone(),
            base_args: session_args(config),
            capabilities,
        }))
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

struct AtvScriptSession {
    program: String,
    base_args: Vec<String>,
    capabilities: Capabilities,
}

impl AtvScriptSession {
    async fn run(&self, command: &str) -> Result<String, DeviceError> {
        let mut args = self.base_args.clone();
        args.push(command.to_string());
        run_tool(&self.program, &args).await
    }
}

#[async_trait]
impl DeviceSession for AtvScriptSession {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn invoke(&self, operation: RemoteOperation) -> Result<(), DeviceError> {
        check_result(&self.run(operation.as_str()).await?)
    }

    async fn playing(&self) -> Result<PlayingMetadata, DeviceError> {
        parse_playing(&self.run("playing").await?)
    }

    async fn close(&self) -> Result<(), DeviceError> {
        Ok(())
    }
}

// ── Pairing handshake ─────────────────────────────────────────────────────────

struct AtvRemoteHandshake {
    program: String,
    config: DeviceConfig,
    protocol: Protocol,
    host_pin: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    requirement: PinRequirement,
    pin: Option<String>,
}

impl AtvRemoteHandshake {
    fn stdout(&mut self) -> Result<&mut ChildStdout, DeviceError> {
        self.stdout
            .as_mut()
            .ok_or_else(|| DeviceError::Pairing("handshake not started".to_string()))
    }
}

/// Reads `reader` until any of `markers` appears or the stream ends.
async fn read_until<R>(reader: &mut R, markers: &[&str]) -> Result<String, DeviceError>
where
    R: AsyncRead + Unpin,
{
    let mut seen = String::new();
    let mut buf = [0u8; 512];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(seen);
        }
        seen.push_str(&String::from_utf8_lossy(&buf[..n]));
        if markers.iter().any(|m| seen.contains(m)) {
            return Ok(seen);
        }
    }
}

async fn read_until_within<R>(
    reader: &mut R,
    markers: &[&str],
    limit: Duration,
) -> Result<String, DeviceError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(limit, read_until(reader, markers))
        .await
        .map_err(|_| DeviceError::Pairing(format!("pairing tool gave no answer within {limit:?}")))?
}

#[async_trait]
impl PairingHandshake for AtvRemoteHandshake {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn begin(&mut self) -> Result<(), DeviceError> {
        let mut child = Command::new(&self.program)
            .args(["-s", self.config.address.as_str(), "-i", self.config.identifier.as_str()])
            .args(["--protocol", self.protocol.as_str().to_ascii_lowercase().as_str()])
            .args(["--pin", self.host_pin.as_str()])
            .arg("pair")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take();
        self.child = Some(child);

        let seen = read_until(self.stdout()?, &[DEVICE_PIN_PROMPT, HOST_PIN_MARKER]).await?;
        self.requirement = if seen.contains(DEVICE_PIN_PROMPT) {
            PinRequirement::DeviceDisplays
        } else if seen.contains(HOST_PIN_MARKER) {
            PinRequirement::HostDisplays(self.host_pin.clone())
        } else {
            return Err(DeviceError::Pairing(format!(
                "pairing ended before a PIN was requested: {}",
                seen.trim()
            )));
        };
        Ok(())
    }

    fn pin_requirement(&self) -> PinRequirement {
        self.requirement.clone()
    }

    fn pin(&mut self, pin: &str) {
        self.pin = Some(pin.to_string());
    }

    async fn finish(&mut self) -> Result<PairedCredentials, DeviceError> {
        // The host-PIN flow waits for ENTER once the user has typed the PIN
        // on the device.
        let line = match self.requirement {
            PinRequirement::DeviceDisplays => format!("{}\n", self.pin.as_deref().unwrap_or("")),
            _ => "\n".to_string(),
        };
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| DeviceError::Pairing("handshake not started".to_string()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;

        // The tool exits right after printing credentials.
        let output = read_until_within(self.stdout()?, &[], FINISH_TIMEOUT).await?;
        output
            .lines()
            .find_map(|l| l.split_once(CREDENTIALS_MARKER).map(|(_, c)| c.trim().to_string()))
            .filter(|c| !c.is_empty())
            .map(|credentials| PairedCredentials {
                protocol: self.protocol,
                credentials,
            })
            .ok_or_else(|| DeviceError::Pairing(output.trim().to_string()))
    }

    async fn close(&mut self) {
        self.stdin = None;
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(device = %self.config.identifier, "failed to stop pairing tool: {e}");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
