//! [`ScreenCapture`] backed by the `pymobiledevice3` developer tools.
//!
//! - Screenshot: `python3 -m pymobiledevice3 developer dvt screenshot <out>
//!   --tunnel <id>`.  The PNG lands in a temp file that is removed after it
//!   is read, whatever the outcome.
//! - Tunnel: `sudo python3 -m pymobiledevice3 remote tunneld`, started at
//!   most once per process and stopped on [`ScreenCapture::shutdown`].

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use atv_core::DeviceId;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CaptureError, ScreenCapture};

const MODULE: &str = "pymobiledevice3";
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const CHANNEL_PAIR_TIMEOUT: Duration = Duration::from_secs(30);
const TUNNEL_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PyMobileDeviceCapture {
    python: String,
    capture_timeout: Duration,
    tunnel_grace: Duration,
    tunnel: Mutex<Option<Child>>,
}

impl PyMobileDeviceCapture {
    pub fn new(python: impl Into<String>, capture_timeout: Duration, tunnel_grace: Duration) -> Self {
        Self {
            python: python.into(),
            capture_timeout,
            tunnel_grace,
            tunnel: Mutex::new(None),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.args(["-m", MODULE]).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Runs `cmd` to completion within `limit`, mapping a non-zero exit to
    /// [`CaptureError::Failed`].
    async fn run(&self, mut cmd: Command, limit: Duration) -> Result<(), CaptureError> {
        let output = match timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CaptureError::ToolUnavailable(format!("{}: {e}", self.python)))
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(CaptureError::Timeout(limit)),
        };
        if !output.status.success() {
            return Err(CaptureError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Unique temp path for one capture.  Path separators in the identifier are
/// replaced so the file always lands directly in the temp directory.
fn screenshot_path(device: &DeviceId) -> PathBuf {
    let safe: String = device
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    std::env::temp_dir().join(format!("atv_screenshot_{safe}_{}.png", Uuid::new_v4().simple()))
}

/// Removes the temp file on every exit path.
struct TempFile(PathBuf);

impl TempFile {
    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("failed to remove {}: {e}", self.0.display());
            }
        }
    }
}

fn still_running(child: &mut Child) -> Result<bool, std::io::Error> {
    Ok(child.try_wait()?.is_none())
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    status.map_or_else(|| "unknown status".to_string(), |s| s.to_string())
}

#[async_trait]
impl ScreenCapture for PyMobileDeviceCapture {
    async fn capture(&self, device: &DeviceId) -> Result<Vec<u8>, CaptureError> {
        let out = TempFile(screenshot_path(device));

        let mut cmd = self.command();
        cmd.args(["developer", "dvt", "screenshot"])
            .arg(out.path())
            .args(["--tunnel", device.as_str()]);
        self.run(cmd, self.capture_timeout).await?;

        match tokio::fs::read(out.path()).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CaptureError::MissingOutput(out.path().to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn is_available(&self) -> bool {
        let mut cmd = self.command();
        cmd.arg("--version").stdout(Stdio::null()).stderr(Stdio::null());
        match self.run(cmd, VERSION_CHECK_TIMEOUT).await {
            Ok(()) => true,
            Err(e) => {
                warn!("{MODULE} not available: {e}");
                false
            }
        }
    }

    async fn pair_channel(&self, device: &DeviceId) -> Result<(), CaptureError> {
        info!(device = %device, "pairing capture channel");
        let mut cmd = self.command();
        cmd.args(["remote", "pair"]);
        self.run(cmd, CHANNEL_PAIR_TIMEOUT).await?;
        info!(device = %device, "capture channel paired");
        Ok(())
    }

    async fn start_tunnel(&self) -> Result<(), CaptureError> {
        // Held for the whole start so two callers cannot both spawn.
        let mut tunnel = self.tunnel.lock().await;
        if let Some(child) = tunnel.as_mut() {
            if still_running(child)? {
                debug!("tunnel daemon already running");
                return Ok(());
            }
        }

        info!("starting tunnel daemon");
        let child = Command::new("sudo")
            .arg(&self.python)
            .args(["-m", MODULE, "remote", "tunneld"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::ToolUnavailable(format!("tunnel daemon: {e}")))?;
        let child = tunnel.insert(child);

        tokio::time::sleep(self.tunnel_grace).await;

        if still_running(child)? {
            info!("tunnel daemon started");
            Ok(())
        } else {
            let status = child.try_wait()?;
            *tunnel = None;
            Err(CaptureError::ToolUnavailable(format!(
                "tunnel daemon exited during start-up ({})",
                describe_exit(status)
            )))
        }
    }

    async fn shutdown(&self) {
        let Some(mut child) = self.tunnel.lock().await.take() else {
            return;
        };
        match still_running(&mut child) {
            Ok(true) => {}
            Ok(false) | Err(_) => return,
        }

        info!("stopping tunnel daemon");
        terminate(&child).await;
        match timeout(TUNNEL_STOP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => debug!("tunnel daemon exited: {status}"),
            Ok(Err(e)) => warn!("failed waiting for tunnel daemon: {e}"),
            Err(_) => {
                warn!("tunnel daemon ignored termination, killing");
                if let Err(e) = child.kill().await {
                    warn!("failed to kill tunnel daemon: {e}");
                }
            }
        }
    }
}

/// Sends SIGTERM so `sudo` can forward it to the daemon.  SIGKILL on the
/// `sudo` process would leave the daemon running.
#[cfg(unix)]
async fn terminate(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let result = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        warn!("failed to signal tunnel daemon: {e}");
    }
}

#[cfg(not(unix))]
async fn terminate(_child: &Child) {}

// ── Tests ─────────────────────────────────────────────────────────────────────
