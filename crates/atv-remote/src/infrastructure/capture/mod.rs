//! Screen capture infrastructure.
//!
//! Screenshots come from an external developer tool that writes a PNG of the
//! device screen to disk.  The [`ScreenCapture`] trait hides the process
//! contract; [`encoder::FrameEncoder`] turns the raw PNG into the
//! downscaled, base64-encoded JPEG published to clients.
//!
//! # Testability
//!
//! [`mock::MockCapture`] is always compiled so the streaming supervisor can
//! be exercised without the external tool.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use atv_core::{DeviceId, RemoteError};
use thiserror::Error;

pub mod encoder;
pub mod mock;
pub mod pymobiledevice;

/// Error type for capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The capture tool is not installed or does not start.
    #[error("capture tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("capture timed out after {0:?}")]
    Timeout(Duration),

    /// The tool exited with a non-zero status.
    #[error("capture tool failed ({status}): {stderr}")]
    Failed { status: String, stderr: String },

    /// The tool exited successfully but wrote no image.
    #[error("capture tool produced no file at {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
}

impl From<CaptureError> for RemoteError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::ToolUnavailable(msg) => RemoteError::ExternalToolUnavailable(msg),
            CaptureError::Timeout(after) => RemoteError::Timeout {
                operation: "screen capture".to_string(),
                after,
            },
            other => RemoteError::CaptureFailed(other.to_string()),
        }
    }
}

/// Source of raw device screenshots plus the tunnel it depends on.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Captures one screenshot and returns the PNG bytes.
    async fn capture(&self, device: &DeviceId) -> Result<Vec<u8>, CaptureError>;

    /// Whether the capture tool can be invoked at all.
    async fn is_available(&self) -> bool;

    /// Pairs the capture channel (separate from the remote-control pairing).
    async fn pair_channel(&self, device: &DeviceId) -> Result<(), CaptureError>;

    /// Starts the long-running tunnel daemon unless it is already alive.
    async fn start_tunnel(&self) -> Result<(), CaptureError>;

    /// Stops the tunnel daemon if this process started it.
    async fn shutdown(&self);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
