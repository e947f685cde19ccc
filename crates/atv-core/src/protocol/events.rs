//! Screenshot stream events.

use serde::{Deserialize, Serialize};

use crate::domain::device::DeviceId;
use crate::domain::frame::Frame;

/// One event emitted by a streaming loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A frame was captured and cached.
    ScreenshotFrame {
        device_id: DeviceId,
        /// Base64 JPEG.
        image: String,
        /// Seconds since the Unix epoch.
        timestamp: f64,
    },
    /// A capture attempt failed; the stream keeps running.
    ScreenshotError { device_id: DeviceId, message: String },
}

impl StreamEvent {
    pub fn frame(device_id: &DeviceId, frame: &Frame) -> Self {
        StreamEvent::ScreenshotFrame {
            device_id: device_id.clone(),
            image: frame.image.clone(),
            timestamp: frame.timestamp(),
        }
    }

    pub fn error(device_id: &DeviceId, message: impl Into<String>) -> Self {
        StreamEvent::ScreenshotError {
            device_id: device_id.clone(),
            message: message.into(),
        }
    }

    /// The device this event belongs to.
    pub fn device_id(&self) -> &DeviceId {
        match self {
            StreamEvent::ScreenshotFrame { device_id, .. }
            | StreamEvent::ScreenshotError { device_id, .. } => device_id,
        }
    }

    pub fn to_json(&self) -> String {
        // Serialization of this enum cannot fail: all fields are strings or
        // finite numbers.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
