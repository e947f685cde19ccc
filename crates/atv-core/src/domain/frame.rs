//! Captured screenshot frames.

use std::time::{SystemTime, UNIX_EPOCH};

/// One encoded screenshot.
///
/// `image` is a base64 JPEG payload ready to embed in a JSON message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub image: String,
    pub captured_at: SystemTime,
}

impl Frame {
    /// Creates a frame stamped with the current wall-clock time.
    pub fn now(image: String) -> Self {
        Self {
            image,
            captured_at: SystemTime::now(),
        }
    }

    /// Capture time as fractional seconds since the Unix epoch.
    pub fn timestamp(&self) -> f64 {
        self.captured_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}
