//! Now-playing metadata.

use serde::{Deserialize, Serialize};

use super::device::DeviceId;

/// Play state as enumerated by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Idle,
    Loading,
    Paused,
    Playing,
    Stopped,
    Seeking,
}

impl DeviceState {
    /// Normalized lowercase name exposed to clients.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceState::Idle => "idle",
            DeviceState::Loading => "loading",
            DeviceState::Paused => "paused",
            DeviceState::Playing => "playing",
            DeviceState::Stopped => "stopped",
            DeviceState::Seeking => "seeking",
        }
    }

    /// Parses a device-reported state name, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "idle" => Some(DeviceState::Idle),
            "loading" => Some(DeviceState::Loading),
            "paused" => Some(DeviceState::Paused),
            "playing" => Some(DeviceState::Playing),
            "stopped" => Some(DeviceState::Stopped),
            "seeking" => Some(DeviceState::Seeking),
            _ => None,
        }
    }
}

/// What a device is currently playing, as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub device_id: DeviceId,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub app: Option<String>,
    /// `"playing"`, `"paused"`, `"stopped"`, ...
    pub playback_state: Option<String>,
    /// Seconds into the current item.
    pub position: Option<f64>,
    /// Total length of the current item in seconds.
    pub duration: Option<f64>,
    /// Artwork is not fetched; always `None`.
    pub artwork_url: Option<String>,
}
