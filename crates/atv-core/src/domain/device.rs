//! Device identity and discovery results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable opaque identifier naming one physical device.
///
/// This is the primary key for every registry in the system: credentials,
/// pending pairings, live sessions, streaming tasks, and the screenshot cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A control channel a device may expose.
///
/// Pairing and credentials are scoped per protocol: a device paired over
/// `Companion` holds a separate credential from the same device paired over
/// `AirPlay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    Companion,
    AirPlay,
    #[serde(rename = "MRP")]
    Mrp,
    #[serde(rename = "DMAP")]
    Dmap,
    #[serde(rename = "RAOP")]
    Raop,
}

impl Protocol {
    /// Protocols tried by the pairing coordinator, highest priority first.
    pub const PAIRING_PRIORITY: [Protocol; 2] = [Protocol::Companion, Protocol::AirPlay];

    /// Canonical name, also used as the key in the credential file.
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Companion => "Companion",
            Protocol::AirPlay => "AirPlay",
            Protocol::Mrp => "MRP",
            Protocol::Dmap => "DMAP",
            Protocol::Raop => "RAOP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a protocol name is not one of the known channels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol '{0}'")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    /// Parses a protocol name case-insensitively, so both the credential file
    /// spelling (`"Companion"`) and device tool output (`"companion"`) work.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "companion" => Ok(Protocol::Companion),
            "airplay" => Ok(Protocol::AirPlay),
            "mrp" => Ok(Protocol::Mrp),
            "dmap" => Ok(Protocol::Dmap),
            "raop" => Ok(Protocol::Raop),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}

/// One device as reported by a network scan.
///
/// `paired` is derived from the credential store at scan time: a device with
/// at least one stored protocol credential is paired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifier: DeviceId,
    pub name: String,
    pub address: String,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub paired: bool,
    pub available: bool,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
