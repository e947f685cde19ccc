//! Device library seam.
//!
//! The discovery, pairing, and control protocols are provided by an external
//! library.  This module describes what atv-remote needs from it as three
//! traits:
//!
//! - [`DeviceTransport`] – `scan`, `pair`, `connect`.
//! - [`PairingHandshake`] – an in-progress PIN exchange (`begin`, `pin`,
//!   `finish`).
//! - [`DeviceSession`] – an open session that executes remote operations and
//!   reports what is playing.
//!
//! # Testability
//!
//! [`mock::MockTransport`] is always compiled so unit and integration tests
//! can script devices without a network.  [`atvscript::AtvScriptTransport`]
//! is the production adapter over pyatv's command-line tools.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atv_core::{Capabilities, DeviceId, DeviceInfo, DeviceState, Protocol, RemoteError, RemoteOperation};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

pub mod atvscript;
pub mod mock;

/// Error type for device library operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The session has no implementation of the operation.
    #[error("{0} is not supported by this device")]
    Unsupported(String),

    /// The device received the request and refused it.
    #[error("device rejected request: {0}")]
    Rejected(String),

    /// The PIN exchange failed.
    #[error("pairing failed: {0}")]
    Pairing(String),

    /// The discovered configuration has no service for the protocol.
    #[error("{0} service not available on device")]
    ServiceUnavailable(Protocol),

    #[error("device tool I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device tool produced output we could not interpret.
    #[error("unexpected device tool output: {0}")]
    Protocol(String),
}

/// One protocol endpoint on a discovered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub protocol: Protocol,
    pub port: u16,
    /// Credential attached before connecting, if any.
    pub credentials: Option<String>,
}

/// A discovered device configuration, as returned by [`DeviceTransport::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub identifier: DeviceId,
    pub name: String,
    pub address: String,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub services: Vec<ServiceDescriptor>,
}

impl DeviceConfig {
    pub fn get_service(&self, protocol: Protocol) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.protocol == protocol)
    }

    /// Attaches a stored credential to the service for `protocol`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::ServiceUnavailable`] when the device did not
    /// advertise that protocol in this scan.
    pub fn set_credentials(
        &mut self,
        protocol: Protocol,
        credentials: impl Into<String>,
    ) -> Result<(), DeviceError> {
        let service = self
            .services
            .iter_mut()
            .find(|s| s.protocol == protocol)
            .ok_or(DeviceError::ServiceUnavailable(protocol))?;
        service.credentials = Some(credentials.into());
        Ok(())
    }

    pub fn protocols(&self) -> impl Iterator<Item = Protocol> + '_ {
        self.services.iter().map(|s| s.protocol)
    }

    /// Converts the scan result into the client-facing listing entry.
    pub fn to_info(&self, paired: bool) -> DeviceInfo {
        DeviceInfo {
            identifier: self.identifier.clone(),
            name: self.name.clone(),
            address: self.address.clone(),
            model: self.model.clone(),
            os_version: self.os_version.clone(),
            paired,
            available: true,
        }
    }
}

/// Which side shows the PIN during a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinRequirement {
    /// The device displays a PIN that the user types into the controller.
    DeviceDisplays,
    /// The controller displays this PIN and the user enters it on the device.
    HostDisplays(String),
    /// The protocol pairs without a PIN.
    NotRequired,
}

/// Result of a completed handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedCredentials {
    pub protocol: Protocol,
    pub credentials: String,
}

/// An in-progress pairing handshake for one protocol.
#[async_trait]
pub trait PairingHandshake: Send {
    fn protocol(&self) -> Protocol;

    /// Starts the exchange.  The device may keep progressing after this
    /// returns or times out.
    async fn begin(&mut self) -> Result<(), DeviceError>;

    /// Valid after [`begin`](Self::begin).
    fn pin_requirement(&self) -> PinRequirement;

    /// Supplies the PIN for the next [`finish`](Self::finish).
    fn pin(&mut self, pin: &str);

    async fn finish(&mut self) -> Result<PairedCredentials, DeviceError>;

    /// Abandons the handshake and releases its resources.
    async fn close(&mut self);
}

/// Now-playing metadata as reported by the device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayingMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub app: Option<String>,
    pub device_state: Option<DeviceState>,
    pub position: Option<f64>,
    pub total_time: Option<f64>,
}

/// An open, authenticated session with a device.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Operations this session variant can carry.
    fn capabilities(&self) -> &Capabilities;

    async fn invoke(&self, operation: RemoteOperation) -> Result<(), DeviceError>;

    async fn playing(&self) -> Result<PlayingMetadata, DeviceError>;

    async fn close(&self) -> Result<(), DeviceError>;
}

/// The device library entry points.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Scans the network.  With `identifier`, stops at that device.
    async fn scan(
        &self,
        timeout: Duration,
        identifier: Option<&DeviceId>,
    ) -> Result<Vec<DeviceConfig>, DeviceError>;

    /// Opens a pairing handshake for `protocol`.
    async fn pair(
        &self,
        config: &DeviceConfig,
        protocol: Protocol,
    ) -> Result<Box<dyn PairingHandshake>, DeviceError>;

    /// Opens a session using whatever credentials are attached to `config`.
    async fn connect(&self, config: &DeviceConfig) -> Result<Arc<dyn DeviceSession>, DeviceError>;
}

/// Discovers a single device by identifier within `scan_timeout`.
///
/// The scan itself receives `scan_timeout`; the outer deadline is one second
/// longer.
///
/// # Errors
///
/// - [`RemoteError::NotFound`] when the scan completes without the device
///   or the scan itself fails.
/// - [`RemoteError::Timeout`] when the deadline passes.
pub async fn discover_device(
    transport: &dyn DeviceTransport,
    id: &DeviceId,
    scan_timeout: Duration,
) -> Result<DeviceConfig, RemoteError> {
    let deadline = scan_timeout + Duration::from_secs(1);
    let configs = match timeout(deadline, transport.scan(scan_timeout, Some(id))).await {
        Ok(Ok(configs)) => configs,
        Ok(Err(e)) => {
            debug!(device = %id, "scan failed: {e}");
            return Err(RemoteError::NotFound(id.clone()));
        }
        Err(_) => {
            return Err(RemoteError::Timeout {
                operation: format!("discovery of {id}"),
                after: deadline,
            })
        }
    };

    configs
        .into_iter()
        .find(|c| &c.identifier == id)
        .ok_or_else(|| RemoteError::NotFound(id.clone()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> DeviceConfig {
        DeviceConfig {
            identifier: DeviceId::from("dev"),
            name: "Living Room".to_string(),
            address: "10.0.0.10".to_string(),
            model: Some("AppleTV6,2".to_string()),
            os_version: Some("17.0".to_string()),
            services: vec![ServiceDescriptor {
                protocol: Protocol::Companion,
                port: 49153,
                credentials: None,
            }],
        }
    }

    #[test]
    fn test_set_credentials_attaches_to_matching_service() {
        let mut config = make_config();
        config.set_credentials(Protocol::Companion, "secret").unwrap();
        assert_eq!(
            config.get_service(Protocol::Companion).unwrap().credentials.as_deref(),
            Some("secret")
        );
    }

    #[test]
    fn test_set_credentials_fails_for_missing_service() {
        let mut config = make_config();
        let result = config.set_credentials(Protocol::AirPlay, "secret");
        assert!(matches!(
            result,
            Err(DeviceError::ServiceUnavailable(Protocol::AirPlay))
        ));
    }

    #[test]
    fn test_to_info_carries_paired_flag() {
        let info = make_config().to_info(true);
        assert!(info.paired);
        assert!(info.available);
        assert_eq!(info.name, "Living Room");
    }

    #[tokio::test]
    async fn test_discover_device_returns_not_found_for_unknown_id() {
        let transport = mock::MockTransport::new();
        let result =
            discover_device(&transport, &DeviceId::from("ghost"), Duration::from_millis(50)).await;
        assert_eq!(result, Err(RemoteError::NotFound(DeviceId::from("ghost"))));
    }

    #[tokio::test]
    async fn test_discover_device_returns_matching_config() {
        let transport = mock::MockTransport::new();
        transport.add_device(make_config());
        let config = discover_device(&transport, &DeviceId::from("dev"), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(config.name, "Living Room");
    }
}
