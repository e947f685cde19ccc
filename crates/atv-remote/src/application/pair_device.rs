//! PairingCoordinator: the per-device PIN handshake state machine.
//!
//! # States
//!
//! ```text
//! Idle ──► Discovering ──┬─► AwaitingDevicePin ──┐
//!                        ├─► AwaitingHostPin ────┼─► Paired | Failed
//!                        └─► (no PIN needed) ────┘
//! ```
//!
//! Only the two `Awaiting*` states outlive a call: they are kept in the
//! pending table until the client comes back with a PIN.
//!
//! - **Device provides the PIN**: the device shows a code on screen, the
//!   client answers [`PairingOutcome::NeedsPin`] by calling again with it.
//! - **Host provides the PIN**: the handshake chose a code which the client
//!   displays ([`PairingOutcome::ProvidePin`]); the user types it on the
//!   device, then the client calls again to complete.
//!
//! At most one handshake is pending per device.  Starting a new pairing
//! closes the previous handshake, and a session is taken out of the table
//! before it is finalized so two concurrent PIN submissions cannot both
//! finish it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use atv_core::{DeviceId, Protocol, RemoteError};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::infrastructure::device::{
    discover_device, DeviceTransport, PairingHandshake, PinRequirement,
};
use crate::infrastructure::storage::credentials::SharedCredentialStore;

/// Result of a pairing call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    /// Credentials were stored for `protocol`.
    Paired { protocol: Protocol },
    /// The device is showing a PIN; call again with it.
    NeedsPin,
    /// Show `pin` to the user, who enters it on the device; then call again.
    ProvidePin { pin: String },
}

/// Which side displays the PIN of a pending handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinDirection {
    DeviceProvidesPin,
    HostProvidesPin { pin: String },
}

struct PendingPairing {
    handshake: Box<dyn PairingHandshake>,
    direction: PinDirection,
}

pub struct PairingCoordinator {
    transport: Arc<dyn DeviceTransport>,
    store: SharedCredentialStore,
    pending: Mutex<HashMap<DeviceId, PendingPairing>>,
    scan_timeout: Duration,
    handshake_timeout: Duration,
}

impl PairingCoordinator {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        store: SharedCredentialStore,
        scan_timeout: Duration,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            pending: Mutex::new(HashMap::new()),
            scan_timeout,
            handshake_timeout,
        }
    }

    /// Advances pairing for `id`.
    ///
    /// With a non-empty `pin` and a pending handshake, the handshake is
    /// finalized.  Otherwise a fresh pairing starts, replacing any pending
    /// one.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::NotFound`] / [`RemoteError::Timeout`] from discovery.
    /// - [`RemoteError::HandshakeFailed`] when finalizing fails.
    /// - [`RemoteError::NoProtocolPaired`] when no protocol could start.
    /// - [`RemoteError::PersistenceFailed`] when credentials cannot be saved.
    pub async fn begin_or_continue(
        &self,
        id: &DeviceId,
        pin: Option<&str>,
    ) -> Result<PairingOutcome, RemoteError> {
        let pin = pin.map(str::trim).filter(|p| !p.is_empty());

        if let Some(pin) = pin {
            let pending = self.pending.lock().await.remove(id);
            if let Some(mut pending) = pending {
                debug!(device = %id, protocol = %pending.handshake.protocol(), "submitting PIN");
                pending.handshake.pin(pin);
                return self.finalize(id, pending.handshake).await;
            }
            debug!(device = %id, "PIN supplied without a pending handshake; starting fresh");
        }

        self.start(id).await
    }

    async fn start(&self, id: &DeviceId) -> Result<PairingOutcome, RemoteError> {
        if self.abandon(id).await {
            info!(device = %id, "replacing pending pairing");
        }

        let config = discover_device(self.transport.as_ref(), id, self.scan_timeout).await?;
        info!(device = %id, name = %config.name, "starting pairing");

        for protocol in Protocol::PAIRING_PRIORITY {
            if config.get_service(protocol).is_none() {
                debug!(device = %id, %protocol, "protocol not offered");
                continue;
            }

            let mut handshake = match self.transport.pair(&config, protocol).await {
                Ok(handshake) => handshake,
                Err(e) => {
                    warn!(device = %id, %protocol, "could not open pairing: {e}");
                    continue;
                }
            };

            match timeout(self.handshake_timeout, handshake.begin()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(device = %id, %protocol, "pairing did not start: {e}");
                    handshake.close().await;
                    continue;
                }
                // The device often keeps going after a slow begin, so the
                // handshake is still used.
                Err(_) => warn!(
                    device = %id,
                    %protocol,
                    "pairing begin exceeded {:?}; continuing",
                    self.handshake_timeout
                ),
            }

            return match handshake.pin_requirement() {
                PinRequirement::DeviceDisplays => {
                    info!(device = %id, %protocol, "waiting for PIN shown on device");
                    self.park(id, handshake, PinDirection::DeviceProvidesPin).await;
                    Ok(PairingOutcome::NeedsPin)
                }
                PinRequirement::HostDisplays(pin) => {
                    info!(device = %id, %protocol, "waiting for PIN to be entered on device");
                    let direction = PinDirection::HostProvidesPin { pin: pin.clone() };
                    self.park(id, handshake, direction).await;
                    Ok(PairingOutcome::ProvidePin { pin })
                }
                PinRequirement::NotRequired => self.finalize(id, handshake).await,
            };
        }

        warn!(device = %id, "no protocol could be paired");
        Err(RemoteError::NoProtocolPaired(id.clone()))
    }

    /// Stores `handshake` as the pending session, closing any displaced one.
    async fn park(&self, id: &DeviceId, handshake: Box<dyn PairingHandshake>, direction: PinDirection) {
        let displaced = self
            .pending
            .lock()
            .await
            .insert(id.clone(), PendingPairing { handshake, direction });
        if let Some(mut old) = displaced {
            debug!(device = %id, "closing handshake displaced by concurrent pairing");
            old.handshake.close().await;
        }
    }

    async fn finalize(
        &self,
        id: &DeviceId,
        mut handshake: Box<dyn PairingHandshake>,
    ) -> Result<PairingOutcome, RemoteError> {
        let result = handshake.finish().await;
        handshake.close().await;

        let paired = result.map_err(|e| {
            warn!(device = %id, "pairing failed: {e}");
            RemoteError::HandshakeFailed {
                device: id.clone(),
                reason: e.to_string(),
            }
        })?;

        self.store
            .lock()
            .await
            .upsert(id, paired.protocol, paired.credentials)?;
        info!(device = %id, protocol = %paired.protocol, "paired");
        Ok(PairingOutcome::Paired {
            protocol: paired.protocol,
        })
    }

    /// Closes and discards the pending handshake for `id`, if any.
    pub async fn abandon(&self, id: &DeviceId) -> bool {
        let pending = self.pending.lock().await.remove(id);
        match pending {
            Some(mut pending) => {
                pending.handshake.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn pending_direction(&self, id: &DeviceId) -> Option<PinDirection> {
        self.pending
            .lock()
            .await
            .get(id)
            .map(|p| p.direction.clone())
    }

    /// Closes every pending handshake.
    pub async fn cleanup(&self) {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        for (_, mut pending) in drained {
            pending.handshake.close().await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::device::mock::{device, MockTransport, PairingScript};
    use crate::infrastructure::storage::credentials::CredentialStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        transport: MockTransport,
        store: SharedCredentialStore,
        coordinator: PairingCoordinator,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("credentials.json"), None).shared();
        let transport = MockTransport::new();
        let coordinator = PairingCoordinator::new(
            Arc::new(transport.clone()),
            Arc::clone(&store),
            Duration::from_millis(100),
            Duration::from_secs(10),
        );
        Fixture {
            _dir: dir,
            transport,
            store,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_found() {
        let f = fixture();
        let result = f.coordinator.begin_or_continue(&DeviceId::from("ghost"), None).await;
        assert_eq!(result, Err(RemoteError::NotFound(DeviceId::from("ghost"))));
    }

    #[tokio::test]
    async fn test_host_pin_is_returned_and_parked() {
        // Arrange
        let f = fixture();
        let id = DeviceId::from("tv");
        f.transport.add_device(device("tv", "TV", &[Protocol::AirPlay]));
        f.transport
            .script_pairing(&id, Protocol::AirPlay, PairingScript::host_pin("4821", "air"));

        // Act
        let outcome = f.coordinator.begin_or_continue(&id, None).await.unwrap();

        // Assert
        assert_eq!(outcome, PairingOutcome::ProvidePin { pin: "4821".to_string() });
        assert_eq!(
            f.coordinator.pending_direction(&id).await,
            Some(PinDirection::HostProvidesPin { pin: "4821".to_string() })
        );
    }

    #[tokio::test]
    async fn test_no_pin_protocol_pairs_immediately() {
        let f = fixture();
        let id = DeviceId::from("tv");
        f.transport.add_device(device("tv", "TV", &[Protocol::Companion]));
        f.transport
            .script_pairing(&id, Protocol::Companion, PairingScript::no_pin("blob"));

        let outcome = f.coordinator.begin_or_continue(&id, None).await.unwrap();

        assert_eq!(outcome, PairingOutcome::Paired { protocol: Protocol::Companion });
        assert!(f.store.lock().await.is_paired(&id));
        assert_eq!(f.transport.open_handshakes(&id), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_airplay_when_companion_cannot_open() {
        let f = fixture();
        let id = DeviceId::from("tv");
        f.transport
            .add_device(device("tv", "TV", &[Protocol::Companion, Protocol::AirPlay]));
        f.transport
            .script_pairing(&id, Protocol::Companion, PairingScript::failing_open());
        f.transport
            .script_pairing(&id, Protocol::AirPlay, PairingScript::device_pin("1111", "air"));

        let outcome = f.coordinator.begin_or_continue(&id, None).await.unwrap();

        assert_eq!(outcome, PairingOutcome::NeedsPin);
        let finished = f.coordinator.begin_or_continue(&id, Some("1111")).await.unwrap();
        assert_eq!(finished, PairingOutcome::Paired { protocol: Protocol::AirPlay });
    }

    #[tokio::test]
    async fn test_every_protocol_failing_is_no_protocol_paired() {
        let f = fixture();
        let id = DeviceId::from("tv");
        f.transport
            .add_device(device("tv", "TV", &[Protocol::Companion, Protocol::AirPlay]));
        f.transport
            .script_pairing(&id, Protocol::Companion, PairingScript::failing_open());

        let result = f.coordinator.begin_or_continue(&id, None).await;

        assert_eq!(result, Err(RemoteError::NoProtocolPaired(id)));
    }

    #[tokio::test]
    async fn test_wrong_pin_discards_session_and_stores_nothing() {
        let f = fixture();
        let id = DeviceId::from("tv");
        f.transport.add_device(device("tv", "TV", &[Protocol::Companion]));
        f.transport
            .script_pairing(&id, Protocol::Companion, PairingScript::device_pin("1234", "c"));
        f.coordinator.begin_or_continue(&id, None).await.unwrap();

        let result = f.coordinator.begin_or_continue(&id, Some("9999")).await;

        assert!(matches!(result, Err(RemoteError::HandshakeFailed { .. })));
        assert_eq!(f.coordinator.pending_direction(&id).await, None);
        assert!(!f.store.lock().await.is_paired(&id));
        assert_eq!(f.transport.open_handshakes(&id), 0);
    }

    #[tokio::test]
    async fn test_empty_pin_restarts_pairing() {
        let f = fixture();
        let id = DeviceId::from("tv");
        f.transport.add_device(device("tv", "TV", &[Protocol::Companion]));
        f.transport
            .script_pairing(&id, Protocol::Companion, PairingScript::device_pin("1234", "c"));
        f.coordinator.begin_or_continue(&id, None).await.unwrap();

        let outcome = f.coordinator.begin_or_continue(&id, Some("  ")).await.unwrap();

        assert_eq!(outcome, PairingOutcome::NeedsPin);
        assert_eq!(f.transport.handshakes_opened(&id), 2);
        assert_eq!(f.transport.open_handshakes(&id), 1);
    }

    #[tokio::test]
    async fn test_slow_begin_is_tolerated() {
        // Arrange
        let f = fixture();
        let id = DeviceId::from("tv");
        f.transport.add_device(device("tv", "TV", &[Protocol::Companion]));
        let mut script = PairingScript::device_pin("1234", "c");
        script.begin_delay = Some(Duration::from_secs(60));
        f.transport.script_pairing(&id, Protocol::Companion, script);
        tokio::time::pause();

        // Act
        let outcome = f.coordinator.begin_or_continue(&id, None).await.unwrap();

        // Assert
        assert_eq!(outcome, PairingOutcome::NeedsPin);
    }

    #[tokio::test]
    async fn test_cleanup_closes_pending_handshakes() {
        let f = fixture();
        let id = DeviceId::from("tv");
        f.transport.add_device(device("tv", "TV", &[Protocol::Companion]));
        f.transport
            .script_pairing(&id, Protocol::Companion, PairingScript::device_pin("1234", "c"));
        f.coordinator.begin_or_continue(&id, None).await.unwrap();

        f.coordinator.cleanup().await;

        assert_eq!(f.transport.open_handshakes(&id), 0);
        assert_eq!(f.coordinator.pending_direction(&id).await, None);
    }
}
