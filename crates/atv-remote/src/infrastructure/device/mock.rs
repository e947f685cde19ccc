//! In-memory device transport for unit and integration testing.
//!
//! Tests register scripted devices, pairing behaviour, and session responses,
//! then inspect what the application layer did: which operations were
//! invoked, how many sessions were opened or closed, and which handshakes are
//! still open.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atv_core::{Capabilities, DeviceId, Protocol, RemoteOperation};

use super::{
    DeviceConfig, DeviceError, DeviceSession, DeviceTransport, PairedCredentials, PairingHandshake,
    PinRequirement, PlayingMetadata,
};

/// Scripted behaviour of one `(device, protocol)` pairing.
#[derive(Debug, Clone)]
pub struct PairingScript {
    pub requirement: PinRequirement,
    /// When set, `finish` fails unless this PIN was supplied.
    pub expected_pin: Option<String>,
    pub credentials: String,
    /// `pair()` itself fails for this protocol.
    pub fail_open: bool,
    /// `begin()` sleeps this long before returning.
    pub begin_delay: Option<Duration>,
}

impl PairingScript {
    /// The device shows `pin` on screen.
    pub fn device_pin(pin: &str, credentials: &str) -> Self {
        Self {
            requirement: PinRequirement::DeviceDisplays,
            expected_pin: Some(pin.to_string()),
            credentials: credentials.to_string(),
            fail_open: false,
            begin_delay: None,
        }
    }

    /// The host must show `pin` for the user to type on the device.
    pub fn host_pin(pin: &str, credentials: &str) -> Self {
        Self {
            requirement: PinRequirement::HostDisplays(pin.to_string()),
            expected_pin: None,
            credentials: credentials.to_string(),
            fail_open: false,
            begin_delay: None,
        }
    }

    pub fn no_pin(credentials: &str) -> Self {
        Self {
            requirement: PinRequirement::NotRequired,
            expected_pin: None,
            credentials: credentials.to_string(),
            fail_open: false,
            begin_delay: None,
        }
    }

    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::no_pin("")
        }
    }
}

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceConfig>,
    scan_delay: Option<Duration>,
    scan_count: u32,
    pairing: HashMap<(DeviceId, Protocol), PairingScript>,
    capabilities: HashMap<DeviceId, Capabilities>,
    rejected: HashMap<DeviceId, HashSet<RemoteOperation>>,
    playing: HashMap<DeviceId, PlayingMetadata>,
    failing_connect: HashSet<DeviceId>,
    // ── recorders ──
    invocations: HashMap<DeviceId, Vec<RemoteOperation>>,
    connect_count: HashMap<DeviceId, u32>,
    attached: HashMap<DeviceId, Vec<(Protocol, String)>>,
    sessions_closed: HashMap<DeviceId, u32>,
    handshakes_opened: HashMap<DeviceId, u32>,
    handshakes_closed: HashMap<DeviceId, u32>,
}

/// A mock implementation of [`DeviceTransport`].
///
/// Cloning shares the same scripted state.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().expect("lock poisoned");
        f(&mut state)
    }

    // ── Scripting ────────────────────────────────────────────────────────────

    pub fn add_device(&self, config: DeviceConfig) {
        self.with_state(|s| s.devices.push(config));
    }

    pub fn remove_device(&self, id: &DeviceId) {
        self.with_state(|s| s.devices.retain(|d| &d.identifier != id));
    }

    /// Every scan sleeps for `delay` before answering.
    pub fn set_scan_delay(&self, delay: Duration) {
        self.with_state(|s| s.scan_delay = Some(delay));
    }

    pub fn script_pairing(&self, id: &DeviceId, protocol: Protocol, script: PairingScript) {
        self.with_state(|s| s.pairing.insert((id.clone(), protocol), script));
    }

    /// Overrides the capability table of sessions opened to `id`.
    /// Sessions default to [`Capabilities::full`].
    pub fn set_capabilities(&self, id: &DeviceId, capabilities: Capabilities) {
        self.with_state(|s| s.capabilities.insert(id.clone(), capabilities));
    }

    /// The device refuses `operation` when invoked.
    pub fn reject_operation(&self, id: &DeviceId, operation: RemoteOperation) {
        self.with_state(|s| {
            s.rejected.entry(id.clone()).or_default().insert(operation);
        });
    }

    pub fn set_playing(&self, id: &DeviceId, metadata: PlayingMetadata) {
        self.with_state(|s| s.playing.insert(id.clone(), metadata));
    }

    pub fn fail_connect(&self, id: &DeviceId) {
        self.with_state(|s| s.failing_connect.insert(id.clone()));
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    /// Every operation a session for `id` was asked to run, in order,
    /// including the ones the device rejected.
    pub fn invocations(&self, id: &DeviceId) -> Vec<RemoteOperation> {
        self.with_state(|s| s.invocations.get(id).cloned().unwrap_or_default())
    }

    pub fn connect_count(&self, id: &DeviceId) -> u32 {
        self.with_state(|s| s.connect_count.get(id).copied().unwrap_or(0))
    }

    /// Credentials present on the config passed to the most recent connect.
    pub fn attached_credentials(&self, id: &DeviceId) -> Vec<(Protocol, String)> {
        self.with_state(|s| s.attached.get(id).cloned().unwrap_or_default())
    }

    pub fn sessions_closed(&self, id: &DeviceId) -> u32 {
        self.with_state(|s| s.sessions_closed.get(id).copied().unwrap_or(0))
    }

    pub fn handshakes_opened(&self, id: &DeviceId) -> u32 {
        self.with_state(|s| s.handshakes_opened.get(id).copied().unwrap_or(0))
    }

    /// Handshakes opened for `id` that were never closed.
    pub fn open_handshakes(&self, id: &DeviceId) -> u32 {
        self.with_state(|s| {
            let opened = s.handshakes_opened.get(id).copied().unwrap_or(0);
            let closed = s.handshakes_closed.get(id).copied().unwrap_or(0);
            opened.saturating_sub(closed)
        })
    }

    pub fn scan_count(&self) -> u32 {
        self.with_state(|s| s.scan_count)
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    async fn scan(
        &self,
        _timeout: Duration,
        identifier: Option<&DeviceId>,
    ) -> Result<Vec<DeviceConfig>, DeviceError> {
        let delay = self.with_state(|s| {
            s.scan_count += 1;
            s.scan_delay
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.with_state(|s| {
            s.devices
                .iter()
                .filter(|d| identifier.map_or(true, |id| &d.identifier == id))
                .cloned()
                .collect()
        }))
    }

    async fn pair(
        &self,
        config: &DeviceConfig,
        protocol: Protocol,
    ) -> Result<Box<dyn PairingHandshake>, DeviceError> {
        let id = config.identifier.clone();
        let script = self
            .with_state(|s| s.pairing.get(&(id.clone(), protocol)).cloned())
            .ok_or(DeviceError::ServiceUnavailable(protocol))?;
        if script.fail_open {
            return Err(DeviceError::Pairing(format!("{protocol} pairing refused")));
        }

        self.with_state(|s| *s.handshakes_opened.entry(id.clone()).or_default() += 1);
        Ok(Box::new(MockHandshake {
            id,
            protocol,
            script,
            pin: None,
            closed: false,
            state: Arc::clone(&self.state),
        }))
    }

    async fn connect(&self, config: &DeviceConfig) -> Result<Arc<dyn DeviceSession>, DeviceError> {
        let id = config.identifier.clone();
        let attached: Vec<(Protocol, String)> = config
            .services
            .iter()
            .filter_map(|svc| svc.credentials.clone().map(|c| (svc.protocol, c)))
            .collect();

        let capabilities = self.with_state(|s| {
            *s.connect_count.entry(id.clone()).or_default() += 1;
            s.attached.insert(id.clone(), attached);
            if s.failing_connect.contains(&id) {
                return Err(DeviceError::Rejected("connection refused".to_string()));
            }
            Ok(s.capabilities.get(&id).cloned().unwrap_or_else(Capabilities::full))
        })?;

        Ok(Arc::new(MockSession {
            id,
            capabilities,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockHandshake {
    id: DeviceId,
    protocol: Protocol,
    script: PairingScript,
    pin: Option<String>,
    closed: bool,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl PairingHandshake for MockHandshake {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn begin(&mut self) -> Result<(), DeviceError> {
        if let Some(delay) = self.script.begin_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn pin_requirement(&self) -> PinRequirement {
        self.script.requirement.clone()
    }

    fn pin(&mut self, pin: &str) {
        self.pin = Some(pin.to_string());
    }

    async fn finish(&mut self) -> Result<PairedCredentials, DeviceError> {
        if let Some(expected) = &self.script.expected_pin {
            if self.pin.as_deref() != Some(expected.as_str()) {
                return Err(DeviceError::Pairing("incorrect PIN".to_string()));
            }
        }
        Ok(PairedCredentials {
            protocol: self.protocol,
            credentials: self.script.credentials.clone(),
        })
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.state.lock().expect("lock poisoned");
        *state.handshakes_closed.entry(self.id.clone()).or_default() += 1;
    }
}

struct MockSession {
    id: DeviceId,
    capabilities: Capabilities,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl DeviceSession for MockSession {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn invoke(&self, operation: RemoteOperation) -> Result<(), DeviceError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state
            .invocations
            .entry(self.id.clone())
            .or_default()
            .push(operation);
        let rejected = state
            .rejected
            .get(&self.id)
            .is_some_and(|ops| ops.contains(&operation));
        if rejected {
            return Err(DeviceError::Rejected(format!("{operation} refused")));
        }
        Ok(())
    }

    async fn playing(&self) -> Result<PlayingMetadata, DeviceError> {
        let state = self.state.lock().expect("lock poisoned");
        state
            .playing
            .get(&self.id)
            .cloned()
            .ok_or_else(|| DeviceError::Unsupported("metadata".to_string()))
    }

    async fn close(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock().expect("lock poisoned");
        *state.sessions_closed.entry(self.id.clone()).or_default() += 1;
        Ok(())
    }
}

/// Builds a device config exposing `protocols` with no credentials attached.
pub fn device(id: &str, name: &str, protocols: &[Protocol]) -> DeviceConfig {
    DeviceConfig {
        identifier: DeviceId::from(id),
        name: name.to_string(),
        address: "192.168.1.20".to_string(),
        model: Some("AppleTV11,1".to_string()),
        os_version: Some("17.4".to_string()),
        services: protocols
            .iter()
            .enumerate()
            .map(|(i, &protocol)| super::ServiceDescriptor {
                protocol,
                port: 49152 + i as u16,
                credentials: None,
            })
            .collect(),
    }
}
