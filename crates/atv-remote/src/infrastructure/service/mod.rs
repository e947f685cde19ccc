//! Service facade: every use case behind one object, with results shaped
//! for a transport layer.
//!
//! A front end (the CLI in `main.rs`, or an HTTP/WebSocket server) talks only
//! to [`RemoteService`].  Each operation returns a serializable value rather
//! than a `Result`, so every response has the same shape and the caller never
//! needs to unpick error types:
//!
//! ```json
//! { "success": true, "data": { ... }, "error": null }
//! ```
//!
//! Pairing uses its own [`PairResponse`] because "PIN required" is a normal,
//! non-error outcome that carries extra fields.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use atv_core::{DeviceId, DeviceInfo, Frame, PlaybackSnapshot, RemoteAction, RemoteError, StreamEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::application::manage_connections::ConnectionRegistry;
use crate::application::pair_device::{PairingCoordinator, PairingOutcome};
use crate::application::send_command::CommandDispatcher;
use crate::application::stream_screens::{EventBroadcaster, StreamingSupervisor};
use crate::infrastructure::capture::encoder::{FrameEncoder, JpegFrameEncoder};
use crate::infrastructure::capture::pymobiledevice::PyMobileDeviceCapture;
use crate::infrastructure::capture::ScreenCapture;
use crate::infrastructure::device::atvscript::AtvScriptTransport;
use crate::infrastructure::device::DeviceTransport;
use crate::infrastructure::storage::config::AppConfig;
use crate::infrastructure::storage::credentials::{CredentialStore, SharedCredentialStore};

// ── Response types ────────────────────────────────────────────────────────────

/// Unified response wrapper: `{ success, data, error }`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

impl<T: Serialize> From<Result<T, RemoteError>> for CommandResult<T> {
    fn from(result: Result<T, RemoteError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

/// Response to one pairing call.
///
/// `success` is set only once credentials are stored.  A pending step
/// reports `needs_pin` or `provide_pin` with `success` false and no `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairResponse {
    pub success: bool,
    /// The device shows a PIN; call again with it.
    pub needs_pin: bool,
    /// The user must enter `pin` on the device, then call again.
    pub provide_pin: bool,
    pub pin: Option<String>,
    /// Protocol that was paired, on success.
    pub protocol: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl From<Result<PairingOutcome, RemoteError>> for PairResponse {
    fn from(result: Result<PairingOutcome, RemoteError>) -> Self {
        match result {
            Ok(PairingOutcome::Paired { protocol }) => Self {
                success: true,
                protocol: Some(protocol.to_string()),
                message: Some(format!("Successfully paired using {protocol}")),
                ..Self::default()
            },
            Ok(PairingOutcome::NeedsPin) => Self {
                needs_pin: true,
                message: Some("Enter the PIN shown on your device".to_string()),
                ..Self::default()
            },
            Ok(PairingOutcome::ProvidePin { pin }) => Self {
                provide_pin: true,
                message: Some(format!("Enter PIN {pin} on your device, then continue")),
                pin: Some(pin),
                ..Self::default()
            },
            Err(e) => Self {
                error: Some(e.to_string()),
                ..Self::default()
            },
        }
    }
}

/// One screenshot as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotDto {
    pub device_id: DeviceId,
    /// Base64 JPEG.
    pub image: String,
    pub timestamp: f64,
}

impl ScreenshotDto {
    fn new(device_id: &DeviceId, frame: &Frame) -> Self {
        Self {
            device_id: device_id.clone(),
            image: frame.image.clone(),
            timestamp: frame.timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionsDto {
    pub active_connections: Vec<DeviceId>,
    pub count: usize,
}

// ── Facade ────────────────────────────────────────────────────────────────────

pub struct RemoteService {
    config: AppConfig,
    registry: Arc<ConnectionRegistry>,
    pairing: PairingCoordinator,
    dispatcher: CommandDispatcher,
    streaming: StreamingSupervisor,
    events: EventBroadcaster,
    capture: Arc<dyn ScreenCapture>,
}

impl RemoteService {
    /// Wires the components over explicit collaborators.
    pub fn new(
        config: AppConfig,
        store: CredentialStore,
        transport: Arc<dyn DeviceTransport>,
        capture: Arc<dyn ScreenCapture>,
        encoder: Arc<dyn FrameEncoder>,
    ) -> Self {
        let store: SharedCredentialStore = store.shared();
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            config.device.scan_timeout(),
        ));
        let pairing = PairingCoordinator::new(
            transport,
            store,
            config.device.scan_timeout(),
            config.device.handshake_timeout(),
        );
        let dispatcher = CommandDispatcher::new(Arc::clone(&registry));
        let streaming = StreamingSupervisor::new(
            Arc::clone(&capture),
            encoder,
            config.capture.timeout(),
            config.capture.default_quality,
        );

        Self {
            config,
            registry,
            pairing,
            dispatcher,
            streaming,
            events: EventBroadcaster::default(),
            capture,
        }
    }

    /// Production wiring: pyatv for devices, pymobiledevice3 for capture.
    pub fn from_config(config: AppConfig, credentials: &Path, legacy: Option<&Path>) -> Self {
        let store = CredentialStore::open(credentials, legacy);
        let transport = Arc::new(AtvScriptTransport::new(
            config.device.atvscript.clone(),
            config.device.atvremote.clone(),
        ));
        let capture = Arc::new(PyMobileDeviceCapture::new(
            config.capture.python.clone(),
            config.capture.timeout(),
            config.capture.tunnel_grace(),
        ));
        let encoder = Arc::new(JpegFrameEncoder::new(config.capture.max_width));
        Self::new(config, store, transport, capture, encoder)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // ── Devices ──────────────────────────────────────────────────────────────

    pub async fn list_devices(&self) -> CommandResult<Vec<DeviceInfo>> {
        self.registry
            .scan(self.config.device.network_scan_timeout())
            .await
            .into()
    }

    /// Starts or continues pairing; see [`PairingCoordinator::begin_or_continue`].
    pub async fn pair_device(&self, id: &DeviceId, pin: Option<&str>) -> PairResponse {
        self.pairing.begin_or_continue(id, pin).await.into()
    }

    pub async fn cancel_pairing(&self, id: &DeviceId) -> CommandResult<String> {
        if self.pairing.abandon(id).await {
            CommandResult::ok("Pairing cancelled".to_string())
        } else {
            CommandResult::err("No pairing in progress")
        }
    }

    pub async fn connect_device(&self, id: &DeviceId) -> CommandResult<String> {
        self.registry
            .connect(id)
            .await
            .map(|()| format!("Connected to {id}"))
            .into()
    }

    pub async fn disconnect_device(&self, id: &DeviceId) -> CommandResult<String> {
        if self.registry.disconnect(id).await {
            CommandResult::ok(format!("Disconnected from {id}"))
        } else {
            CommandResult::ok(format!("{id} was not connected"))
        }
    }

    pub async fn unpair_device(&self, id: &DeviceId) -> CommandResult<String> {
        self.registry
            .unpair(id)
            .await
            .map(|()| format!("Unpaired {id}"))
            .into()
    }

    // ── Remote control ───────────────────────────────────────────────────────

    pub async fn send_command(
        &self,
        id: &DeviceId,
        action: &str,
        value: Option<i32>,
    ) -> CommandResult<String> {
        self.dispatcher
            .send(id, action, value)
            .await
            .map(|action| format!("Command '{action}' sent"))
            .into()
    }

    pub async fn playing(&self, id: &DeviceId) -> CommandResult<PlaybackSnapshot> {
        match self.dispatcher.playback_info(id).await {
            Some(snapshot) => CommandResult::ok(snapshot),
            None => CommandResult::err("Playback information unavailable"),
        }
    }

    // ── Screen capture ───────────────────────────────────────────────────────

    /// Captures one frame.  `quality` defaults to the configured value.
    pub async fn capture_screenshot(
        &self,
        id: &DeviceId,
        quality: Option<u8>,
    ) -> CommandResult<ScreenshotDto> {
        let quality = quality.unwrap_or(self.config.capture.default_quality);
        if !(1..=100).contains(&quality) {
            return CommandResult::err(RemoteError::InvalidQuality(quality).to_string());
        }
        if !self.capture.is_available().await {
            return CommandResult::err(
                RemoteError::ExternalToolUnavailable("pymobiledevice3 is not installed".to_string())
                    .to_string(),
            );
        }
        match self.streaming.capture_once(id, quality).await {
            Ok(Some(frame)) => CommandResult::ok(ScreenshotDto::new(id, &frame)),
            Ok(None) => CommandResult::err("Failed to capture screenshot"),
            Err(e) => CommandResult::err(e.to_string()),
        }
    }

    pub async fn cached_screenshot(&self, id: &DeviceId) -> CommandResult<ScreenshotDto> {
        match self.streaming.cached(id).await {
            Some(frame) => CommandResult::ok(ScreenshotDto::new(id, &frame)),
            None => CommandResult::err("No cached screenshot"),
        }
    }

    /// Streams `id` to every subscriber.  `interval` defaults to the
    /// configured value.
    pub async fn start_stream(&self, id: &DeviceId, interval: Option<Duration>) -> CommandResult<String> {
        let interval = interval.unwrap_or_else(|| self.config.capture.stream_interval());
        self.streaming
            .start(id, Arc::new(self.events.clone()), interval)
            .await;
        CommandResult::ok(format!("Streaming {id} every {}ms", interval.as_millis()))
    }

    pub async fn stop_stream(&self, id: &DeviceId) -> CommandResult<String> {
        if self.streaming.stop(id).await {
            CommandResult::ok(format!("Stopped streaming {id}"))
        } else {
            CommandResult::ok(format!("{id} was not streaming"))
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    pub async fn pair_capture_channel(&self, id: &DeviceId) -> CommandResult<String> {
        match self.capture.pair_channel(id).await {
            Ok(()) => CommandResult::ok(
                "Capture channel paired. You may need to confirm on your device.".to_string(),
            ),
            Err(e) => CommandResult::err(RemoteError::from(e).to_string()),
        }
    }

    pub async fn start_tunnel(&self) -> CommandResult<String> {
        match self.capture.start_tunnel().await {
            Ok(()) => CommandResult::ok("Tunnel daemon running".to_string()),
            Err(e) => CommandResult::err(RemoteError::from(e).to_string()),
        }
    }

    // ── Debug inspection ─────────────────────────────────────────────────────

    pub async fn debug_connections(&self) -> CommandResult<ConnectionsDto> {
        let active_connections = self.registry.active_connections().await;
        CommandResult::ok(ConnectionsDto {
            count: active_connections.len(),
            active_connections,
        })
    }

    pub async fn debug_commands(&self, id: &DeviceId) -> CommandResult<Vec<RemoteAction>> {
        match self.dispatcher.supported_actions(id).await {
            Some(actions) => CommandResult::ok(actions),
            None => CommandResult::err(format!("{id} is not connected")),
        }
    }

    /// Stops streams and the tunnel, abandons pending pairings, and closes
    /// every session.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.streaming.cleanup().await;
        self.pairing.cleanup().await;
        self.registry.cleanup().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
