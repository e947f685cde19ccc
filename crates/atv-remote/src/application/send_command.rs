//! CommandDispatcher: remote actions onto device sessions.
//!
//! Each action maps to exactly one device operation.  When that operation
//! fails, either because the session's capability table does not list it or
//! because the device refused it, one substitute is tried:
//!
//! | Operation    | Substitute |
//! |--------------|------------|
//! | `play_pause` | `play`     |
//! | `menu`       | `top_menu` |
//!
//! Every other failure is final.

use std::sync::Arc;

use atv_core::{DeviceId, PlaybackSnapshot, RemoteAction, RemoteError, RemoteOperation};
use tracing::{debug, info, warn};

use super::manage_connections::ConnectionRegistry;
use crate::infrastructure::device::{DeviceError, DeviceSession};

pub struct CommandDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Parses `action` and sends it to `id`, connecting first if needed.
    ///
    /// `value` is accepted for forward compatibility and currently unused by
    /// every action.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::UnknownAction`] before any device traffic.
    /// - Connection errors from [`ConnectionRegistry::ensure_session`].
    /// - [`RemoteError::CommandRejected`] once the fallback is exhausted.
    pub async fn send(
        &self,
        id: &DeviceId,
        action: &str,
        value: Option<i32>,
    ) -> Result<RemoteAction, RemoteError> {
        let action: RemoteAction = action.parse()?;
        if let Some(value) = value {
            debug!(device = %id, %action, value, "ignoring command value");
        }
        self.send_action(id, action).await?;
        Ok(action)
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_action(&self, id: &DeviceId, action: RemoteAction) -> Result<(), RemoteError> {
        let session = self.registry.ensure_session(id).await?;
        let operation = action.operation();

        let err = match invoke(session.as_ref(), operation).await {
            Ok(()) => {
                info!(device = %id, %action, "command sent");
                return Ok(());
            }
            Err(e) => e,
        };

        let Some(fallback) = operation.fallback() else {
            warn!(device = %id, %action, "command failed: {err}");
            return Err(RemoteError::CommandRejected {
                action,
                reason: err.to_string(),
            });
        };

        info!(device = %id, %operation, %fallback, "command failed ({err}); trying fallback");
        match invoke(session.as_ref(), fallback).await {
            Ok(()) => {
                info!(device = %id, %action, %fallback, "command sent via fallback");
                Ok(())
            }
            Err(e) => {
                warn!(device = %id, %action, "fallback failed: {e}");
                Err(RemoteError::CommandRejected {
                    action,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// What `id` is playing, or `None` when the device cannot be reached or
    /// does not report metadata.
    pub async fn playback_info(&self, id: &DeviceId) -> Option<PlaybackSnapshot> {
        let session = match self.registry.ensure_session(id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(device = %id, "cannot read playback: {e}");
                return None;
            }
        };

        let playing = match session.playing().await {
            Ok(playing) => playing,
            Err(e) => {
                warn!(device = %id, "playback query failed: {e}");
                return None;
            }
        };

        Some(PlaybackSnapshot {
            device_id: id.clone(),
            title: playing.title,
            artist: playing.artist,
            album: playing.album,
            app: playing.app,
            playback_state: playing.device_state.map(|s| s.as_str().to_string()),
            position: playing.position,
            duration: playing.total_time,
            artwork_url: None,
        })
    }

    /// Actions the live session for `id` admits.  `None` when `id` is not
    /// connected; this never opens a session.
    pub async fn supported_actions(&self, id: &DeviceId) -> Option<Vec<RemoteAction>> {
        let session = self.registry.session(id).await?;
        Some(session.capabilities().supported_actions())
    }
}

/// Runs `operation`, rejecting it locally when the capability table does not
/// list it.
async fn invoke(session: &dyn DeviceSession, operation: RemoteOperation) -> Result<(), DeviceError> {
    if !session.capabilities().supports(operation) {
        return Err(DeviceError::Unsupported(operation.to_string()));
    }
    session.invoke(operation).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
