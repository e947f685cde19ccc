//! ConnectionRegistry: live device sessions keyed by identifier.
//!
//! # Connection lifecycle
//!
//! ```text
//! connect(id) ─► discover(id) ─► attach stored credentials ─► open session
//!                                                                 │
//!                                            registered until disconnect/unpair
//! ```
//!
//! `connect` is idempotent: a registered session is reused without touching
//! the network.  The command dispatcher calls [`ConnectionRegistry::ensure_session`]
//! so a command against an unconnected device opens the session first.
//!
//! No lock is held across a device call.  When two callers connect the same
//! device concurrently, the later registration wins and the session it
//! replaced is closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use atv_core::{DeviceId, DeviceInfo, Protocol, RemoteError};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::infrastructure::device::{discover_device, DeviceSession, DeviceTransport};
use crate::infrastructure::storage::credentials::SharedCredentialStore;

pub struct ConnectionRegistry {
    transport: Arc<dyn DeviceTransport>,
    store: SharedCredentialStore,
    connections: Mutex<HashMap<DeviceId, Arc<dyn DeviceSession>>>,
    scan_timeout: Duration,
}

impl ConnectionRegistry {
    /// `scan_timeout` bounds the discovery scoped to one device.
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        store: SharedCredentialStore,
        scan_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            connections: Mutex::new(HashMap::new()),
            scan_timeout,
        }
    }

    /// Scans the whole network and marks each result paired when the store
    /// holds a credential for it.
    ///
    /// A failing scan is logged and reported as an empty listing.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Timeout`] when the scan overruns `scan_timeout`
    /// plus one second.
    pub async fn scan(&self, scan_timeout: Duration) -> Result<Vec<DeviceInfo>, RemoteError> {
        let deadline = scan_timeout + Duration::from_secs(1);
        let configs = match timeout(deadline, self.transport.scan(scan_timeout, None)).await {
            Ok(Ok(configs)) => configs,
            Ok(Err(e)) => {
                warn!("network scan failed: {e}");
                return Ok(Vec::new());
            }
            Err(_) => {
                return Err(RemoteError::Timeout {
                    operation: "network scan".to_string(),
                    after: deadline,
                })
            }
        };

        let store = self.store.lock().await;
        let devices: Vec<DeviceInfo> = configs
            .iter()
            .map(|c| c.to_info(store.is_paired(&c.identifier)))
            .collect();
        info!(found = devices.len(), "network scan complete");
        Ok(devices)
    }

    /// Opens a session to `id` unless one is already registered.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::NotFound`] / [`RemoteError::Timeout`] from discovery.
    /// - [`RemoteError::ConnectionFailed`] when the session cannot be opened.
    pub async fn connect(&self, id: &DeviceId) -> Result<(), RemoteError> {
        self.ensure_session(id).await.map(|_| ())
    }

    /// Returns the registered session for `id`, connecting first if needed.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn ensure_session(&self, id: &DeviceId) -> Result<Arc<dyn DeviceSession>, RemoteError> {
        if let Some(session) = self.session(id).await {
            debug!(device = %id, "reusing open session");
            return Ok(session);
        }

        let mut config = discover_device(self.transport.as_ref(), id, self.scan_timeout).await?;

        let stored = self.store.lock().await.get(id).cloned().unwrap_or_default();
        for (protocol_name, blob) in stored {
            let attached = protocol_name
                .parse::<Protocol>()
                .map_err(|e| e.to_string())
                .and_then(|protocol| {
                    config
                        .set_credentials(protocol, blob)
                        .map_err(|e| e.to_string())
                });
            if let Err(reason) = attached {
                warn!(device = %id, protocol = %protocol_name, "could not apply stored credentials: {reason}");
            }
        }

        let session = self
            .transport
            .connect(&config)
            .await
            .map_err(|e| RemoteError::ConnectionFailed {
                device: id.clone(),
                reason: e.to_string(),
            })?;

        let replaced = self
            .connections
            .lock()
            .await
            .insert(id.clone(), Arc::clone(&session));
        if let Some(old) = replaced {
            debug!(device = %id, "closing session replaced by concurrent connect");
            close_session(id, old).await;
        }

        info!(device = %id, name = %config.name, "connected");
        Ok(session)
    }

    pub async fn session(&self, id: &DeviceId) -> Option<Arc<dyn DeviceSession>> {
        self.connections.lock().await.get(id).cloned()
    }

    pub async fn is_connected(&self, id: &DeviceId) -> bool {
        self.connections.lock().await.contains_key(id)
    }

    /// Closes and forgets the session for `id`.  Returns `false` when no
    /// session was registered.
    pub async fn disconnect(&self, id: &DeviceId) -> bool {
        let removed = self.connections.lock().await.remove(id);
        match removed {
            Some(session) => {
                close_session(id, session).await;
                info!(device = %id, "disconnected");
                true
            }
            None => false,
        }
    }

    /// Forgets every credential for `id`, disconnecting it first.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::NotPaired`] when nothing was stored; nothing is
    ///   disconnected in that case.
    /// - [`RemoteError::PersistenceFailed`] when the file cannot be written.
    pub async fn unpair(&self, id: &DeviceId) -> Result<(), RemoteError> {
        if !self.store.lock().await.is_paired(id) {
            return Err(RemoteError::NotPaired(id.clone()));
        }

        self.disconnect(id).await;

        let removed = self.store.lock().await.remove(id)?;
        if !removed {
            return Err(RemoteError::NotPaired(id.clone()));
        }
        info!(device = %id, "unpaired");
        Ok(())
    }

    /// Identifiers with a registered session, sorted.
    pub async fn active_connections(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.connections.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Closes every session.
    pub async fn cleanup(&self) {
        let drained: Vec<_> = self.connections.lock().await.drain().collect();
        for (id, session) in drained {
            close_session(&id, session).await;
        }
    }
}

async fn close_session(id: &DeviceId, session: Arc<dyn DeviceSession>) {
    if let Err(e) = session.close().await {
        warn!(device = %id, "error closing session: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
