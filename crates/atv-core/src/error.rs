//! Failure taxonomy surfaced at the service boundary.
//!
//! Component-internal failures (a credential that cannot be attached to one
//! protocol, a single fallback attempt) are logged and absorbed by the
//! component.  Only when every alternative is exhausted does one of these
//! variants reach the caller.

use std::time::Duration;

use thiserror::Error;

use crate::domain::action::RemoteAction;
use crate::domain::device::DeviceId;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// The device did not answer discovery.
    #[error("device {0} not found")]
    NotFound(DeviceId),

    /// No stored credential exists for the device.
    #[error("device {0} was not paired")]
    NotPaired(DeviceId),

    /// The pairing protocol rejected the exchange or the PIN was wrong.
    #[error("pairing with {device} failed: {reason}")]
    HandshakeFailed { device: DeviceId, reason: String },

    /// Every candidate protocol failed to open a handshake.
    #[error("no protocol could be paired with {0}")]
    NoProtocolPaired(DeviceId),

    /// Opening a session against the device failed.
    #[error("failed to connect to {device}: {reason}")]
    ConnectionFailed { device: DeviceId, reason: String },

    /// The device refused an action and the fallback chain is exhausted.
    #[error("command '{action}' failed: {reason}")]
    CommandRejected { action: RemoteAction, reason: String },

    /// The action name is not part of the remote's action set.
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// A bounded operation exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The credential file could not be read or written.
    #[error("credential persistence failed: {0}")]
    PersistenceFailed(String),

    /// The external capture tool is missing or unusable.
    #[error("external tool unavailable: {0}")]
    ExternalToolUnavailable(String),

    /// The capture tool ran but produced no usable frame.
    #[error("screen capture failed: {0}")]
    CaptureFailed(String),

    /// Capture quality outside `1..=100`.
    #[error("quality must be between 1 and 100, got {0}")]
    InvalidQuality(u8),
}
