//! # atv-core
//!
//! Shared library for ATV-Remote containing the domain vocabulary used by
//! every other crate: device identifiers, protocols, the closed set of remote
//! actions, playback snapshots, screenshot frames, and the error taxonomy.
//!
//! This crate has zero dependencies on device libraries, processes, or the
//! file system.
//!
//! # Architecture overview
//!
//! ATV-Remote controls network-attached media devices.  A controller pairs
//! with a device once (a PIN exchange that yields a long-term credential),
//! then opens sessions to send remote-control actions and read what is
//! playing.  Separately it can poll the device screen through an external
//! capture tool and stream the frames to listeners.
//!
//! - **`domain`** – Pure types: [`DeviceId`], [`Protocol`], [`RemoteAction`]
//!   and the capability table that maps actions onto device operations.
//!
//! - **`protocol`** – The tagged JSON events published to stream
//!   subscribers.
//!
//! - **`error`** – [`RemoteError`], the failure taxonomy surfaced at the
//!   service boundary.

pub mod domain;
pub mod error;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `atv_core::DeviceId` instead of `atv_core::domain::device::DeviceId`.
pub use domain::action::{Capabilities, RemoteAction, RemoteOperation};
pub use domain::device::{DeviceId, DeviceInfo, Protocol};
pub use domain::frame::Frame;
pub use domain::playback::{DeviceState, PlaybackSnapshot};
pub use error::RemoteError;
pub use protocol::events::StreamEvent;
