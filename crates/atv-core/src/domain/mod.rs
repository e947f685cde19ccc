//! Domain entities for ATV-Remote.
//!
//! Pure types with no I/O.  Everything here can be compiled and tested on any
//! platform without a device on the network.

/// The closed remote-action set and per-protocol capability tables.
pub mod action;

/// Device identity, protocols, and scan results.
pub mod device;

/// Captured screenshot frames.
pub mod frame;

/// Now-playing metadata.
pub mod playback;
