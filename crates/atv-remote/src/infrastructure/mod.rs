//! Infrastructure layer for atv-remote.
//!
//! - `device`  – the device library seam (scan, pair, connect) plus an
//!   in-memory double and the pyatv command-line adapter.
//! - `capture` – the external screenshot tool and frame encoding.
//! - `storage` – the credential file and the TOML configuration.
//! - `service` – the facade that wires every component together and shapes
//!   results for a transport layer.

pub mod capture;
pub mod device;
pub mod service;
pub mod storage;
