//! Application layer use cases.
//!
//! Each use case depends on the device and capture traits from
//! `infrastructure` rather than on concrete tools, so every state machine
//! here runs against the in-memory doubles in tests.
//!
//! # Sub-modules
//!
//! - **`manage_connections`** – The connection registry: discovery scoped to
//!   one device, credential attachment, and the live-session table.
//!
//! - **`pair_device`** – The pairing coordinator: the per-device PIN
//!   handshake state machine and its pending-session table.
//!
//! - **`send_command`** – The command dispatcher: action parsing, capability
//!   checks, and the fallback substitution table.
//!
//! - **`stream_screens`** – The streaming supervisor: one cancellable capture
//!   loop per device, the screenshot cache, and event fan-out.

pub mod manage_connections;
pub mod pair_device;
pub mod send_command;
pub mod stream_screens;
