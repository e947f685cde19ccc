//! Messages published to stream subscribers.
//!
//! Events are tagged JSON objects of the form
//! `{ "type": "...", "payload": { ... } }` so a transport layer can forward
//! them to clients without re-shaping.

pub mod events;
