//! Persistent storage: the credential file and the TOML configuration.

pub mod config;
pub mod credentials;
