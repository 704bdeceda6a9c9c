//! relay-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to run a real server.

pub mod config;
pub mod connection;
pub mod server;

// Re-export key types for convenience
pub use config::Config;
pub use connection::{ClientConnection, ConnectionEvent};
pub use server::RelayServer;
