//! relay-core: Signaling engine for a WebTorrent-style WebSocket tracker.
//!
//! This crate provides:
//! - A per-session peer registry (`Swarm`, `SwarmTable`)
//! - The JSON wire protocol: announce, scrape, offer and answer relay
//! - The protocol engine (`Tracker`) driven by connection events
//! - The `PeerSink` trait the transport implements for each connection
//!
//! It does no I/O of its own; see the `relay-daemon` crate for the server.

pub mod config;
pub mod error;
pub mod ids;
pub mod protocol;
pub mod swarm;
pub mod table;
pub mod tracker;
pub mod transport;

pub use config::TrackerConfig;
pub use error::{DecodeError, RelayError};
pub use ids::{InfoHash, PeerId};
pub use protocol::{OutboundMessage, Request};
pub use swarm::{AnnounceEvent, PeerRecord, ScrapeCounts, Swarm};
pub use table::SwarmTable;
pub use tracker::{Tracker, TrackerStats};
pub use transport::{deliver, ConnectionId, PeerAddress, PeerSink, SendError};
