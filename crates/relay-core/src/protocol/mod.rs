//! Wire protocol for the WebSocket relay.
//!
//! - `request`: decoding inbound JSON frames into typed requests
//! - `response`: outbound messages (direct replies and relays)
//! - `encoding`: binary strings and compact peer lists

pub mod encoding;
pub mod request;
pub mod response;

pub use encoding::{encode_peers, Compact, PeerEntry, PeerList};
pub use request::{decode_request, Action, AnnounceRequest, Offer, Request, ScrapeRequest};
pub use response::{
    AnnounceResponse, ConnectResponse, FailureResponse, OutboundMessage, RelayedAnswer,
    RelayedOffer, ScrapeResponse,
};
