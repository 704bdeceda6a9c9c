//! Byte-level encodings used on the wire.
//!
//! - **Binary strings**: byte fields travel inside JSON as strings with one
//!   character per byte (code points `U+0000..=U+00FF`).
//! - **Compact peers**: fixed-width `address ‖ port` blocks, big-endian,
//!   6 bytes per IPv4 peer and 18 bytes per IPv6 peer.

use crate::swarm::PeerRecord;
use crate::transport::AddressFamily;
use serde::Serialize;

/// Encode bytes as a binary string.
pub fn bytes_to_binary_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Decode a binary string. Returns `None` if any character is above `U+00FF`.
pub fn binary_string_to_bytes(s: &str) -> Option<Vec<u8>> {
    s.chars().map(|c| u8::try_from(c).ok()).collect()
}

/// How peers are laid out in an announce response, from the `compact` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compact {
    /// `compact=1`: binary `peers` and `peers6` blocks.
    Binary,
    /// `compact=0`: list of `{peer_id, ip, port}`.
    Dictionary,
    /// Anything else: keep the internal records.
    Records,
}

impl Compact {
    pub fn from_flag(flag: Option<i64>) -> Self {
        match flag {
            Some(1) => Self::Binary,
            Some(0) => Self::Dictionary,
            _ => Self::Records,
        }
    }
}

/// Dictionary-form peer entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerEntry {
    /// Binary string.
    pub peer_id: String,
    pub ip: String,
    pub port: u16,
}

/// Encoded peer list for an announce response.
#[derive(Debug, Clone)]
pub enum PeerList {
    Compact { peers: Vec<u8>, peers6: Vec<u8> },
    Dictionary(Vec<PeerEntry>),
    Records(Vec<PeerRecord>),
}

/// Encode `peers` in their given order. No randomness here.
pub fn encode_peers(peers: &[PeerRecord], compact: Compact) -> PeerList {
    match compact {
        Compact::Binary => {
            let (peers, peers6) = compact_peers(peers);
            PeerList::Compact { peers, peers6 }
        }
        Compact::Dictionary => PeerList::Dictionary(
            peers
                .iter()
                .map(|record| PeerEntry {
                    peer_id: record.peer_id.to_binary_string(),
                    ip: record.address.ip.clone(),
                    port: record.address.port,
                })
                .collect(),
        ),
        Compact::Records => PeerList::Records(peers.to_vec()),
    }
}

/// Split into IPv4 and IPv6 blocks. Unparseable addresses are skipped.
pub fn compact_peers(peers: &[PeerRecord]) -> (Vec<u8>, Vec<u8>) {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();

    for record in peers {
        let port = record.address.port.to_be_bytes();
        match record.address.family() {
            AddressFamily::V4(ip) => {
                v4.extend_from_slice(&ip.octets());
                v4.extend_from_slice(&port);
            }
            AddressFamily::V6(ip) => {
                v6.extend_from_slice(&ip.octets());
                v6.extend_from_slice(&port);
            }
            AddressFamily::Unknown => {}
        }
    }

    (v4, v6)
}
