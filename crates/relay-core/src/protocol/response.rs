//! Outbound messages.
//!
//! Every message carries an `action` field. Direct responses go back to the
//! requester; relayed offers and answers go to other peers.

use super::encoding::{bytes_to_binary_string, PeerList};
use super::request::{Action, Offer};
use crate::ids::{InfoHash, PeerId};
use crate::swarm::ScrapeCounts;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::value::RawValue;

/// Anything the engine can send to a connection.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Connect(ConnectResponse),
    Announce(AnnounceResponse),
    Offer(RelayedOffer),
    Answer(RelayedAnswer),
    Scrape(ScrapeResponse),
    Failure(FailureResponse),
}

impl OutboundMessage {
    /// Serialize to JSON text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// `{"action":"connect"}`
#[derive(Debug, Clone, Serialize)]
pub struct ConnectResponse {
    action: Action,
}

impl ConnectResponse {
    pub fn new() -> Self {
        Self {
            action: Action::Connect,
        }
    }
}

impl Default for ConnectResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// Direct reply to an announce.
///
/// Wire format: `{"action":"announce","interval":..,"info_hash":..,"complete":..,
/// "incomplete":..}` plus `peers`/`peers6` depending on the compact mode.
/// Record-form peers are engine-internal and are not written out.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    pub interval: u64,
    pub info_hash: InfoHash,
    pub complete: usize,
    pub incomplete: usize,
    pub peers: PeerList,
}

impl Serialize for AnnounceResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("action", &Action::Announce)?;
        map.serialize_entry("interval", &self.interval)?;
        map.serialize_entry("info_hash", &self.info_hash.to_binary_string())?;
        map.serialize_entry("complete", &self.complete)?;
        map.serialize_entry("incomplete", &self.incomplete)?;
        match &self.peers {
            PeerList::Compact { peers, peers6 } => {
                map.serialize_entry("peers", &bytes_to_binary_string(peers))?;
                map.serialize_entry("peers6", &bytes_to_binary_string(peers6))?;
            }
            PeerList::Dictionary(entries) => {
                map.serialize_entry("peers", entries)?;
            }
            PeerList::Records(_) => {}
        }
        map.end()
    }
}

/// Offer forwarded to a selected peer.
#[derive(Debug, Clone, Serialize)]
pub struct RelayedOffer {
    action: Action,
    pub offer: Box<RawValue>,
    pub offer_id: String,
    /// Offering peer, binary string.
    pub peer_id: String,
    pub info_hash: String,
}

impl RelayedOffer {
    pub fn new(offer: &Offer, from: PeerId, info_hash: InfoHash) -> Self {
        Self {
            action: Action::Announce,
            offer: offer.offer.clone(),
            offer_id: offer.offer_id.clone(),
            peer_id: from.to_binary_string(),
            info_hash: info_hash.to_binary_string(),
        }
    }
}

/// Answer forwarded back to the peer that made the offer.
#[derive(Debug, Clone, Serialize)]
pub struct RelayedAnswer {
    action: Action,
    pub answer: Box<RawValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<String>,
    /// Answering peer, binary string.
    pub peer_id: String,
    pub info_hash: String,
}

impl RelayedAnswer {
    pub fn new(
        answer: Box<RawValue>,
        offer_id: Option<String>,
        from: PeerId,
        info_hash: InfoHash,
    ) -> Self {
        Self {
            action: Action::Announce,
            answer,
            offer_id,
            peer_id: from.to_binary_string(),
            info_hash: info_hash.to_binary_string(),
        }
    }
}

/// Reply to a scrape.
///
/// `files` keeps one entry per requested identifier, in request order.
#[derive(Debug, Clone)]
pub struct ScrapeResponse {
    pub files: Vec<(InfoHash, ScrapeCounts)>,
    pub min_request_interval: u64,
}

struct Files<'a>(&'a [(InfoHash, ScrapeCounts)]);

impl Serialize for Files<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (info_hash, counts) in self.0 {
            map.serialize_entry(&info_hash.to_binary_string(), counts)?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct ScrapeFlags {
    min_request_interval: u64,
}

impl Serialize for ScrapeResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("action", &Action::Scrape)?;
        map.serialize_entry("files", &Files(&self.files))?;
        map.serialize_entry(
            "flags",
            &ScrapeFlags {
                min_request_interval: self.min_request_interval,
            },
        )?;
        map.end()
    }
}

/// Error reply, only ever sent to the requester.
#[derive(Debug, Clone, Serialize)]
pub struct FailureResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(rename = "failure reason")]
    pub failure_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
}

impl FailureResponse {
    pub fn new(action: Option<Action>, reason: impl Into<String>, info_hash: Option<InfoHash>) -> Self {
        Self {
            action,
            failure_reason: reason.into(),
            info_hash: info_hash.map(|h| h.to_binary_string()),
        }
    }
}
