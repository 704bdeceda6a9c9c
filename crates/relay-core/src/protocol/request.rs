//! Inbound requests and their decoder.
//!
//! Wire format: a JSON object with an `action` field. Byte fields are binary
//! strings (see [`super::encoding`]). `offer` and `answer` payloads are kept
//! as raw JSON so they can be relayed untouched.

use super::encoding::Compact;
use crate::error::{DecodeError, RelayError};
use crate::ids::{InfoHash, PeerId};
use crate::swarm::AnnounceEvent;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tracing::warn;

/// Top-level request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Connect,
    Announce,
    Scrape,
}

impl Action {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "connect" => Some(Self::Connect),
            "announce" => Some(Self::Announce),
            "scrape" => Some(Self::Scrape),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Announce => "announce",
            Self::Scrape => "scrape",
        }
    }
}

/// A decoded request.
#[derive(Debug, Clone)]
pub enum Request {
    Connect,
    Announce(AnnounceRequest),
    Scrape(ScrapeRequest),
}

impl Request {
    pub fn action(&self) -> Action {
        match self {
            Self::Connect => Action::Connect,
            Self::Announce(_) => Action::Announce,
            Self::Scrape(_) => Action::Scrape,
        }
    }

    /// Session the request is about, for tagging failure messages.
    pub fn info_hash(&self) -> Option<InfoHash> {
        match self {
            Self::Announce(announce) => Some(announce.info_hash),
            Self::Scrape(ScrapeRequest {
                info_hashes: Some(list),
            }) if list.len() == 1 => list.first().copied(),
            _ => None,
        }
    }
}

/// One WebRTC offer to hand to a selected peer.
#[derive(Debug, Clone)]
pub struct Offer {
    pub offer: Box<RawValue>,
    pub offer_id: String,
}

#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    /// Missing peer ids are rejected by the swarm, not here.
    pub peer_id: Option<PeerId>,
    pub event: AnnounceEvent,
    pub numwant: Option<usize>,
    pub offers: Option<Vec<Offer>>,
    pub answer: Option<Box<RawValue>>,
    /// Always set when `answer` is.
    pub to_peer_id: Option<PeerId>,
    pub offer_id: Option<String>,
    pub compact: Compact,
}

#[derive(Debug, Clone, Default)]
pub struct ScrapeRequest {
    /// `None` means every known swarm.
    pub info_hashes: Option<Vec<InfoHash>>,
}

#[derive(Deserialize)]
struct WireRequest {
    action: Option<String>,
    info_hash: Option<WireInfoHash>,
    peer_id: Option<String>,
    event: Option<String>,
    numwant: Option<u64>,
    offers: Option<Vec<WireOffer>>,
    answer: Option<Box<RawValue>>,
    to_peer_id: Option<String>,
    offer_id: Option<String>,
    compact: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireInfoHash {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
struct WireOffer {
    offer: Box<RawValue>,
    offer_id: String,
}

/// Decode a raw frame into a [`Request`].
pub fn decode_request(data: &[u8]) -> Result<Request, RelayError> {
    let wire: WireRequest = serde_json::from_slice(data).map_err(DecodeError::from)?;

    let action = wire.action.clone().unwrap_or_default();
    match Action::parse(&action) {
        Some(Action::Connect) => Ok(Request::Connect),
        Some(Action::Announce) => decode_announce(wire).map(Request::Announce),
        Some(Action::Scrape) => decode_scrape(wire).map(Request::Scrape),
        None => Err(RelayError::InvalidAction(action)),
    }
}

fn decode_announce(wire: WireRequest) -> Result<AnnounceRequest, RelayError> {
    let info_hash = match wire.info_hash {
        Some(WireInfoHash::One(s)) => {
            InfoHash::from_binary_string(&s).ok_or(DecodeError::InvalidInfoHash)?
        }
        _ => return Err(DecodeError::InvalidInfoHash.into()),
    };

    let peer_id = wire
        .peer_id
        .map(|s| PeerId::from_binary_string(&s).ok_or(DecodeError::InvalidPeerId))
        .transpose()?;

    let to_peer_id = if wire.answer.is_some() {
        let raw = wire.to_peer_id.ok_or(DecodeError::InvalidToPeerId)?;
        Some(PeerId::from_binary_string(&raw).ok_or(DecodeError::InvalidToPeerId)?)
    } else {
        None
    };

    let event = AnnounceEvent::parse(wire.event.as_deref())?;

    let offers = wire.offers.map(|offers| {
        offers
            .into_iter()
            .map(|o| Offer {
                offer: o.offer,
                offer_id: o.offer_id,
            })
            .collect()
    });

    Ok(AnnounceRequest {
        info_hash,
        peer_id,
        event,
        numwant: wire.numwant.map(|n| usize::try_from(n).unwrap_or(usize::MAX)),
        offers,
        answer: wire.answer,
        to_peer_id,
        offer_id: wire.offer_id,
        compact: Compact::from_flag(wire.compact),
    })
}

fn decode_scrape(wire: WireRequest) -> Result<ScrapeRequest, RelayError> {
    let raw = match wire.info_hash {
        None => return Ok(ScrapeRequest { info_hashes: None }),
        Some(WireInfoHash::One(s)) => vec![s],
        Some(WireInfoHash::Many(list)) => list,
    };

    // A malformed entry names no swarm; it is dropped without failing the rest.
    let info_hashes = raw
        .iter()
        .filter_map(|s| {
            let info_hash = InfoHash::from_binary_string(s);
            if info_hash.is_none() {
                warn!("Skipping malformed info_hash in scrape ({} chars)", s.chars().count());
            }
            info_hash
        })
        .collect();

    Ok(ScrapeRequest {
        info_hashes: Some(info_hashes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hash_str(n: u8) -> String {
        InfoHash::new([n; 20]).to_binary_string()
    }

    fn decode(value: serde_json::Value) -> Result<Request, RelayError> {
        decode_request(value.to_string().as_bytes())
    }

    #[test]
    fn test_connect() {
        let request = decode(json!({"action": "connect"})).unwrap();
        assert_eq!(request.action(), Action::Connect);
    }

    #[test]
    fn test_announce_minimal() {
        let request = decode(json!({
            "action": "announce",
            "info_hash": hash_str(1),
            "peer_id": hash_str(2),
        }))
        .unwrap();

        match request {
            Request::Announce(announce) => {
                assert_eq!(announce.info_hash, InfoHash::new([1; 20]));
                assert_eq!(announce.peer_id, Some(PeerId::new([2; 20])));
                assert_eq!(announce.event, AnnounceEvent::Update);
                assert_eq!(announce.compact, Compact::Records);
                assert!(announce.offers.is_none());
            }
            other => panic!("Expected announce, got {:?}", other),
        }
    }

    #[test]
    fn test_announce_missing_peer_id_decodes() {
        let request = decode(json!({"action": "announce", "info_hash": hash_str(1)})).unwrap();
        match request {
            Request::Announce(announce) => assert!(announce.peer_id.is_none()),
            other => panic!("Expected announce, got {:?}", other),
        }
    }

    #[test]
    fn test_announce_offers_keep_raw_payload() {
        let request = decode_request(
            format!(
                r#"{{"action":"announce","info_hash":{},"peer_id":{},"offers":[{{"offer":{{"type":"offer","sdp":"v=0"}},"offer_id":"o1"}}]}}"#,
                json!(hash_str(1)),
                json!(hash_str(2))
            )
            .as_bytes(),
        )
        .unwrap();

        match request {
            Request::Announce(announce) => {
                let offers = announce.offers.unwrap();
                assert_eq!(offers.len(), 1);
                assert_eq!(offers[0].offer.get(), r#"{"type":"offer","sdp":"v=0"}"#);
                assert_eq!(offers[0].offer_id, "o1");
            }
            other => panic!("Expected announce, got {:?}", other),
        }
    }

    #[test]
    fn test_answer_requires_to_peer_id() {
        let result = decode(json!({
            "action": "announce",
            "info_hash": hash_str(1),
            "peer_id": hash_str(2),
            "answer": {"type": "answer", "sdp": "x"},
        }));
        assert!(matches!(
            result,
            Err(RelayError::Decode(DecodeError::InvalidToPeerId))
        ));
    }

    #[test]
    fn test_bad_info_hash() {
        let result = decode(json!({"action": "announce", "info_hash": "short", "peer_id": hash_str(2)}));
        assert!(matches!(
            result,
            Err(RelayError::Decode(DecodeError::InvalidInfoHash))
        ));
    }

    #[test]
    fn test_bad_peer_id() {
        let result = decode(json!({"action": "announce", "info_hash": hash_str(1), "peer_id": "x"}));
        assert!(matches!(
            result,
            Err(RelayError::Decode(DecodeError::InvalidPeerId))
        ));
    }

    #[test]
    fn test_unknown_event_is_invalid_state() {
        let result = decode(json!({
            "action": "announce",
            "info_hash": hash_str(1),
            "peer_id": hash_str(2),
            "event": "paused",
        }));
        assert!(matches!(result, Err(RelayError::InvalidState(_))));
    }

    #[test]
    fn test_unknown_action() {
        let result = decode(json!({"action": "teleport"}));
        assert!(matches!(result, Err(RelayError::InvalidAction(a)) if a == "teleport"));
    }

    #[test]
    fn test_invalid_json() {
        let result = decode_request(b"not json");
        assert!(matches!(
            result,
            Err(RelayError::Decode(DecodeError::InvalidJson(_)))
        ));
    }

    #[test]
    fn test_scrape_forms() {
        let all = decode(json!({"action": "scrape"})).unwrap();
        let one = decode(json!({"action": "scrape", "info_hash": hash_str(1)})).unwrap();
        let many = decode(json!({"action": "scrape", "info_hash": [hash_str(1), hash_str(2)]})).unwrap();

        let count = |r: Request| match r {
            Request::Scrape(s) => s.info_hashes.map(|list| list.len()),
            other => panic!("Expected scrape, got {:?}", other),
        };
        assert_eq!(count(all), None);
        assert_eq!(count(one), Some(1));
        assert_eq!(count(many), Some(2));
    }

    #[test]
    fn test_scrape_skips_bad_entry() {
        let request = decode(json!({"action": "scrape", "info_hash": [hash_str(1), "bad", hash_str(3)]}))
            .unwrap();
        match request {
            Request::Scrape(scrape) => assert_eq!(
                scrape.info_hashes,
                Some(vec![InfoHash::new([1; 20]), InfoHash::new([3; 20])])
            ),
            other => panic!("Expected scrape, got {:?}", other),
        }
    }

    #[test]
    fn test_scrape_with_only_bad_entries_is_not_scrape_all() {
        let request = decode(json!({"action": "scrape", "info_hash": ["bad"]})).unwrap();
        match request {
            Request::Scrape(scrape) => assert_eq!(scrape.info_hashes, Some(Vec::new())),
            other => panic!("Expected scrape, got {:?}", other),
        }
    }
}
