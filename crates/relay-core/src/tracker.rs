//! Protocol engine.
//!
//! `Tracker` owns the swarm table and the per-connection attachments. The
//! transport drives it through four entry points:
//!
//! - [`Tracker::on_open`] when a connection is established
//! - [`Tracker::on_message`] for every inbound frame
//! - [`Tracker::on_disconnect`] / [`Tracker::on_transport_error`] when it goes away
//! - [`Tracker::sweep_idle`] periodically
//!
//! All methods take `&mut self`; whoever owns the tracker serializes access.
//! Relays to other peers are fire-and-forget: a failed send is logged and
//! never affects the requester's own response.

use crate::config::TrackerConfig;
use crate::error::{DecodeError, RelayError};
use crate::ids::{InfoHash, PeerId};
use crate::protocol::{
    decode_request, encode_peers, Action, AnnounceRequest, AnnounceResponse, ConnectResponse,
    FailureResponse, Offer, OutboundMessage, RelayedAnswer, RelayedOffer, Request,
    ScrapeResponse,
};
use crate::swarm::{AnnounceEvent, Announcer, PeerAnnounce, PeerRecord};
use crate::table::SwarmTable;
use crate::transport::{deliver, ConnectionId, PeerAddress, PeerSink};
use serde_json::value::RawValue;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The direct announce reply advertises `announce_interval / 5`, so clients
/// re-announce often while they are still looking for partners.
pub const WEBSOCKET_INTERVAL_DIVISOR: u32 = 5;

/// Per-connection state that spans sessions.
struct Attachment {
    handle: Weak<dyn PeerSink>,
    address: PeerAddress,
    /// Fixed by the first announce.
    peer_id: Option<PeerId>,
    /// Sessions this connection currently has a record in.
    info_hashes: HashSet<InfoHash>,
}

/// Snapshot of registry size, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub swarms: usize,
    pub peers: usize,
    pub connections: usize,
}

pub struct Tracker {
    config: TrackerConfig,
    swarms: SwarmTable,
    connections: HashMap<ConnectionId, Attachment>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        let swarms = SwarmTable::new(config.max_peers_per_swarm);
        Self {
            config,
            swarms,
            connections: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn swarms(&self) -> &SwarmTable {
        &self.swarms
    }

    /// Peer id bound to a connection, if it has announced.
    pub fn peer_id_of(&self, connection: ConnectionId) -> Option<PeerId> {
        self.connections.get(&connection).and_then(|a| a.peer_id)
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            swarms: self.swarms.len(),
            peers: self.swarms.peer_count(),
            connections: self.connections.len(),
        }
    }

    /// Register a new connection. The tracker only keeps a weak handle.
    pub fn on_open(&mut self, connection: ConnectionId, sink: &Arc<dyn PeerSink>) {
        let address = sink.address();
        debug!("Attached {} ({})", connection, address);
        self.connections.insert(
            connection,
            Attachment {
                handle: Arc::downgrade(sink),
                address,
                peer_id: None,
                info_hashes: HashSet::new(),
            },
        );
    }

    /// Decode and handle one frame, replying to the sender.
    ///
    /// Errors are turned into a failure message for the sender only.
    pub fn on_message(&mut self, connection: ConnectionId, data: &[u8]) {
        let Some(handle) = self.connections.get(&connection).map(|a| a.handle.clone()) else {
            warn!("Message from unknown connection {}, dropping", connection);
            return;
        };

        let outcome = match decode_request(data) {
            Ok(request) => {
                let action = request.action();
                let info_hash = request.info_hash();
                debug!("{} from {}", action.as_str(), connection);
                self.handle_request(connection, request)
                    .map_err(|e| (Some(action), info_hash, e))
            }
            Err(e) => Err((fallback_action(&e), None, e)),
        };

        let reply = match outcome {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err((action, info_hash, e)) => {
                warn!("Request from {} failed: {}", connection, e);
                OutboundMessage::Failure(FailureResponse::new(action, e.to_string(), info_hash))
            }
        };

        if let Err(e) = deliver(&handle, &reply) {
            debug!("Failed to reply to {}: {}", connection, e);
        }
    }

    /// Dispatch a decoded request. Returns the direct reply, if any.
    pub fn handle_request(
        &mut self,
        connection: ConnectionId,
        request: Request,
    ) -> Result<Option<OutboundMessage>, RelayError> {
        match request {
            Request::Connect => Ok(Some(OutboundMessage::Connect(ConnectResponse::new()))),
            Request::Announce(announce) => self.announce(connection, announce),
            Request::Scrape(scrape) => Ok(Some(OutboundMessage::Scrape(
                self.scrape(scrape.info_hashes.as_deref()),
            ))),
        }
    }

    fn announce(
        &mut self,
        connection: ConnectionId,
        request: AnnounceRequest,
    ) -> Result<Option<OutboundMessage>, RelayError> {
        let peer_id = request
            .peer_id
            .ok_or_else(|| RelayError::invalid_state("missing peer_id"))?;

        let attachment = self
            .connections
            .get(&connection)
            .ok_or_else(|| RelayError::invalid_state(format!("unknown connection {connection}")))?;
        if attachment.peer_id.is_some_and(|bound| bound != peer_id) {
            return Err(RelayError::invalid_state(
                "peer_id does not match connection",
            ));
        }
        let handle = attachment.handle.clone();
        let address = attachment.address.clone();

        let numwant = self.numwant_for(&request);
        let interval = self.config.announce_interval();
        let info_hash = request.info_hash;

        let result = self.swarms.get_or_create(info_hash).announce(
            PeerAnnounce {
                peer_id: Some(peer_id),
                event: request.event,
                numwant,
            },
            Announcer {
                connection,
                handle: &handle,
                address: &address,
            },
            interval,
            Instant::now(),
        )?;

        if let Some(attachment) = self.connections.get_mut(&connection) {
            attachment.peer_id = Some(peer_id);
            if request.event == AnnounceEvent::Stopped {
                attachment.info_hashes.remove(&info_hash);
            } else {
                attachment.info_hashes.insert(info_hash);
            }
        }
        detach(&mut self.connections, info_hash, &result.evicted);

        debug!(
            "Announce {} from {} in {}: {} peer(s) selected",
            request.event.as_str(),
            peer_id,
            info_hash,
            result.peers.len()
        );

        if let Some(offers) = &request.offers {
            relay_offers(peer_id, info_hash, &result.peers, offers);
        }

        if let Some(answer) = request.answer {
            if let Some(to_peer_id) = request.to_peer_id {
                if let Err(e) =
                    self.relay_answer(info_hash, peer_id, to_peer_id, answer, request.offer_id)
                {
                    warn!("Dropping answer from {}: {}", peer_id, e);
                }
            }
            return Ok(None);
        }

        let response = AnnounceResponse {
            interval: websocket_interval(interval, result.interval),
            info_hash,
            complete: result.complete,
            incomplete: result.incomplete,
            peers: encode_peers(&result.peers, request.compact),
        };
        Ok(Some(OutboundMessage::Announce(response)))
    }

    fn numwant_for(&self, request: &AnnounceRequest) -> usize {
        let wanted = request.numwant.unwrap_or_else(|| match &request.offers {
            Some(offers) => offers.len(),
            None => self.config.default_numwant,
        });
        wanted.min(self.config.max_numwant)
    }

    /// Forward an answer to the peer that made the offer.
    ///
    /// `UnknownSwarm`/`UnknownPeer` mean the offerer is gone; callers log
    /// and move on. A failed send is logged here and is not an error.
    pub fn relay_answer(
        &self,
        info_hash: InfoHash,
        from: PeerId,
        to: PeerId,
        answer: Box<RawValue>,
        offer_id: Option<String>,
    ) -> Result<(), RelayError> {
        let swarm = self
            .swarms
            .get(&info_hash)
            .ok_or(RelayError::UnknownSwarm(info_hash))?;
        let target = swarm.get(&to).ok_or(RelayError::UnknownPeer(to))?;

        let message = OutboundMessage::Answer(RelayedAnswer::new(answer, offer_id, from, info_hash));
        match deliver(&target.handle, &message) {
            Ok(()) => debug!("Relayed answer from {} to {}", from, to),
            Err(e) => warn!("Failed to relay answer from {} to {}: {}", from, to, e),
        }
        Ok(())
    }

    /// Counts for the given sessions, or for every swarm when `None`.
    ///
    /// One entry per distinct identifier, in first-seen order; unknown
    /// sessions count zero.
    pub fn scrape(&self, info_hashes: Option<&[InfoHash]>) -> ScrapeResponse {
        let requested: Vec<InfoHash> = match info_hashes {
            None => self.swarms.info_hashes().copied().collect(),
            Some(list) => {
                let mut seen = HashSet::new();
                list.iter().copied().filter(|h| seen.insert(*h)).collect()
            }
        };

        let files = requested
            .into_iter()
            .map(|info_hash| {
                let counts = self
                    .swarms
                    .get(&info_hash)
                    .map(|swarm| swarm.scrape())
                    .unwrap_or_default();
                (info_hash, counts)
            })
            .collect();

        ScrapeResponse {
            files,
            min_request_interval: self.config.announce_interval().as_secs_f64().ceil() as u64,
        }
    }

    /// Drop a connection: every record it announced is removed, as if it
    /// had sent `stopped` for each of its sessions. Other peers are not told.
    pub fn on_disconnect(&mut self, connection: ConnectionId) {
        let Some(attachment) = self.connections.remove(&connection) else {
            return;
        };
        let Some(peer_id) = attachment.peer_id else {
            debug!("{} closed before announcing", connection);
            return;
        };

        let mut removed = 0;
        for info_hash in &attachment.info_hashes {
            if let Some(swarm) = self.swarms.get_mut(info_hash) {
                if swarm.remove_owned(&peer_id, connection).is_some() {
                    removed += 1;
                }
            }
        }
        info!(
            "{} ({}) disconnected, removed from {} swarm(s)",
            connection, peer_id, removed
        );
    }

    /// Transport errors end the connection the same way a close does.
    pub fn on_transport_error(&mut self, connection: ConnectionId) {
        debug!("Transport error on {}", connection);
        self.on_disconnect(connection);
    }

    /// Remove records idle for longer than the configured TTL.
    ///
    /// Returns how many records were removed.
    pub fn sweep_idle(&mut self, now: Instant) -> usize {
        let ttl = self.config.peer_ttl();
        let mut removed = 0;

        for swarm in self.swarms.iter_mut() {
            let info_hash = swarm.info_hash();
            let evicted = swarm.evict_idle(now, ttl);
            if !evicted.is_empty() {
                debug!("Swarm {}: {} idle peer(s) expired", info_hash, evicted.len());
            }
            detach(&mut self.connections, info_hash, &evicted);
            removed += evicted.len();
        }

        removed
    }
}

/// `action` to report on a failed request.
///
/// Only unparseable JSON leaves it out. Anything that got further is
/// reported as an announce, the default for WebSocket clients.
fn fallback_action(error: &RelayError) -> Option<Action> {
    match error {
        RelayError::Decode(DecodeError::InvalidJson(_)) => None,
        _ => Some(Action::Announce),
    }
}

/// Forget `info_hash` on the connections that owned `records`.
fn detach(
    connections: &mut HashMap<ConnectionId, Attachment>,
    info_hash: InfoHash,
    records: &[PeerRecord],
) {
    for record in records {
        if let Some(attachment) = connections.get_mut(&record.connection) {
            attachment.info_hashes.remove(&info_hash);
        }
    }
}

/// Hand offer `i` to selected peer `i`. Extra offers or peers are ignored.
fn relay_offers(from: PeerId, info_hash: InfoHash, peers: &[PeerRecord], offers: &[Offer]) {
    for (peer, offer) in peers.iter().zip(offers) {
        let message = OutboundMessage::Offer(RelayedOffer::new(offer, from, info_hash));
        match deliver(&peer.handle, &message) {
            Ok(()) => debug!("Sent offer {} from {} to {}", offer.offer_id, from, peer.peer_id),
            Err(e) => warn!("Failed to relay offer from {} to {}: {}", from, peer.peer_id, e),
        }
    }
}

/// The interval actually sent on announce replies.
///
/// `default_secs` is what the swarm computed; it is replaced by the shorter
/// WebSocket interval.
fn websocket_interval(interval: Duration, default_secs: u64) -> u64 {
    let short = (interval.as_secs_f64() / f64::from(WEBSOCKET_INTERVAL_DIVISOR)).ceil() as u64;
    debug!("Announce interval {}s -> {}s", default_secs, short);
    short
}
