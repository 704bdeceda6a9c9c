//! Per-session peer registry.
//!
//! A `Swarm` holds one `PeerRecord` per active participant of a session.
//! Records come and go through announces, disconnects and the idle sweep;
//! the swarm itself never goes away.

use crate::error::RelayError;
use crate::ids::{InfoHash, PeerId};
use crate::transport::{ConnectionId, PeerAddress, PeerSink};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Weak;
use std::time::{Duration, Instant};
use tracing::debug;

/// Announce event, after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    Started,
    Update,
    Completed,
    Stopped,
}

impl AnnounceEvent {
    /// Parse the wire `event` field. Absent, empty and `"empty"` all mean update.
    pub fn parse(event: Option<&str>) -> Result<Self, RelayError> {
        match event {
            None | Some("") | Some("empty") | Some("update") => Ok(Self::Update),
            Some("started") => Ok(Self::Started),
            Some("completed") => Ok(Self::Completed),
            Some("stopped") => Ok(Self::Stopped),
            Some(other) => Err(RelayError::invalid_state(format!("invalid event: {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Update => "update",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }
}

/// Bookkeeping for one participant in one swarm.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    /// Connection that announced this record.
    pub connection: ConnectionId,
    /// Non-owning handle used for relays.
    pub handle: Weak<dyn PeerSink>,
    pub address: PeerAddress,
    pub last_event: AnnounceEvent,
    /// Last non-stopped announce.
    pub last_seen: Instant,
}

/// The connection an announce arrived on.
#[derive(Clone, Copy)]
pub struct Announcer<'a> {
    pub connection: ConnectionId,
    pub handle: &'a Weak<dyn PeerSink>,
    pub address: &'a PeerAddress,
}

/// What the swarm knows about the announcing peer's request.
#[derive(Debug, Clone, Copy)]
pub struct PeerAnnounce {
    pub peer_id: Option<PeerId>,
    pub event: AnnounceEvent,
    pub numwant: usize,
}

/// Result of [`Swarm::announce`].
#[derive(Debug)]
pub struct SwarmAnnounce {
    /// Default re-announce interval in whole seconds (rounded up).
    pub interval: u64,
    pub complete: usize,
    pub incomplete: usize,
    /// Selected peers, never including the requester.
    pub peers: Vec<PeerRecord>,
    /// Records pushed out to make room for a new peer.
    pub evicted: Vec<PeerRecord>,
}

/// Aggregate counts for one swarm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeCounts {
    pub complete: usize,
    pub incomplete: usize,
    /// Mirrors `complete`; no historical counter is kept.
    pub downloaded: usize,
}

pub struct Swarm {
    info_hash: InfoHash,
    peers: HashMap<PeerId, PeerRecord>,
    capacity: usize,
}

impl Swarm {
    pub fn new(info_hash: InfoHash, capacity: usize) -> Self {
        Self {
            info_hash,
            peers: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Apply an announce and pick peers for the requester.
    ///
    /// Fails with `InvalidState` before touching the registry when the peer id
    /// is missing. A `stopped` event removes the record (if this connection
    /// owns it) and selects nobody.
    pub fn announce(
        &mut self,
        request: PeerAnnounce,
        announcer: Announcer<'_>,
        interval: Duration,
        now: Instant,
    ) -> Result<SwarmAnnounce, RelayError> {
        let peer_id = request
            .peer_id
            .ok_or_else(|| RelayError::invalid_state("missing peer_id"))?;

        let mut evicted = Vec::new();
        let peers = match request.event {
            AnnounceEvent::Stopped => {
                self.remove_owned(&peer_id, announcer.connection);
                Vec::new()
            }
            event => {
                if let Some(record) = self.upsert(peer_id, event, announcer, now) {
                    evicted.push(record);
                }
                self.select_peers(request.numwant, &peer_id)
            }
        };

        let counts = self.scrape();
        Ok(SwarmAnnounce {
            interval: interval.as_secs_f64().ceil() as u64,
            complete: counts.complete,
            incomplete: counts.incomplete,
            peers,
            evicted,
        })
    }

    /// Insert or refresh a record. Returns a record evicted for capacity, if any.
    fn upsert(
        &mut self,
        peer_id: PeerId,
        event: AnnounceEvent,
        announcer: Announcer<'_>,
        now: Instant,
    ) -> Option<PeerRecord> {
        if let Some(record) = self.peers.get_mut(&peer_id) {
            record.connection = announcer.connection;
            record.handle = announcer.handle.clone();
            record.address = announcer.address.clone();
            record.last_event = event;
            record.last_seen = now;
            return None;
        }

        let evicted = if self.peers.len() >= self.capacity {
            self.evict_stalest()
        } else {
            None
        };

        debug!(
            "Swarm {}: adding peer {} ({})",
            self.info_hash, peer_id, announcer.address
        );
        self.peers.insert(
            peer_id,
            PeerRecord {
                peer_id,
                connection: announcer.connection,
                handle: announcer.handle.clone(),
                address: announcer.address.clone(),
                last_event: event,
                last_seen: now,
            },
        );
        evicted
    }

    fn evict_stalest(&mut self) -> Option<PeerRecord> {
        let stalest = self
            .peers
            .values()
            .min_by_key(|record| record.last_seen)
            .map(|record| record.peer_id)?;
        debug!("Swarm {} full, evicting {}", self.info_hash, stalest);
        self.peers.remove(&stalest)
    }

    /// Up to `numwant` random peers other than `exclude`.
    fn select_peers(&self, numwant: usize, exclude: &PeerId) -> Vec<PeerRecord> {
        use rand::seq::SliceRandom;

        if numwant == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<&PeerRecord> = self
            .peers
            .values()
            .filter(|record| &record.peer_id != exclude)
            .collect();

        candidates.shuffle(&mut rand::rng());
        candidates.truncate(numwant);
        candidates.into_iter().cloned().collect()
    }

    /// Remove a record only if `connection` is the one that announced it.
    ///
    /// A peer id re-announced from a newer connection belongs to that
    /// connection; the old one closing must not take it down.
    pub fn remove_owned(&mut self, peer_id: &PeerId, connection: ConnectionId) -> Option<PeerRecord> {
        match self.peers.get(peer_id) {
            Some(record) if record.connection == connection => {
                debug!("Swarm {}: removing peer {}", self.info_hash, peer_id);
                self.peers.remove(peer_id)
            }
            _ => None,
        }
    }

    pub fn scrape(&self) -> ScrapeCounts {
        let complete = self
            .peers
            .values()
            .filter(|record| record.last_event == AnnounceEvent::Completed)
            .count();
        ScrapeCounts {
            complete,
            incomplete: self.peers.len() - complete,
            downloaded: complete,
        }
    }

    /// Drop every record not seen within `ttl` of `now`.
    pub fn evict_idle(&mut self, now: Instant, ttl: Duration) -> Vec<PeerRecord> {
        let stale: Vec<PeerId> = self
            .peers
            .values()
            .filter(|record| now.saturating_duration_since(record.last_seen) > ttl)
            .map(|record| record.peer_id)
            .collect();

        stale
            .iter()
            .filter_map(|peer_id| self.peers.remove(peer_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingSink;
    use std::collections::HashSet;
    use std::sync::Arc;

    const INTERVAL: Duration = Duration::from_secs(600);

    fn peer(n: u8) -> PeerId {
        PeerId::new([n; 20])
    }

    struct Client {
        connection: ConnectionId,
        _sink: Arc<dyn PeerSink>,
        handle: Weak<dyn PeerSink>,
        address: PeerAddress,
    }

    impl Client {
        fn new(n: u64) -> Self {
            let address = PeerAddress::new(format!("10.0.0.{n}"), 6881);
            let sink: Arc<dyn PeerSink> = Arc::new(RecordingSink::new(address.clone()));
            let handle = Arc::downgrade(&sink);
            Self {
                connection: ConnectionId(n),
                _sink: sink,
                handle,
                address,
            }
        }

        fn announcer(&self) -> Announcer<'_> {
            Announcer {
                connection: self.connection,
                handle: &self.handle,
                address: &self.address,
            }
        }
    }

    fn announce(
        swarm: &mut Swarm,
        client: &Client,
        id: PeerId,
        event: AnnounceEvent,
        numwant: usize,
    ) -> SwarmAnnounce {
        swarm
            .announce(
                PeerAnnounce {
                    peer_id: Some(id),
                    event,
                    numwant,
                },
                client.announcer(),
                INTERVAL,
                Instant::now(),
            )
            .unwrap()
    }

    fn swarm() -> Swarm {
        Swarm::new(InfoHash::new([7; 20]), 1000)
    }

    #[test]
    fn test_event_normalization() {
        assert_eq!(AnnounceEvent::parse(None).unwrap(), AnnounceEvent::Update);
        assert_eq!(AnnounceEvent::parse(Some("empty")).unwrap(), AnnounceEvent::Update);
        assert_eq!(AnnounceEvent::parse(Some("")).unwrap(), AnnounceEvent::Update);
        assert_eq!(
            AnnounceEvent::parse(Some("completed")).unwrap(),
            AnnounceEvent::Completed
        );
        assert!(matches!(
            AnnounceEvent::parse(Some("paused")),
            Err(RelayError::InvalidState(_))
        ));
    }

    #[test]
    fn test_missing_peer_id_rejected_without_mutation() {
        let mut swarm = swarm();
        let client = Client::new(1);
        let result = swarm.announce(
            PeerAnnounce {
                peer_id: None,
                event: AnnounceEvent::Started,
                numwant: 5,
            },
            client.announcer(),
            INTERVAL,
            Instant::now(),
        );
        assert!(matches!(result, Err(RelayError::InvalidState(_))));
        assert!(swarm.is_empty());
    }

    #[test]
    fn test_started_twice_updates_existing_record() {
        let mut swarm = swarm();
        let client = Client::new(1);
        announce(&mut swarm, &client, peer(1), AnnounceEvent::Started, 0);
        announce(&mut swarm, &client, peer(1), AnnounceEvent::Started, 0);
        assert_eq!(swarm.len(), 1);
    }

    #[test]
    fn test_stopped_removes_peer_and_selects_nobody() {
        let mut swarm = swarm();
        let a = Client::new(1);
        let b = Client::new(2);
        announce(&mut swarm, &a, peer(1), AnnounceEvent::Started, 0);
        announce(&mut swarm, &b, peer(2), AnnounceEvent::Started, 0);

        let result = announce(&mut swarm, &a, peer(1), AnnounceEvent::Stopped, 10);
        assert!(result.peers.is_empty());
        assert!(!swarm.contains(&peer(1)));
        assert_eq!(swarm.scrape().incomplete, 1);
    }

    #[test]
    fn test_stopped_for_unknown_peer_is_noop() {
        let mut swarm = swarm();
        let a = Client::new(1);
        let result = announce(&mut swarm, &a, peer(9), AnnounceEvent::Stopped, 10);
        assert!(result.peers.is_empty());
        assert!(swarm.is_empty());
    }

    #[test]
    fn test_stopped_from_other_connection_keeps_record() {
        let mut swarm = swarm();
        let a = Client::new(1);
        let b = Client::new(2);
        announce(&mut swarm, &a, peer(1), AnnounceEvent::Started, 0);
        announce(&mut swarm, &b, peer(1), AnnounceEvent::Stopped, 0);
        assert!(swarm.contains(&peer(1)));
    }

    #[test]
    fn test_selection_excludes_requester_and_respects_numwant() {
        let mut swarm = swarm();
        let clients: Vec<Client> = (1..=6).map(Client::new).collect();
        for (i, client) in clients.iter().enumerate() {
            announce(&mut swarm, client, peer(i as u8 + 1), AnnounceEvent::Started, 0);
        }

        for numwant in 0..8 {
            let result = announce(&mut swarm, &clients[0], peer(1), AnnounceEvent::Update, numwant);
            assert_eq!(result.peers.len(), numwant.min(5));
            assert!(result.peers.iter().all(|p| p.peer_id != peer(1)));
            let distinct: HashSet<_> = result.peers.iter().map(|p| p.peer_id).collect();
            assert_eq!(distinct.len(), result.peers.len());
        }
    }

    #[test]
    fn test_lonely_peer_gets_no_peers() {
        let mut swarm = swarm();
        let a = Client::new(1);
        let result = announce(&mut swarm, &a, peer(1), AnnounceEvent::Started, 50);
        assert!(result.peers.is_empty());
    }

    #[test]
    fn test_scrape_counts_by_last_event() {
        let mut swarm = swarm();
        let a = Client::new(1);
        let b = Client::new(2);
        let c = Client::new(3);
        announce(&mut swarm, &a, peer(1), AnnounceEvent::Started, 0);
        announce(&mut swarm, &b, peer(2), AnnounceEvent::Completed, 0);
        let result = announce(&mut swarm, &c, peer(3), AnnounceEvent::Update, 0);

        assert_eq!(result.complete, 1);
        assert_eq!(result.incomplete, 2);
        assert_eq!(
            swarm.scrape(),
            ScrapeCounts {
                complete: 1,
                incomplete: 2,
                downloaded: 1
            }
        );
    }

    #[test]
    fn test_interval_rounds_up() {
        let mut swarm = swarm();
        let a = Client::new(1);
        let result = swarm
            .announce(
                PeerAnnounce {
                    peer_id: Some(peer(1)),
                    event: AnnounceEvent::Started,
                    numwant: 0,
                },
                a.announcer(),
                Duration::from_millis(1500),
                Instant::now(),
            )
            .unwrap();
        assert_eq!(result.interval, 2);
    }

    #[test]
    fn test_capacity_evicts_stalest() {
        let mut swarm = Swarm::new(InfoHash::new([1; 20]), 2);
        let clients: Vec<Client> = (1..=3).map(Client::new).collect();
        let start = Instant::now();

        for (i, client) in clients.iter().enumerate() {
            let result = swarm
                .announce(
                    PeerAnnounce {
                        peer_id: Some(peer(i as u8 + 1)),
                        event: AnnounceEvent::Started,
                        numwant: 0,
                    },
                    client.announcer(),
                    INTERVAL,
                    start + Duration::from_secs(i as u64),
                )
                .unwrap();
            if i == 2 {
                assert_eq!(result.evicted.len(), 1);
                assert_eq!(result.evicted[0].peer_id, peer(1));
            }
        }

        assert_eq!(swarm.len(), 2);
        assert!(!swarm.contains(&peer(1)));
    }

    #[test]
    fn test_evict_idle() {
        let mut swarm = swarm();
        let a = Client::new(1);
        let b = Client::new(2);
        let start = Instant::now();
        for (client, id, at) in [(&a, peer(1), start), (&b, peer(2), start + Duration::from_secs(100))] {
            swarm
                .announce(
                    PeerAnnounce {
                        peer_id: Some(id),
                        event: AnnounceEvent::Started,
                        numwant: 0,
                    },
                    client.announcer(),
                    INTERVAL,
                    at,
                )
                .unwrap();
        }

        let removed = swarm.evict_idle(start + Duration::from_secs(150), Duration::from_secs(120));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].peer_id, peer(1));
        assert!(swarm.contains(&peer(2)));
    }
}
