//! Session identifier → swarm mapping.

use crate::ids::InfoHash;
use crate::swarm::Swarm;
use std::collections::HashMap;
use tracing::info;

/// Owns every swarm. Swarms are created on first use and live as long as
/// the table does.
pub struct SwarmTable {
    swarms: HashMap<InfoHash, Swarm>,
    peers_per_swarm: usize,
}

impl SwarmTable {
    pub fn new(peers_per_swarm: usize) -> Self {
        Self {
            swarms: HashMap::new(),
            peers_per_swarm,
        }
    }

    pub fn get(&self, info_hash: &InfoHash) -> Option<&Swarm> {
        self.swarms.get(info_hash)
    }

    pub fn get_mut(&mut self, info_hash: &InfoHash) -> Option<&mut Swarm> {
        self.swarms.get_mut(info_hash)
    }

    /// Look up a swarm, creating it on first access.
    pub fn get_or_create(&mut self, info_hash: InfoHash) -> &mut Swarm {
        let capacity = self.peers_per_swarm;
        self.swarms.entry(info_hash).or_insert_with(|| {
            info!("Created swarm {}", info_hash);
            Swarm::new(info_hash, capacity)
        })
    }

    pub fn info_hashes(&self) -> impl Iterator<Item = &InfoHash> {
        self.swarms.keys()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Swarm> {
        self.swarms.values_mut()
    }

    pub fn len(&self) -> usize {
        self.swarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.swarms.is_empty()
    }

    /// Total records across all swarms.
    pub fn peer_count(&self) -> usize {
        self.swarms.values().map(Swarm::len).sum()
    }
}
