//! Engine tuning knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`crate::Tracker`].
///
/// Every field has a default, so a partial JSON object is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Re-announce period advertised to clients (default: 10 minutes).
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,

    /// Peers not seen for this long are dropped by the idle sweep (default: 20 minutes).
    #[serde(default = "default_peer_ttl")]
    pub peer_ttl_secs: u64,

    /// Peers to select when the request names neither `numwant` nor offers.
    #[serde(default = "default_numwant")]
    pub default_numwant: usize,

    /// Upper bound on peers selected per announce.
    #[serde(default = "default_max_numwant")]
    pub max_numwant: usize,

    /// Records kept per swarm before the stalest is evicted.
    #[serde(default = "default_max_peers_per_swarm")]
    pub max_peers_per_swarm: usize,
}

impl TrackerConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    pub fn peer_ttl(&self) -> Duration {
        Duration::from_secs(self.peer_ttl_secs)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            announce_interval_secs: default_announce_interval(),
            peer_ttl_secs: default_peer_ttl(),
            default_numwant: default_numwant(),
            max_numwant: default_max_numwant(),
            max_peers_per_swarm: default_max_peers_per_swarm(),
        }
    }
}

fn default_announce_interval() -> u64 {
    10 * 60
}

fn default_peer_ttl() -> u64 {
    20 * 60
}

fn default_numwant() -> usize {
    50
}

fn default_max_numwant() -> usize {
    82
}

fn default_max_peers_per_swarm() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TrackerConfig = serde_json::from_str(r#"{"max_numwant": 10}"#).unwrap();
        assert_eq!(config.max_numwant, 10);
        assert_eq!(config.announce_interval(), Duration::from_secs(600));
        assert_eq!(config.peer_ttl(), Duration::from_secs(1200));
    }
}
