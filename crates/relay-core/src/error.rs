//! Error types for the relay engine.

use crate::ids::{InfoHash, PeerId};
use thiserror::Error;

/// Errors produced while handling a client request.
///
/// Only the requesting connection ever sees these (as a failure message).
/// `UnknownSwarm` and `UnknownPeer` come out of answer relay and are logged,
/// never sent.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid action in WS request: {0}")]
    InvalidAction(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("no swarm with that info_hash: {0}")]
    UnknownSwarm(InfoHash),

    #[error("no peer with that to_peer_id: {0}")]
    UnknownPeer(PeerId),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl RelayError {
    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

/// Failure to turn a raw frame into a structured request.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid info_hash")]
    InvalidInfoHash,

    #[error("invalid peer_id")]
    InvalidPeerId,

    #[error("invalid to_peer_id (required with answer)")]
    InvalidToPeerId,
}
