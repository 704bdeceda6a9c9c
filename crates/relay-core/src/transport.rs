//! Boundary between the engine and whatever carries bytes to clients.
//!
//! The transport owns every connection. The engine only keeps `Weak`
//! handles, so a connection that has gone away simply fails to upgrade
//! and the send is reported as [`SendError::Closed`].

use crate::protocol::OutboundMessage;
use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Weak;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Identifier the transport assigns to each accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection appears to come from.
///
/// The ip is kept as text because it may come from a proxy header and is not
/// guaranteed to parse. [`PeerAddress::family`] classifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub ip: String,
    pub port: u16,
}

/// Address family of a [`PeerAddress`], as far as its text can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
    Unknown,
}

impl PeerAddress {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// Build from a socket ip, unwrapping IPv4-mapped IPv6 addresses.
    pub fn from_ip(ip: IpAddr, port: u16) -> Self {
        let ip = match ip {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(v6),
            },
            v4 => v4,
        };
        Self::new(ip.to_string(), port)
    }

    pub fn family(&self) -> AddressFamily {
        if let Ok(v4) = self.ip.parse::<Ipv4Addr>() {
            AddressFamily::V4(v4)
        } else if let Ok(v6) = self.ip.parse::<Ipv6Addr>() {
            AddressFamily::V6(v6)
        } else {
            AddressFamily::Unknown
        }
    }
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.family() {
            AddressFamily::V6(_) => write!(f, "[{}]:{}", self.ip, self.port),
            _ => write!(f, "{}:{}", self.ip, self.port),
        }
    }
}

/// A connected client the engine can push messages to.
///
/// `send` must not block: implementations enqueue and return.
pub trait PeerSink: Send + Sync {
    fn send(&self, message: &OutboundMessage) -> Result<(), SendError>;

    fn address(&self) -> PeerAddress;
}

/// Send through a non-owning handle.
pub fn deliver(handle: &Weak<dyn PeerSink>, message: &OutboundMessage) -> Result<(), SendError> {
    let sink = handle.upgrade().ok_or(SendError::Closed)?;
    sink.send(message)
}

#[cfg(test)]
pub(crate) use recording::RecordingSink;


#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ConnectResponse;
    use std::sync::Arc;

    #[test]
    fn test_ipv4_mapped_is_unwrapped() {
        let mapped: IpAddr = "::ffff:10.0.0.7".parse().unwrap();
        let addr = PeerAddress::from_ip(mapped, 4000);
        assert_eq!(addr.ip, "10.0.0.7");
        assert!(matches!(addr.family(), AddressFamily::V4(_)));
    }

    #[test]
    fn test_family_classification() {
        assert!(matches!(
            PeerAddress::new("1.2.3.4", 1).family(),
            AddressFamily::V4(_)
        ));
        assert!(matches!(
            PeerAddress::new("2001:db8::1", 1).family(),
            AddressFamily::V6(_)
        ));
        assert_eq!(
            PeerAddress::new("not-an-ip", 1).family(),
            AddressFamily::Unknown
        );
    }

    #[test]
    fn test_deliver_to_dropped_sink_is_closed() {
        let sink: Arc<dyn PeerSink> = Arc::new(RecordingSink::new(PeerAddress::new("1.2.3.4", 1)));
        let handle = Arc::downgrade(&sink);
        drop(sink);

        let result = deliver(&handle, &OutboundMessage::Connect(ConnectResponse::new()));
        assert!(matches!(result, Err(SendError::Closed)));
    }

    #[test]
    fn test_closed_recording_sink_rejects_sends() {
        let sink = RecordingSink::new(PeerAddress::new("1.2.3.4", 1));
        sink.close();
        let result = sink.send(&OutboundMessage::Connect(ConnectResponse::new()));
        assert!(matches!(result, Err(SendError::Closed)));
        assert!(sink.sent().is_empty());
    }
}
