//! Individual client connection management.
//!
//! Each connection wraps a WebSocket stream split into halves: the read half
//! is driven by [`read_loop`] and forwards frames as [`ConnectionEvent`]s, the
//! write half is owned by a task draining an unbounded outbound queue. The
//! engine reaches the write side through the [`PeerSink`] impl.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relay_core::protocol::OutboundMessage;
use relay_core::{ConnectionId, PeerAddress, PeerSink, SendError};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, error, warn};

type WsStream = WebSocketStream<TcpStream>;

/// Event emitted by a connection task.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// WebSocket upgrade finished. Always precedes that connection's messages.
    Opened {
        conn_id: ConnectionId,
        connection: ClientConnection,
    },
    /// A frame from the client
    Message { conn_id: ConnectionId, data: Vec<u8> },
    /// Connection ended; `error` is set when a protocol error ended it
    Closed { conn_id: ConnectionId, error: bool },
}

/// Write side of a single client connection.
///
/// Dropping it closes the outbound queue; the write task flushes what is
/// queued and then closes the socket.
#[derive(Debug)]
pub struct ClientConnection {
    conn_id: ConnectionId,
    address: PeerAddress,
    outbound: mpsc::UnboundedSender<Message>,
}

impl ClientConnection {
    /// Upgrade a TCP stream and start its write task.
    ///
    /// Returns the connection and the read half, which the caller drives
    /// with [`read_loop`].
    pub async fn accept(
        conn_id: ConnectionId,
        stream: TcpStream,
        addr: SocketAddr,
        trust_proxy: bool,
    ) -> Result<(Self, SplitStream<WsStream>), WsError> {
        let mut forwarded_for: Option<String> = None;
        let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            forwarded_for = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(|first| first.trim().to_string())
                .filter(|first| !first.is_empty());
            Ok(response)
        };
        let ws_stream = accept_hdr_async(stream, capture).await?;

        let address = match forwarded_for {
            Some(ip) if trust_proxy => PeerAddress::new(ip, addr.port()),
            _ => PeerAddress::from_ip(addr.ip(), addr.port()),
        };

        let (write, read) = ws_stream.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(conn_id, write, outbound_rx));

        Ok((
            Self {
                conn_id,
                address,
                outbound,
            },
            read,
        ))
    }

    /// Queue a close frame.
    pub fn close(&self) {
        debug!("Closing {}", self.conn_id);
        let _ = self.outbound.send(Message::Close(None));
    }
}

impl PeerSink for ClientConnection {
    fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        let json = message.to_json()?;
        self.outbound
            .send(Message::Text(json.into()))
            .map_err(|_| SendError::Closed)
    }

    fn address(&self) -> PeerAddress {
        self.address.clone()
    }
}

/// Drain the outbound queue into the socket.
async fn write_loop(
    conn_id: ConnectionId,
    mut write: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = write.send(message).await {
            debug!("Write to {} failed: {}", conn_id, e);
            return;
        }
        if closing {
            return;
        }
    }
    let _ = write.close().await;
}

/// Read loop that forwards frames to the event channel.
///
/// Always finishes with a `Closed` event.
pub async fn read_loop(
    conn_id: ConnectionId,
    mut read: SplitStream<WsStream>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    max_message_size: usize,
) {
    let mut failed = false;

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                let data: Vec<u8> = match msg {
                    Message::Text(text) => text.as_bytes().to_vec(),
                    Message::Binary(data) => data.to_vec(),
                    Message::Ping(_) | Message::Pong(_) => continue,
                    Message::Close(_) => {
                        debug!("Received close frame from {}", conn_id);
                        break;
                    }
                    Message::Frame(_) => continue,
                };

                if data.len() > max_message_size {
                    warn!(
                        "Message from {} exceeds max size ({} > {}), dropping",
                        conn_id,
                        data.len(),
                        max_message_size
                    );
                    continue;
                }

                if event_tx
                    .send(ConnectionEvent::Message { conn_id, data })
                    .is_err()
                {
                    return;
                }
            }
            Some(Err(e)) => {
                match e {
                    WsError::ConnectionClosed | WsError::AlreadyClosed => {
                        debug!("Connection {} closed", conn_id);
                    }
                    _ => {
                        error!("WebSocket error on {}: {}", conn_id, e);
                        failed = true;
                    }
                }
                break;
            }
            None => {
                debug!("Connection {} stream ended", conn_id);
                break;
            }
        }
    }

    let _ = event_tx.send(ConnectionEvent::Closed {
        conn_id,
        error: failed,
    });
}
