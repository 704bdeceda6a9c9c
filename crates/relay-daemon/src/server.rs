//! WebSocket server driving the relay engine.
//!
//! `RelayServer` is the single owner of the [`Tracker`]. Connection tasks
//! never touch it; they only post [`ConnectionEvent`]s, which the server
//! applies one at a time from its event loop.

use crate::config::Config;
use crate::connection::{read_loop, ClientConnection, ConnectionEvent};
use anyhow::Result;
use relay_core::{ConnectionId, PeerSink, Tracker, TrackerStats};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub struct RelayServer {
    tracker: Tracker,
    /// Open connections. The tracker only holds weak handles to these.
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
    /// Counter for generating connection IDs
    next_conn_id: u64,
    trust_proxy: bool,
    max_message_size: usize,
    sweep_interval: Duration,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl RelayServer {
    pub fn new(config: &Config) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            tracker: Tracker::new(config.tracker.clone()),
            connections: HashMap::new(),
            next_conn_id: 1,
            trust_proxy: config.trust_proxy,
            max_message_size: config.max_message_size,
            sweep_interval: config.sweep_interval(),
            event_tx,
            event_rx,
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("WebSocket server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn stats(&self) -> TrackerStats {
        self.tracker.stats()
    }

    /// Handle a new incoming TCP connection.
    ///
    /// The WebSocket upgrade runs in its own task, which then becomes the
    /// connection's read task.
    pub fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let conn_id = ConnectionId(self.next_conn_id);
        self.next_conn_id += 1;

        let event_tx = self.event_tx.clone();
        let trust_proxy = self.trust_proxy;
        let max_message_size = self.max_message_size;

        tokio::spawn(async move {
            let (connection, read) =
                match ClientConnection::accept(conn_id, stream, addr, trust_proxy).await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        // Health checks connect and close without finishing the handshake.
                        let err_str = e.to_string();
                        if err_str.contains("Handshake not finished")
                            || err_str.contains("Connection reset")
                            || err_str.contains("unexpected EOF")
                        {
                            debug!("Connection closed before handshake from {}", addr);
                        } else {
                            error!("WebSocket upgrade failed for {}: {}", addr, e);
                        }
                        return;
                    }
                };

            info!("New connection from {} ({})", addr, conn_id);

            if event_tx
                .send(ConnectionEvent::Opened {
                    conn_id,
                    connection,
                })
                .is_err()
            {
                return;
            }
            read_loop(conn_id, read, event_tx, max_message_size).await;
        });
    }

    /// Wait for the next connection event.
    pub async fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Apply one connection event to the engine.
    pub fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened {
                conn_id,
                connection,
            } => {
                let connection = Arc::new(connection);
                let sink: Arc<dyn PeerSink> = connection.clone();
                self.tracker.on_open(conn_id, &sink);
                self.connections.insert(conn_id, connection);
            }
            ConnectionEvent::Message { conn_id, data } => {
                debug!("Message from {}: {} bytes", conn_id, data.len());
                self.tracker.on_message(conn_id, &data);
            }
            ConnectionEvent::Closed { conn_id, error } => {
                if error {
                    self.tracker.on_transport_error(conn_id);
                } else {
                    self.tracker.on_disconnect(conn_id);
                }
                if self.connections.remove(&conn_id).is_some() {
                    info!("Connection closed: {}", conn_id);
                }
            }
        }
    }

    /// Expire idle peers and log registry size.
    pub fn sweep(&mut self) -> usize {
        let removed = self.tracker.sweep_idle(Instant::now());
        let stats = self.tracker.stats();
        info!(
            "Sweep: removed {} idle peer(s); {} swarm(s), {} peer(s), {} connection(s)",
            removed, stats.swarms, stats.peers, stats.connections
        );
        removed
    }

    /// Run the event loop until `shutdown` resolves.
    pub async fn serve<F>(mut self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        sweep.tick().await;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.accept_connection(stream, addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }

                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                }

                _ = sweep.tick() => {
                    self.sweep();
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        for connection in self.connections.values() {
            connection.close();
        }
        info!("Closed {} connection(s)", self.connections.len());
        Ok(())
    }
}
