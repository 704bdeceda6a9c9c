//! relay-daemon: WebSocket signaling tracker for WebRTC swarms.
//!
//! Peers announce which session they are in, and the daemon relays WebRTC
//! offers and answers between them so they can connect directly.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relay_daemon::config::Config;
use relay_daemon::server::RelayServer;

#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(about = "WebSocket tracker relaying WebRTC signaling between peers")]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(short, long, env = "RELAY_LISTEN")]
    listen: Option<String>,

    /// Announce interval in seconds (overrides the config file)
    #[arg(long, env = "RELAY_INTERVAL")]
    interval: Option<u64>,

    /// Use X-Forwarded-For as the client address
    #[arg(long, env = "RELAY_TRUST_PROXY")]
    trust_proxy: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(interval) = self.interval {
            config.tracker.announce_interval_secs = interval;
        }
        if self.trust_proxy {
            config.trust_proxy = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,relay_daemon=debug"
    } else {
        "info,relay_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting relay-daemon");

    let config = args.into_config()?;
    info!("Listen address: {}", config.listen);
    info!(
        "Announce interval: {}s, peer TTL: {}s, trust proxy: {}",
        config.tracker.announce_interval_secs, config.tracker.peer_ttl_secs, config.trust_proxy
    );

    let listener = RelayServer::bind(&config.listen).await?;
    let server = RelayServer::new(&config);

    info!("Daemon running. Press Ctrl+C to stop.");

    server
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Shutting down");
    Ok(())
}
