//! tapline: attach external media consumers to live calls and conferences

mod config;
mod logging;
mod media_stream;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tapline_external_media::{AriClient, ExternalMediaHandler, MemoryDirectory, MemoryStore};
use tapline_stream_bridge::{StreamBridge, StreamRegistry};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Config;
use crate::logging::{parse_log_level, setup_logging, LoggingConfig};
use crate::media_stream::MediaStreamService;

#[derive(Parser, Debug)]
#[command(name = "tapline")]
#[command(about = "External media bridge for an ARI-controlled switch")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let mut logging = LoggingConfig::from_section(&config.logging)?;
    if let Some(level) = &args.log_level {
        logging = logging.with_level(parse_log_level(level)?);
    }
    setup_logging(logging)?;
    info!("Starting tapline v{}", env!("CARGO_PKG_VERSION"));

    if config.switch.nodes.is_empty() {
        warn!("No switch nodes configured, every start request will fail");
    }
    if config.server.audiosocket_advertise.is_none()
        && config.server.audiosocket_listen.ip().is_unspecified()
    {
        warn!(
            "audiosocket_advertise is not set and {} is not reachable from the switch",
            config.server.audiosocket_listen
        );
    }

    let switch = Arc::new(AriClient::new(
        config.media.stasis_app.clone(),
        config.switch.nodes.clone(),
    ));
    // populated by the switch event consumer
    let directory = Arc::new(MemoryDirectory::new());
    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(
        ExternalMediaHandler::new(switch, directory, store)
            .with_default_format(config.media.default_format.clone()),
    );

    let bridge = StreamBridge::new(Arc::new(StreamRegistry::new()));
    let service = Arc::new(MediaStreamService::new(
        handler,
        bridge.clone(),
        config.server.advertised_audiosocket(),
    ));

    let audiosocket_addr = config.server.audiosocket_listen;
    let audiosocket = TcpListener::bind(audiosocket_addr)
        .await
        .with_context(|| format!("binding AudioSocket listener on {}", audiosocket_addr))?;
    let client_addr = config.server.client_listen;
    let clients = TcpListener::bind(client_addr)
        .await
        .with_context(|| format!("binding media stream listener on {}", client_addr))?;

    tokio::select! {
        res = bridge.run_switch_listener(audiosocket) => {
            res.context("AudioSocket listener failed")?
        }
        res = service.run(clients) => res.context("media stream listener failed")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
