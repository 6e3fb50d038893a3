//! DVRelay server: accepts relayed camera channels over TLS and writes them
//! to hourly per-channel files.
//!
//! Every flag can also be set through a `DVRELAY_*` environment variable, and
//! `--config` loads a JSON file that the flags then override.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dvrelay_core::ServerConfig;
use dvrelay_server::{consumer, DiskConsumer, RelayServer};
use dvrelay_transport::{tls, ShutdownToken};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dvrelay-server", version, about = "Receive DVR camera channels from DVRelay clients")]
struct Args {
    /// JSON configuration file; flags override its values.
    #[arg(long, env = "DVRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (host:port).
    #[arg(long, env = "DVRELAY_BIND")]
    bind: Option<String>,

    /// Passphrase clients must present.
    #[arg(long, env = "DVRELAY_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Server certificate (PEM).
    #[arg(long, env = "DVRELAY_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// Server private key (PEM).
    #[arg(long, env = "DVRELAY_TLS_KEY")]
    tls_key: Option<PathBuf>,

    /// Directory for recorded .h264 files.
    #[arg(long, env = "DVRELAY_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[arg(long, env = "DVRELAY_QUEUE_CAPACITY")]
    queue_capacity: Option<usize>,

    #[arg(long, env = "DVRELAY_OFFER_TIMEOUT_MS")]
    offer_timeout_ms: Option<u64>,

    #[arg(long, env = "DVRELAY_IDLE_TIMEOUT_MS")]
    idle_timeout_ms: Option<u64>,

    /// Failed handshake lines allowed per connection (0 = unlimited).
    #[arg(long, env = "DVRELAY_MAX_HANDSHAKE_ATTEMPTS")]
    max_handshake_attempts: Option<u32>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut cfg = match &self.config {
            Some(path) => ServerConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(v) = self.bind {
            cfg.bind = v;
        }
        if let Some(v) = self.key {
            cfg.key = v;
        }
        if let Some(v) = self.tls_cert {
            cfg.tls.cert = v;
        }
        if let Some(v) = self.tls_key {
            cfg.tls.key = v;
        }
        if let Some(v) = self.storage_dir {
            cfg.storage_dir = v;
        }
        if let Some(v) = self.queue_capacity {
            cfg.queue_capacity = v;
        }
        if let Some(v) = self.offer_timeout_ms {
            cfg.offer_timeout_ms = v;
        }
        if let Some(v) = self.idle_timeout_ms {
            cfg.idle_timeout_ms = v;
        }
        if let Some(v) = self.max_handshake_attempts {
            cfg.max_handshake_attempts = v;
        }

        cfg.validate().context("invalid server configuration")?;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("DVRelay server v{}", env!("CARGO_PKG_VERSION"));

    let cfg = Args::parse().into_config()?;

    let chain = tls::load_certs(&cfg.tls.cert).context("server certificate")?;
    let key = tls::load_private_key(&cfg.tls.key).context("server key")?;
    let acceptor = tokio_rustls::TlsAcceptor::from(
        tls::server_config(chain, key).context("building TLS server config")?,
    );

    let (handle, records) = consumer::queue(cfg.queue_capacity, cfg.offer_timeout());
    let disk = tokio::spawn(DiskConsumer::new(cfg.storage_dir.clone()).run(records));

    let server = RelayServer::bind(&cfg, acceptor, handle).await?;

    let shutdown = ShutdownToken::new();
    let stop = shutdown.subscribe();
    let accept_loop = tokio::spawn(server.run(stop));

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Ctrl-C received, shutting down...");
    shutdown.signal_stop();

    if accept_loop.await.is_err() {
        warn!("Accept loop ended abnormally");
    }
    // Sessions observe the same stop signal; the disk writer finishes once
    // the last of them has dropped its consumer handle.
    if tokio::time::timeout(Duration::from_secs(10), disk).await.is_err() {
        warn!("Disk consumer did not finish within 10s");
    }
    Ok(())
}
