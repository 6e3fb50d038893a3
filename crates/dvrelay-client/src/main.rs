//! DVRelay client: forwards DVR camera channels to a relay server.
//!
//! ```text
//! DVR (TCP, 507-byte login)              Relay server (TLS, "<n><key>\n")
//! ─────────────────────────               ────────────────────────────────
//! channel 1 ─► ChannelRelay[1] ─────────► session for channel 1
//! channel 2 ─► ChannelRelay[2] ─────────► session for channel 2
//! ...
//! ```
//!
//! Every flag can also be set through a `DVRELAY_*` environment variable, and
//! `--config` loads a JSON file that the flags then override.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use dvrelay_client::{ChannelRelay, PipelineConfig};
use dvrelay_core::{parse_channel_list, ClientConfig};
use dvrelay_transport::{tls, ShutdownToken, TcpConnector, TlsConnector};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dvrelay-client", version, about = "Relay DVR camera channels to a DVRelay server")]
struct Args {
    /// JSON configuration file; flags override its values.
    #[arg(long, env = "DVRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// DVR address (host:port).
    #[arg(long, env = "DVRELAY_SOURCE")]
    source: Option<String>,

    /// Relay server address (host:port).
    #[arg(long, env = "DVRELAY_DEST")]
    dest: Option<String>,

    /// TLS server name, if it differs from the host part of --dest.
    #[arg(long, env = "DVRELAY_SERVER_NAME")]
    server_name: Option<String>,

    #[arg(long, env = "DVRELAY_USER")]
    user: Option<String>,

    #[arg(long, env = "DVRELAY_PASS", hide_env_values = true)]
    pass: Option<String>,

    /// Passphrase shared with the relay server.
    #[arg(long, env = "DVRELAY_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Comma-separated channel list, e.g. "1,2,4".
    #[arg(long, env = "DVRELAY_CHANNELS")]
    channels: Option<String>,

    #[arg(long, env = "DVRELAY_CLIENT_CERT")]
    client_cert: Option<PathBuf>,

    #[arg(long, env = "DVRELAY_CLIENT_KEY")]
    client_key: Option<PathBuf>,

    /// The relay server's certificate; only this exact certificate is trusted.
    #[arg(long, env = "DVRELAY_SERVER_CERT")]
    server_cert: Option<PathBuf>,

    /// Per-operation network timeout in milliseconds.
    #[arg(long, env = "DVRELAY_IO_TIMEOUT_MS")]
    io_timeout_ms: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<ClientConfig> {
        let mut cfg = match &self.config {
            Some(path) => ClientConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ClientConfig::default(),
        };

        if let Some(v) = self.source {
            cfg.source = v;
        }
        if let Some(v) = self.dest {
            cfg.dest = v;
        }
        if let Some(v) = self.server_name {
            cfg.server_name = Some(v);
        }
        if let Some(v) = self.user {
            cfg.user = v;
        }
        if let Some(v) = self.pass {
            cfg.pass = v;
        }
        if let Some(v) = self.key {
            cfg.key = v;
        }
        if let Some(v) = self.channels {
            cfg.channels = parse_channel_list(&v).context("--channels")?;
        }
        if let Some(v) = self.client_cert {
            cfg.tls.client_cert = v;
        }
        if let Some(v) = self.client_key {
            cfg.tls.client_key = v;
        }
        if let Some(v) = self.server_cert {
            cfg.tls.server_cert = v;
        }
        if let Some(v) = self.io_timeout_ms {
            cfg.io_timeout_ms = v;
        }

        cfg.validate().context("invalid client configuration")?;
        Ok(cfg)
    }
}

fn tls_connector(cfg: &ClientConfig) -> Result<tokio_rustls::TlsConnector> {
    let chain = tls::load_certs(&cfg.tls.client_cert).context("client certificate")?;
    let key = tls::load_private_key(&cfg.tls.client_key).context("client key")?;
    let pinned = tls::load_certs(&cfg.tls.server_cert)
        .context("server certificate")?
        .into_iter()
        .next()
        .context("server certificate file is empty")?;
    let config = tls::client_config(chain, key, pinned).context("building TLS client config")?;
    Ok(tokio_rustls::TlsConnector::from(config))
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

    info!("DVRelay client v{}", env!("CARGO_PKG_VERSION"));

    let cfg = Args::parse().into_config()?;
    let connector = tls_connector(&cfg)?;
    let server_name = tls::server_name(&cfg.server_name()).context("relay server name")?;

    let shutdown = Arc::new(ShutdownToken::new());
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping all channels...");
                shutdown.signal_stop();
            }
        });
    }

    let mut relays = Vec::with_capacity(cfg.channels.len());
    for &channel in &cfg.channels {
        let pipeline = PipelineConfig::new(&cfg, channel)
            .with_context(|| format!("encoding DVR login for channel {}", channel))?;
        let dvr = TcpConnector::new(cfg.source.clone(), cfg.io_timeout());
        let relay = TlsConnector::new(
            TcpConnector::new(cfg.dest.clone(), cfg.io_timeout()),
            server_name.clone(),
            connector.clone(),
        );
        info!("Channel[{}] {} → {}", channel, cfg.source, cfg.dest);
        relays.push(ChannelRelay::spawn(pipeline, dvr, relay, shutdown.subscribe()));
    }

    let mut failed = 0usize;
    for relay in relays {
        let channel = relay.channel;
        match relay.wait().await {
            Ok(()) => info!("Channel[{}] stopped", channel),
            Err(e) => {
                error!("Channel[{}] failed: {}", channel, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} channel(s) stopped with an error", failed, cfg.channels.len());
    }
    Ok(())
}
