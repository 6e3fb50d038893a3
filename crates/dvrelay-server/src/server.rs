//! TLS listener: accepts relay clients and runs one [`Session`] per
//! connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dvrelay_core::ServerConfig;
use dvrelay_transport::StopSignal;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::consumer::ConsumerHandle;
use crate::error::ServerError;
use crate::registry::ChannelRegistry;
use crate::session::{Session, SessionContext};

pub struct RelayServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    tls_timeout: Duration,
    ctx: Arc<SessionContext>,
}

impl RelayServer {
    /// Binds the listener. Sessions share a fresh [`ChannelRegistry`].
    pub async fn bind(
        config: &ServerConfig,
        acceptor: TlsAcceptor,
        consumer: ConsumerHandle,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(|source| ServerError::Bind { addr: config.bind.clone(), source })?;

        let registry = Arc::new(ChannelRegistry::new());
        let ctx = Arc::new(SessionContext::new(config, registry, consumer));

        Ok(Self { listener, acceptor, tls_timeout: config.tls_handshake_timeout(), ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ChannelRegistry> {
        Arc::clone(&self.ctx.registry)
    }

    /// Accepts connections until `stop` fires.
    ///
    /// Per-connection failures are logged and never end the loop.
    pub async fn run(self, mut stop: StopSignal) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Relay server listening on {}", addr),
            Err(e) => warn!("Relay server listening (address unknown: {})", e),
        }

        loop {
            let (tcp, peer) = tokio::select! {
                result = self.listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Accept error: {}", e);
                        continue;
                    }
                },
                _ = stop.stopped() => {
                    debug!("Accept loop stopping");
                    break;
                }
            };

            debug!("{}: accepted", peer);
            let acceptor = self.acceptor.clone();
            let ctx = Arc::clone(&self.ctx);
            let tls_timeout = self.tls_timeout;
            let stop = stop.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(tcp, peer, acceptor, tls_timeout, ctx, stop).await {
                    warn!("{}: {}", peer, e);
                }
            });
        }

        info!("Relay server stopped accepting connections");
    }
}

async fn handle_connection(
    tcp: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    tls_timeout: Duration,
    ctx: Arc<SessionContext>,
    stop: StopSignal,
) -> Result<(), ServerError> {
    if let Err(e) = tcp.set_nodelay(true) {
        debug!("{}: unable to set TCP_NODELAY: {}", peer, e);
    }
    let tls = tokio::time::timeout(tls_timeout, acceptor.accept(tcp))
        .await
        .map_err(|_| ServerError::TlsTimeout(tls_timeout))?
        .map_err(ServerError::Tls)?;

    let summary = Session::new(tls, peer.to_string(), ctx).run(stop).await?;
    if let Some(channel) = summary.channel {
        info!(
            "{}: channel {} session ended ({} frames, {} bytes, {} dropped)",
            peer, channel, summary.frames, summary.bytes, summary.dropped
        );
    }
    Ok(())
}
