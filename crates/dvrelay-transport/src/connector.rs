//! Dialers used by the [`Supervisor`](crate::Supervisor).

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::deadline::with_deadline;

/// Opens one transport connection to a fixed target.
///
/// Implementations dial exactly once per call; retry policy belongs to the
/// supervisor.
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self) -> io::Result<Self::Stream>;

    /// Human-readable target, for logs.
    fn target(&self) -> &str;
}

// ── Plain TCP ────────────────────────────────────────────────────────────────

/// Plain TCP dialer (the DVR leg).
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self { addr: addr.into(), timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = with_deadline(self.timeout, TcpStream::connect(self.addr.as_str())).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn target(&self) -> &str {
        &self.addr
    }
}

// ── TLS over TCP ─────────────────────────────────────────────────────────────

pub type TlsClientStream = tokio_rustls::client::TlsStream<TcpStream>;

/// TCP dialer followed by a rustls client handshake (the relay leg).
#[derive(Clone)]
pub struct TlsConnector {
    tcp: TcpConnector,
    server_name: ServerName<'static>,
    connector: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    pub fn new(
        tcp: TcpConnector,
        server_name: ServerName<'static>,
        connector: tokio_rustls::TlsConnector,
    ) -> Self {
        Self { tcp, server_name, connector }
    }
}

#[async_trait]
impl Connector for TlsConnector {
    type Stream = TlsClientStream;

    async fn connect(&self) -> io::Result<TlsClientStream> {
        let tcp = self.tcp.connect().await?;
        with_deadline(self.tcp.timeout, self.connector.connect(self.server_name.clone(), tcp)).await
    }

    fn target(&self) -> &str {
        self.tcp.target()
    }
}
