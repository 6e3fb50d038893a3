//! Error types for the relay server.

use std::time::Duration;

use thiserror::Error;

/// The consumer's receiving side is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("consumer queue closed")]
pub struct ConsumerClosed;

/// Why a session ended abnormally. Peer hang-ups and idle timeouts are not
/// errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("gave up after {0} failed handshake attempts")]
    TooManyAttempts(u32),
    #[error("handshake line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error(transparent)]
    ConsumerClosed(#[from] ConsumerClosed),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("unable to listen on {addr}: {source}")]
    Bind { addr: String, source: std::io::Error },
    #[error("TLS handshake timed out after {0:?}")]
    TlsTimeout(Duration),
    #[error("TLS handshake failed: {0}")]
    Tls(std::io::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
}
