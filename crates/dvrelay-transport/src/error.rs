//! Error types for the transport layer.

use std::path::PathBuf;

use thiserror::Error;

/// Outcome of a failed handshake.
///
/// `Io` is transient and retried with backoff; `Rejected` means the peer
/// answered and refused us, which no amount of retrying will fix.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake rejected: {0}")]
    Rejected(String),
}

impl HandshakeError {
    pub fn rejected(reason: impl std::fmt::Display) -> Self {
        Self::Rejected(reason.to_string())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Terminal supervisor errors. Transient failures never surface here.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{name}: {target} rejected the handshake: {reason}")]
    Rejected { name: String, target: String, reason: String },
    #[error("supervisor stopped")]
    Stopped,
}

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("unable to read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("no certificate found in {0}")]
    NoCertificate(PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}
