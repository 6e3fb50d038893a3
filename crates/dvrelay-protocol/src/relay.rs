//! Relay handshake line protocol.
//!
//! The client opens a stream with one ASCII line, `<channel><key>\n`, the
//! channel ordinal followed directly by the passphrase. Ordinals are a single
//! digit, so the first character is always the channel and the passphrase may
//! itself start with digits. The server answers with a 3-byte status.

use std::fmt;

use dvrelay_core::Channel;

use crate::error::{HelloError, StatusError};

/// Length of a status reply.
pub const STATUS_LEN: usize = 3;

/// Shortest acceptable handshake line, newline included.
pub const MIN_HELLO_LEN: usize = 3;

// MARK: - RelayStatus

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayStatus {
    /// `200`: authenticated, stream away.
    Accepted,
    /// `403`: wrong passphrase (or no passphrase at all).
    BadCredentials,
    /// `400`: channel out of range, or every channel slot is taken.
    InvalidChannel,
    /// `409`: another session already streams this channel.
    ChannelInUse,
}

impl RelayStatus {
    pub fn code(self) -> u16 {
        match self {
            Self::Accepted => 200,
            Self::BadCredentials => 403,
            Self::InvalidChannel => 400,
            Self::ChannelInUse => 409,
        }
    }

    pub fn as_bytes(self) -> &'static [u8; STATUS_LEN] {
        match self {
            Self::Accepted => b"200",
            Self::BadCredentials => b"403",
            Self::InvalidChannel => b"400",
            Self::ChannelInUse => b"409",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"200" => Some(Self::Accepted),
            b"403" => Some(Self::BadCredentials),
            b"400" => Some(Self::InvalidChannel),
            b"409" => Some(Self::ChannelInUse),
            _ => None,
        }
    }
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Accepted => "accepted",
            Self::BadCredentials => "invalid credentials",
            Self::InvalidChannel => "invalid channel",
            Self::ChannelInUse => "channel in use",
        };
        write!(f, "{} {}", self.code(), reason)
    }
}

// MARK: - Client side

/// Encodes the handshake line for `channel`.
pub fn encode_hello(channel: Channel, key: &str) -> Vec<u8> {
    format!("{}{}\n", channel.ordinal(), key).into_bytes()
}

/// Interprets the server's 3-byte reply.
pub fn interpret_status(reply: &[u8]) -> Result<(), StatusError> {
    match RelayStatus::from_bytes(reply) {
        Some(RelayStatus::Accepted) => Ok(()),
        Some(status) => Err(StatusError::Rejected(status)),
        None => Err(StatusError::UnknownReply(String::from_utf8_lossy(reply).into_owned())),
    }
}

// MARK: - Server side

/// A parsed handshake line.
///
/// The channel digit is kept raw: range checking happens during admission so
/// that an out-of-range digit maps to `400` rather than a parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub channel_digit: char,
    pub key: String,
}

impl Hello {
    pub fn channel(&self) -> Result<Channel, dvrelay_core::ChannelError> {
        Channel::from_digit(self.channel_digit)
    }
}

/// Parses one handshake line as read from the socket, newline included.
///
/// The minimum length counts characters, not bytes.
pub fn parse_hello(line: &str) -> Result<Hello, HelloError> {
    let len = line.chars().count();
    let mut chars = line.chars();
    let channel_digit = match chars.next() {
        Some(c) if len >= MIN_HELLO_LEN => c,
        _ => return Err(HelloError::TooShort { len }),
    };
    let rest = chars.as_str();
    let rest = rest.strip_suffix('\n').unwrap_or(rest);
    let key = rest.strip_suffix('\r').unwrap_or(rest);
    Ok(Hello { channel_digit, key: key.to_owned() })
}
