//! Error types for the wire codecs.

use thiserror::Error;

use crate::relay::RelayStatus;

/// The DVR login frame could not be built from the given credentials.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("username is {len} bytes, the DVR field holds at most {max}")]
    UserTooLong { len: usize, max: usize },
    #[error("password is {len} bytes, the DVR field holds at most {max}")]
    PassTooLong { len: usize, max: usize },
    #[error("credentials must be ASCII")]
    NonAscii,
}

/// The DVR answered the login frame with something other than success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("DVR rejected the credentials")]
    AuthFailed,
    #[error("unrecognised DVR reply: {0:02x?}")]
    UnknownReply(Vec<u8>),
}

/// The relay server did not answer the handshake line with `200`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("relay server refused the stream: {0}")]
    Rejected(RelayStatus),
    #[error("unrecognised relay status: {0:?}")]
    UnknownReply(String),
}

/// A handshake line received by the relay server was not well formed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HelloError {
    #[error("handshake line too short ({len} characters)")]
    TooShort { len: usize },
}
