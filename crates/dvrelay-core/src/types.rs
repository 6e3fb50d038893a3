use std::time::Duration;

use bytes::Bytes;

use crate::Channel;

/// Largest chunk read from, or written to, a streaming socket in one call.
pub const SOCKET_BUFFER_SIZE: usize = 1460;

/// Default per-operation read/write deadline.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

// MARK: - Record

/// One frame tagged with the channel it was received on.
///
/// The frame bytes are opaque: they are forwarded exactly as read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub channel: Channel,
    pub frame: Bytes,
}

impl Record {
    pub fn new(channel: Channel, frame: impl Into<Bytes>) -> Self {
        Self { channel, frame: frame.into() }
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }
}

// MARK: - DvrCredentials

/// Username and password presented to the DVR in its handshake frame.
#[derive(Clone, PartialEq, Eq)]
pub struct DvrCredentials {
    pub user: String,
    pub pass: String,
}

impl DvrCredentials {
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self { user: user.into(), pass: pass.into() }
    }
}

impl std::fmt::Debug for DvrCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DvrCredentials")
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}
