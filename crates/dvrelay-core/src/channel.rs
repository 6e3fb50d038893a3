//! Camera channel identifiers.
//!
//! A DVR exposes up to [`MAX_CHANNELS`] camera feeds. Channels travel in two
//! encodings:
//!
//! ```text
//! ordinal  1  2  3  4   relay handshake, registry, file names
//! mask     1  2  4  8   DVR handshake channel-select nibble
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ChannelError;

/// Highest channel ordinal a DVR (and the relay server) accepts.
pub const MAX_CHANNELS: u8 = 4;

/// A validated camera channel ordinal in `1..=MAX_CHANNELS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Channel(u8);

impl Channel {
    pub fn new(ordinal: u8) -> Result<Self, ChannelError> {
        if (1..=MAX_CHANNELS).contains(&ordinal) {
            Ok(Self(ordinal))
        } else {
            Err(ChannelError::OutOfRange { ordinal: ordinal as u32 })
        }
    }

    /// Parses the single channel digit at the head of a relay handshake line.
    pub fn from_digit(digit: char) -> Result<Self, ChannelError> {
        let value = digit
            .to_digit(10)
            .ok_or_else(|| ChannelError::NotANumber(digit.to_string()))?;
        Self::new(value as u8)
    }

    /// Every channel, in ordinal order.
    pub fn all() -> impl Iterator<Item = Channel> {
        (1..=MAX_CHANNELS).map(Channel)
    }

    pub fn ordinal(self) -> u8 {
        self.0
    }

    /// Bitmask form used by the DVR: `2^(ordinal-1)`.
    pub fn mask(self) -> u8 {
        1 << (self.0 - 1)
    }
}

impl TryFrom<u8> for Channel {
    type Error = ChannelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Channel> for u8 {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

impl FromStr for Channel {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value: u32 = s
            .parse()
            .map_err(|_| ChannelError::NotANumber(s.to_owned()))?;
        u8::try_from(value)
            .map_err(|_| ChannelError::OutOfRange { ordinal: value })
            .and_then(Self::new)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses a comma-separated channel list such as `"1,3"`.
///
/// Rejects duplicates and lists longer than [`MAX_CHANNELS`].
pub fn parse_channel_list(input: &str) -> Result<Vec<Channel>, ChannelError> {
    let mut channels = Vec::new();
    for part in input.split(',').filter(|p| !p.trim().is_empty()) {
        let channel: Channel = part.parse()?;
        if channels.contains(&channel) {
            return Err(ChannelError::Duplicate(channel.ordinal()));
        }
        channels.push(channel);
    }
    if channels.len() > MAX_CHANNELS as usize {
        return Err(ChannelError::TooMany { max: MAX_CHANNELS });
    }
    Ok(channels)
}
