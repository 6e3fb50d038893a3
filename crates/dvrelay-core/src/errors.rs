use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel {ordinal} is outside 1..={max}", max = crate::MAX_CHANNELS)]
    OutOfRange { ordinal: u32 },

    #[error("Channel is not a number: {0:?}")]
    NotANumber(String),

    #[error("Channel {0} listed more than once")]
    Duplicate(u8),

    #[error("At most {max} channels can be streamed")]
    TooMany { max: u8 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration invalid: {reason}")]
    Invalid { reason: String },

    #[error("Invalid channel: {0}")]
    Channel(#[from] ChannelError),

    #[error("Unable to parse configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid { reason: reason.into() }
    }
}
