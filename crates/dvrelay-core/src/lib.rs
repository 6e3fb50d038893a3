pub mod channel;
pub mod config;
pub mod errors;
pub mod types;

pub use channel::{parse_channel_list, Channel, MAX_CHANNELS};
pub use config::{BackoffPolicy, ClientConfig, ClientTlsPaths, ServerConfig, ServerTlsPaths};
pub use errors::{ChannelError, ConfigError};
pub use types::*;
