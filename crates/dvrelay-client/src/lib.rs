//! DVRelay client: pulls camera channels off a DVR and forwards each one to
//! the relay server over its own TLS connection.
//!
//! One [`ChannelRelay`] runs per channel. It owns two supervised connections:
//!
//! ```text
//! DVR (TCP) ──► source task ──► bounded queue ──► sink task ──► relay (TLS)
//! ```

pub mod error;
pub mod handshake;
pub mod pipeline;

pub use error::PipelineError;
pub use handshake::{DvrHandshake, RelayHandshake};
pub use pipeline::{ChannelRelay, PipelineConfig, PipelineStats, StatsSnapshot};
