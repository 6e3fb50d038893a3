//! DVRelay server: terminates relay client connections and records the
//! channels they carry.
//!
//! ```text
//! TLS accept ─► Session ─► ChannelRegistry (one stream per channel)
//!                  │
//!                  └─► ConsumerHandle ─► DiskConsumer (hourly .h264 files)
//! ```

pub mod consumer;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;

pub use consumer::{ConsumerHandle, Delivery, DiskConsumer};
pub use error::{ConsumerClosed, ServerError, SessionError};
pub use registry::{AdmissionError, ChannelLease, ChannelRegistry};
pub use server::RelayServer;
pub use session::{Session, SessionContext, SessionState, SessionSummary};
