//! Connection plumbing shared by the relay client and server.
//!
//! - [`Supervisor`]: keeps one outbound connection alive (dial, handshake,
//!   exponential backoff, per-operation deadlines).
//! - [`Connector`]: plain TCP and TLS dialers.
//! - [`tls`]: PEM loading plus pinned-certificate rustls configs.
//! - [`ShutdownToken`]: cooperative cancellation for every blocking point.

pub mod backoff;
pub mod connector;
pub mod deadline;
pub mod error;
pub mod shutdown;
pub mod supervisor;
pub mod tls;

pub use backoff::Backoff;
pub use connector::{Connector, TcpConnector, TlsClientStream, TlsConnector};
pub use deadline::with_deadline;
pub use error::{HandshakeError, SupervisorError, TlsError};
pub use shutdown::{ShutdownToken, StopSignal};
pub use supervisor::{Handshake, Supervisor};
