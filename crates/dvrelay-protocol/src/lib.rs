//! Wire formats spoken by DVRelay.
//!
//! Two handshakes precede raw frame streaming:
//!
//! ```text
//! relay client ── 507-byte binary login ──► DVR
//!              ◄── 8-byte reply ───────────
//! relay client ── "<channel><key>\n" ─────► relay server (TLS)
//!              ◄── "200" | "403" | "400" | "409"
//! ```
//!
//! Everything here is pure: no sockets, no global state.

pub mod dvr;
pub mod error;
pub mod relay;

pub use error::{CodecError, HelloError, ReplyError, StatusError};
pub use relay::{Hello, RelayStatus};
