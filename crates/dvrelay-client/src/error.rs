//! Error types for the relay client.

use dvrelay_transport::SupervisorError;
use thiserror::Error;

/// Why a channel pipeline ended on its own.
///
/// Transient network failures never show up here; they are retried inside
/// the supervisors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("{0} task panicked")]
    TaskFailed(&'static str),
}

impl PipelineError {
    /// The peer refused the handshake (bad credentials, channel taken, ...).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Supervisor(SupervisorError::Rejected { .. }))
    }
}
