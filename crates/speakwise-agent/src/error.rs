// Agent-layer errors
//
// Port failures are usually handled in place (recovery policy, spoken
// fallbacks); AgentError is what escapes to the router surface.

use thiserror::Error;
use uuid::Uuid;

use speakwise_core::CoreError;

/// Failure reported by an external collaborator port.
#[derive(Debug, Error)]
pub enum PortError {
    /// The collaborator could not be reached at all.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// The collaborator answered with a failure.
    #[error("collaborator call failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Port(#[from] PortError),

    /// The session has no running call task (never started, or already
    /// torn down).
    #[error("no active call for session {0}")]
    CallGone(Uuid),
}
