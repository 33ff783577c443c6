//! Error types for the orchestration core

use speakwise_contracts::SessionStatus;
use uuid::Uuid;

use crate::store::StoreError;

/// Errors surfaced by the catalog, engine and session manager.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Requested service is not in the catalog (or is disabled).
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// No live or stored session under this id.
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// Session reached a terminal status; mutation is no longer allowed.
    #[error("session {0} is closed ({1})")]
    SessionClosed(Uuid, SessionStatus),

    /// Engine was invoked before a service intent was resolved.
    #[error("no service bound to session {0}")]
    ServiceNotBound(Uuid),

    /// Engine was handed a definition that does not match the session.
    #[error("session is bound to {bound}, not {given}")]
    ServiceMismatch { bound: String, given: String },

    /// Status move not permitted by the session state machine.
    #[error("illegal status transition from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// Field input named a field no step of the workflow declares.
    #[error("field {field} is not part of the current workflow")]
    UndeclaredField { field: String },

    /// Input does not apply to the session's current state (a payment
    /// result while collecting, for example).
    #[error("input does not apply to the current state: {0}")]
    UnexpectedInput(String),

    /// Catalog entry cannot be executed as written.
    #[error("service definition {0} is invalid: {1}")]
    InvalidDefinition(String, String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
