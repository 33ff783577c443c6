// Session events: the append-only log behind audit, dashboard and replay
//
// Events are immutable once appended. Session state is a pure fold over the
// log, so replaying the history over a snapshot reconstructs the session
// exactly (crash recovery relies on this).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::DispatchKind;
use crate::failure::FailureKind;
use crate::session::SessionStatus;

/// One record in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: EventBody,
}

impl SessionEvent {
    pub fn new(body: EventBody) -> Self {
        Self {
            at: Utc::now(),
            body,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }
}

/// What happened, as a tagged payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    // =========================================================================
    // Dialogue
    // =========================================================================
    /// A recognized caller turn arrived from telephony.
    TurnReceived { text: String, confidence: f32 },

    /// The caller's service intent was resolved; replay restores the
    /// binding from this record.
    ServiceSelected { service_id: String },

    /// A field value passed validation and was stored.
    FieldCollected { field: String, value: String },

    /// The caller explicitly asked to redo a field; its value was dropped
    /// so it will be collected again.
    FieldCleared { field: String },

    // =========================================================================
    // External actions
    // =========================================================================
    /// A browser or payment command left the orchestrator.
    ActionDispatched { step_id: String, action: DispatchKind },

    /// The command came back.
    ActionResult {
        step_id: String,
        action: DispatchKind,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // =========================================================================
    // Recovery and state
    // =========================================================================
    /// A step is being re-dispatched; `attempt` is the step's retry count
    /// after this event.
    Retry {
        step_id: String,
        attempt: u32,
        reason: FailureKind,
    },

    /// A failure was observed (recovered or not).
    Error {
        kind: FailureKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        message: String,
    },

    /// Status and/or step index moved. `step` is the index after the
    /// transition, so rollbacks and advances replay exactly.
    StateTransition {
        from: SessionStatus,
        to: SessionStatus,
        step: usize,
    },
}

impl EventBody {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TurnReceived { .. } => "turn_received",
            Self::ServiceSelected { .. } => "service_selected",
            Self::FieldCollected { .. } => "field_collected",
            Self::FieldCleared { .. } => "field_cleared",
            Self::ActionDispatched { .. } => "action_dispatched",
            Self::ActionResult { .. } => "action_result",
            Self::Retry { .. } => "retry",
            Self::Error { .. } => "error",
            Self::StateTransition { .. } => "state_transition",
        }
    }
}
