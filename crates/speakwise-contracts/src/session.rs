// Session: the per-call state container
//
// All mutation flows through `record`: an event is appended to the history
// and folded into the state by `apply`. Because live updates and crash
// replay share the same fold, a replayed history always lands on the same
// state the live session had.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{ActionResult, DispatchKind};
use crate::event::{EventBody, SessionEvent};
use crate::failure::FailureKind;

/// Where a call currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Call answered, service intent not yet resolved.
    Started,
    /// Asking the caller for step fields.
    Collecting,
    /// A browser action is in flight.
    Executing,
    /// Waiting on the payment collaborator.
    AwaitingPayment,
    /// Waiting for the caller's yes/no on the summary.
    AwaitingConfirmation,
    Completed,
    Failed,
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Abandoned)
    }

    /// Legal status moves. A same-status transition is legal while live
    /// (the step index moving within COLLECTING, for example).
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }
        match (*self, next) {
            (_, Failed) | (_, Abandoned) => true,
            (Started, Collecting) => true,
            (Collecting, Executing)
            | (Collecting, AwaitingPayment)
            | (Collecting, AwaitingConfirmation)
            | (Collecting, Completed) => true,
            (Executing, Collecting)
            | (Executing, AwaitingPayment)
            | (Executing, AwaitingConfirmation)
            | (Executing, Completed) => true,
            (AwaitingPayment, Collecting)
            | (AwaitingPayment, Executing)
            | (AwaitingPayment, AwaitingConfirmation)
            | (AwaitingPayment, Completed) => true,
            (AwaitingConfirmation, Collecting)
            | (AwaitingConfirmation, Executing)
            | (AwaitingConfirmation, AwaitingPayment)
            | (AwaitingConfirmation, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Collecting => "collecting",
            Self::Executing => "executing",
            Self::AwaitingPayment => "awaiting_payment",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{s}")
    }
}

/// Per-call state. One caller, one service request, one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Caller identity from telephony (phone number).
    pub caller: String,
    /// Bound service; `None` during the STARTED phase.
    pub service_id: Option<String>,
    /// Index into the service's steps. May equal the step count once the
    /// final step has completed.
    pub current_step: usize,
    /// Validated, normalized field values.
    pub fields: BTreeMap<String, String>,
    pub status: SessionStatus,
    /// Step-level retry budget consumption, keyed by step id.
    pub retry_counts: BTreeMap<String, u32>,
    /// Per-field reprompt counters for invalid answers; reset when the
    /// field is finally collected.
    pub field_retries: BTreeMap<String, u32>,
    /// Payment steps that reported confirmed success; never re-charged.
    pub confirmed_payments: BTreeSet<String>,
    /// Append-only audit/replay log.
    pub history: Vec<SessionEvent>,
    pub last_browser_result: Option<ActionResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(caller: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            caller: caller.into(),
            service_id: None,
            current_step: 0,
            fields: BTreeMap::new(),
            status: SessionStatus::Started,
            retry_counts: BTreeMap::new(),
            field_retries: BTreeMap::new(),
            confirmed_payments: BTreeSet::new(),
            history: Vec::new(),
            last_browser_result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|v| v.as_str())
    }

    pub fn retry_count(&self, step_id: &str) -> u32 {
        self.retry_counts.get(step_id).copied().unwrap_or(0)
    }

    pub fn field_retry_count(&self, field: &str) -> u32 {
        self.field_retries.get(field).copied().unwrap_or(0)
    }

    /// Append an event and fold it into the state.
    pub fn record(&mut self, body: EventBody) {
        let event = SessionEvent::new(body);
        self.apply(&event);
        self.history.push(event);
    }

    /// Fold one event into the state. Replay calls this over a history;
    /// `record` calls it for live mutation. The two must never diverge.
    pub fn apply(&mut self, event: &SessionEvent) {
        match &event.body {
            EventBody::TurnReceived { .. } | EventBody::ActionDispatched { .. } => {}
            EventBody::ServiceSelected { service_id } => {
                self.service_id = Some(service_id.clone());
            }
            EventBody::FieldCollected { field, value } => {
                self.fields.insert(field.clone(), value.clone());
                self.field_retries.remove(field);
            }
            EventBody::FieldCleared { field } => {
                self.fields.remove(field);
                self.field_retries.remove(field);
            }
            EventBody::ActionResult {
                step_id,
                action,
                success,
                data,
                error,
            } => match action {
                DispatchKind::Browser => {
                    self.last_browser_result = Some(ActionResult {
                        success: *success,
                        extracted_data: data.clone(),
                        error: error.clone(),
                    });
                }
                DispatchKind::Payment => {
                    if *success {
                        self.confirmed_payments.insert(step_id.clone());
                    }
                }
            },
            EventBody::Retry {
                step_id, attempt, ..
            } => {
                self.retry_counts.insert(step_id.clone(), *attempt);
            }
            EventBody::Error { kind, field, .. } => {
                if *kind == FailureKind::FieldValidationFailed {
                    if let Some(field) = field {
                        *self.field_retries.entry(field.clone()).or_insert(0) += 1;
                    }
                }
            }
            EventBody::StateTransition { to, step, .. } => {
                self.status = *to;
                self.current_step = *step;
            }
        }
        self.updated_at = event.at;
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            caller: self.caller.clone(),
            service_id: self.service_id.clone(),
            status: self.status,
            current_step: self.current_step,
            updated_at: self.updated_at,
        }
    }
}

/// Dashboard row for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub caller: String,
    pub service_id: Option<String>,
    pub status: SessionStatus,
    pub current_step: usize,
    pub updated_at: DateTime<Utc>,
}

/// Final disposition handed to the caller (and the SMS gateway).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub service_id: String,
    /// Last step that finished cleanly; `None` when the first step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_step: Option<String>,
    /// Minted reference the caller can quote later (BC-20250114093042).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_reference: Option<String>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses_admit_no_successor() {
        for terminal in [
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Abandoned,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(SessionStatus::Collecting));
            assert!(!terminal.can_transition_to(SessionStatus::Failed));
            assert!(!terminal.can_transition_to(terminal));
        }
    }

    #[test]
    fn test_any_live_status_can_fail_or_abandon() {
        for live in [
            SessionStatus::Started,
            SessionStatus::Collecting,
            SessionStatus::Executing,
            SessionStatus::AwaitingPayment,
            SessionStatus::AwaitingConfirmation,
        ] {
            assert!(live.can_transition_to(SessionStatus::Failed));
            assert!(live.can_transition_to(SessionStatus::Abandoned));
        }
    }

    #[test]
    fn test_rollback_transition_is_legal() {
        assert!(SessionStatus::AwaitingConfirmation.can_transition_to(SessionStatus::Collecting));
        assert!(!SessionStatus::Started.can_transition_to(SessionStatus::Executing));
    }

    #[test]
    fn test_record_folds_field_collection() {
        let mut session = Session::new("+250788123456");
        session.record(EventBody::FieldCollected {
            field: "district".to_string(),
            value: "Gasabo".to_string(),
        });

        assert_eq!(session.field_value("district"), Some("Gasabo"));
        assert_eq!(session.history.len(), 1);
    }

    #[test]
    fn test_field_collection_resets_reprompt_counter() {
        let mut session = Session::new("+250788123456");
        session.record(EventBody::Error {
            kind: FailureKind::FieldValidationFailed,
            field: Some("district".to_string()),
            message: "the options are Gasabo or Kicukiro".to_string(),
        });
        assert_eq!(session.field_retry_count("district"), 1);

        session.record(EventBody::FieldCollected {
            field: "district".to_string(),
            value: "Gasabo".to_string(),
        });
        assert_eq!(session.field_retry_count("district"), 0);
    }

    #[test]
    fn test_payment_success_is_folded_once_and_for_all() {
        let mut session = Session::new("+250788123456");
        session.record(EventBody::ActionResult {
            step_id: "payment".to_string(),
            action: DispatchKind::Payment,
            success: true,
            data: None,
            error: None,
        });

        assert!(session.confirmed_payments.contains("payment"));
        assert!(session.last_browser_result.is_none());
    }

    #[test]
    fn test_state_transition_moves_status_and_step() {
        let mut session = Session::new("+250788123456");
        session.record(EventBody::StateTransition {
            from: SessionStatus::Started,
            to: SessionStatus::Collecting,
            step: 0,
        });
        session.record(EventBody::StateTransition {
            from: SessionStatus::Collecting,
            to: SessionStatus::Executing,
            step: 1,
        });

        assert_eq!(session.status, SessionStatus::Executing);
        assert_eq!(session.current_step, 1);
    }
}
