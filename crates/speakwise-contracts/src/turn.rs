// Caller turns and what the orchestrator understands them to mean
//
// Speech recognition and language understanding live behind collaborator
// seams; these types are the contract with them. The orchestrator supplies
// the dialogue context (what it is waiting for), the collaborator returns
// one of a closed set of intents.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::service::FieldSpec;

/// One recognized utterance from the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    /// Recognizer confidence in [0, 1].
    pub confidence: f32,
}

impl Transcript {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }

    /// A transcript treated as fully reliable (tests, DTMF input).
    pub fn certain(text: impl Into<String>) -> Self {
        Self::new(text, 1.0)
    }
}

/// What the orchestrator is waiting to hear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expectation {
    /// Call just started; the caller should name a service.
    ServiceSelection { offered: Vec<String> },
    /// A specific field was asked for.
    FieldValue { field: FieldSpec },
    /// A yes/no on the read-back summary.
    Confirmation,
    /// An external action is in flight; no caller input is expected.
    Hold,
}

/// Context handed to the intent extractor alongside the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueContext {
    pub session_id: Uuid,
    pub service_id: Option<String>,
    pub expecting: Expectation,
}

/// The closed set of things a caller turn can mean to the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserIntent {
    /// The caller named a service from the catalog.
    SelectService { service_id: String },
    /// The caller answered the pending field.
    ProvideField { value: String },
    Affirm,
    Deny,
    /// The caller wants to change an earlier answer.
    RedoField { field: String },
    /// The caller wants to stop the whole request.
    Cancel,
    /// The collaborator could not map the turn to any of the above.
    Unclear,
}
