// Commands and results crossing the browser and payment collaborator seams

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which external execution channel a dispatch went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    Browser,
    Payment,
}

/// A browser automation command: the instruction narrative the automation
/// agent follows, plus the structured form data.
///
/// `session_id` and `step_id` double as the idempotency key; a re-dispatch
/// after a crash or retry carries the same pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub session_id: Uuid,
    pub service_id: String,
    pub step_id: String,
    pub instructions: String,
    pub fields: BTreeMap<String, String>,
}

/// Outcome of a browser automation command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    /// Data scraped from the portal on success (reference numbers, dates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(extracted_data: serde_json::Value) -> Self {
        Self {
            success: true,
            extracted_data: Some(extracted_data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            extracted_data: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of a payment charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub success: bool,
    /// Gateway reference for reconciliation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PaymentResult {
    pub fn confirmed(reference: impl Into<String>) -> Self {
        Self {
            success: true,
            reference: Some(reference.into()),
            message: None,
        }
    }

    pub fn declined(message: impl Into<String>) -> Self {
        Self {
            success: false,
            reference: None,
            message: Some(message.into()),
        }
    }
}
