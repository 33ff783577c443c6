// Failure taxonomy shared by the engine, the recovery policy and the event log

use std::fmt;

use serde::{Deserialize, Serialize};

/// What went wrong during a call, independent of how it is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SpeechLowConfidence,
    FieldValidationFailed,
    BrowserActionFailed,
    BrowserTimeout,
    PaymentFailed,
    ExternalSiteUnavailable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SpeechLowConfidence => "speech_low_confidence",
            Self::FieldValidationFailed => "field_validation_failed",
            Self::BrowserActionFailed => "browser_action_failed",
            Self::BrowserTimeout => "browser_timeout",
            Self::PaymentFailed => "payment_failed",
            Self::ExternalSiteUnavailable => "external_site_unavailable",
        };
        write!(f, "{s}")
    }
}

/// A concrete failure occurrence, fed to the recovery policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            step_id: None,
            field: None,
            message: message.into(),
        }
    }

    pub fn at_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn low_confidence(confidence: f32) -> Self {
        Self::new(
            FailureKind::SpeechLowConfidence,
            format!("transcript confidence {confidence:.2} below threshold"),
        )
    }

    pub fn validation(step_id: &str, field: &str, complaint: impl Into<String>) -> Self {
        Self::new(FailureKind::FieldValidationFailed, complaint)
            .at_step(step_id)
            .on_field(field)
    }

    pub fn browser(step_id: &str, message: impl Into<String>) -> Self {
        Self::new(FailureKind::BrowserActionFailed, message).at_step(step_id)
    }

    pub fn browser_timeout(step_id: &str) -> Self {
        Self::new(FailureKind::BrowserTimeout, "browser action timed out").at_step(step_id)
    }

    pub fn payment(step_id: &str, message: impl Into<String>) -> Self {
        Self::new(FailureKind::PaymentFailed, message).at_step(step_id)
    }

    pub fn site_unavailable(step_id: &str, message: impl Into<String>) -> Self {
        Self::new(FailureKind::ExternalSiteUnavailable, message).at_step(step_id)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step_id {
            Some(step) => write!(f, "{} at step {step}: {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}
