// Collaborator ports
//
// Everything outside the orchestration core sits behind one of these
// async traits: speech synthesis, language understanding, browser
// automation, payment rails, SMS delivery and call control. Production
// wiring binds real engines; demos and tests bind the scripted set.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use speakwise_contracts::{
    ActionResult, ActionSpec, DialogueContext, Fee, PaymentResult, Transcript, UserIntent,
};

use crate::error::PortError;

/// Text-to-speech into the live call.
///
/// Synthesis failures are logged and swallowed by the orchestrator; a
/// garbled prompt is recoverable, a crashed call is not.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn say(&self, session_id: Uuid, text: &str) -> Result<(), PortError>;
}

/// Turns a transcript into one of the closed set of intents, scoped by
/// the dialogue context the orchestrator supplies.
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    async fn extract(
        &self,
        transcript: &Transcript,
        context: &DialogueContext,
    ) -> Result<UserIntent, PortError>;
}

/// Drives the e-government portal. The [`ActionSpec`] carries the
/// service-defined instructions; the automation engine owns page-level
/// interpretation.
#[async_trait]
pub trait BrowserAutomation: Send + Sync {
    async fn execute(&self, spec: &ActionSpec) -> Result<ActionResult, PortError>;
}

/// Charges the service fee against the caller's mobile money account.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, session_id: Uuid, fee: &Fee) -> Result<PaymentResult, PortError>;
}

/// Outbound message to a caller or an operator.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationMessage {
    /// Completion SMS for a successful paid request.
    TaskComplete {
        transaction_id: String,
        date: String,
        amount: u32,
        currency: String,
    },
    /// A human must follow up; sent when an abort touches money.
    FollowUpRequired {
        session_id: Uuid,
        caller: String,
        reason: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, recipient: &str, message: NotificationMessage)
        -> Result<(), PortError>;
}

/// Telephony-side call control.
#[async_trait]
pub trait CallControl: Send + Sync {
    async fn hangup(&self, session_id: Uuid) -> Result<(), PortError>;
}

/// The collaborator handles shared by every session task.
#[derive(Clone)]
pub struct Collaborators {
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub intents: Arc<dyn IntentExtractor>,
    pub browser: Arc<dyn BrowserAutomation>,
    pub payments: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub calls: Arc<dyn CallControl>,
}
