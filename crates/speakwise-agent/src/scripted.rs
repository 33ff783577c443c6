// Scripted collaborators
//
// Deterministic stand-ins for the external engines: a keyword intent
// extractor over the catalog, queue-driven browser and payment doubles,
// a channel speech sink and a recording notifier. The demo binary and
// the end-to-end tests wire these instead of real engines.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use speakwise_contracts::{
    ActionResult, ActionSpec, DialogueContext, Expectation, Fee, PaymentResult, Transcript,
    UserIntent,
};
use speakwise_core::ServiceCatalog;

use crate::error::PortError;
use crate::ports::{
    BrowserAutomation, CallControl, Collaborators, IntentExtractor, Notifier, NotificationMessage,
    PaymentGateway, SpeechSynthesizer,
};

// =============================================================================
// Intent extraction
// =============================================================================

/// Keyword intent extractor scoped by the dialogue context.
///
/// Good enough to run whole calls in tests and demos; the production
/// extractor sits behind the same trait.
pub struct RuleBasedIntentExtractor {
    catalog: Arc<ServiceCatalog>,
}

impl RuleBasedIntentExtractor {
    pub fn new(catalog: Arc<ServiceCatalog>) -> Self {
        Self { catalog }
    }

    /// Best service match by id-word overlap; ties are ambiguous.
    fn match_service(&self, text: &str) -> Option<String> {
        let mut best: Option<(usize, String)> = None;
        let mut tied = false;
        for def in self.catalog.enabled() {
            let score = def
                .id
                .split('_')
                .filter(|word| contains_word(text, word))
                .count();
            if score == 0 {
                continue;
            }
            match &best {
                Some((top, _)) if score == *top => tied = true,
                Some((top, _)) if score > *top => {
                    best = Some((score, def.id.clone()));
                    tied = false;
                }
                None => best = Some((score, def.id.clone())),
                _ => {}
            }
        }
        if tied {
            return None;
        }
        best.map(|(_, id)| id)
    }

    /// "change the sector" style requests, resolved against the bound
    /// service's declared fields.
    fn match_redo(&self, text: &str, context: &DialogueContext) -> Option<String> {
        if !["change", "redo", "fix", "update"]
            .iter()
            .any(|w| contains_word(text, w))
        {
            return None;
        }
        let def = self.catalog.get(context.service_id.as_deref()?).ok()?;
        def.steps
            .iter()
            .flat_map(|s| s.fields.iter())
            .find(|f| text.contains(&f.name.replace('_', " ")))
            .map(|f| f.name.clone())
    }
}

#[async_trait]
impl IntentExtractor for RuleBasedIntentExtractor {
    async fn extract(
        &self,
        transcript: &Transcript,
        context: &DialogueContext,
    ) -> Result<UserIntent, PortError> {
        let text = transcript.text.trim().to_lowercase();
        if text.is_empty() {
            return Ok(UserIntent::Unclear);
        }
        if wants_cancel(&text) {
            return Ok(UserIntent::Cancel);
        }
        if let Some(field) = self.match_redo(&text, context) {
            return Ok(UserIntent::RedoField { field });
        }

        match &context.expecting {
            Expectation::ServiceSelection { .. } => match self.match_service(&text) {
                Some(service_id) => Ok(UserIntent::SelectService { service_id }),
                None => Ok(UserIntent::Unclear),
            },
            Expectation::FieldValue { .. } => {
                // A caller can still switch services mid-collection.
                if let Some(service_id) = self.match_service(&text) {
                    if context.service_id.as_deref() != Some(service_id.as_str()) {
                        return Ok(UserIntent::SelectService { service_id });
                    }
                }
                if is_yes(&text) {
                    return Ok(UserIntent::Affirm);
                }
                if is_no(&text) {
                    return Ok(UserIntent::Deny);
                }
                Ok(UserIntent::ProvideField {
                    value: transcript.text.trim().to_string(),
                })
            }
            Expectation::Confirmation => {
                if is_yes(&text) {
                    Ok(UserIntent::Affirm)
                } else if is_no(&text) {
                    Ok(UserIntent::Deny)
                } else {
                    Ok(UserIntent::Unclear)
                }
            }
            Expectation::Hold => Ok(UserIntent::Unclear),
        }
    }
}

fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|w| w == word)
}

fn wants_cancel(text: &str) -> bool {
    ["cancel", "goodbye"].iter().any(|w| contains_word(text, w)) || text.contains("never mind")
}

fn is_yes(text: &str) -> bool {
    ["yes", "yeah", "yep", "correct", "sure", "confirm"]
        .iter()
        .any(|w| contains_word(text, w))
        || text.contains("go ahead")
}

fn is_no(text: &str) -> bool {
    ["no", "nope", "wrong"].iter().any(|w| contains_word(text, w))
        || text.contains("not right")
}

// =============================================================================
// Execution doubles
// =============================================================================

/// Browser double: pops scripted outcomes, succeeds once the script is
/// exhausted. Counts invocations so tests can assert dispatch budgets.
#[derive(Default)]
pub struct ScriptedBrowser {
    script: Mutex<VecDeque<Result<ActionResult, PortError>>>,
    invocations: AtomicUsize,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: Result<ActionResult, PortError>) {
        self.script.lock().push_back(outcome);
    }

    pub fn push_failure(&self, message: &str) {
        self.push(Ok(ActionResult::failed(message)));
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserAutomation for ScriptedBrowser {
    async fn execute(&self, spec: &ActionSpec) -> Result<ActionResult, PortError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(outcome) => outcome,
            None => Ok(ActionResult::ok(serde_json::json!({
                "step": spec.step_id,
                "submitted": true,
            }))),
        }
    }
}

/// Payment double: pops scripted outcomes, confirms once the script is
/// exhausted. Counts charges so tests can prove nobody pays twice.
#[derive(Default)]
pub struct ScriptedPayments {
    script: Mutex<VecDeque<Result<PaymentResult, PortError>>>,
    charges: AtomicUsize,
}

impl ScriptedPayments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: Result<PaymentResult, PortError>) {
        self.script.lock().push_back(outcome);
    }

    pub fn push_decline(&self, message: &str) {
        self.push(Ok(PaymentResult::declined(message)));
    }

    pub fn charges(&self) -> usize {
        self.charges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedPayments {
    async fn charge(&self, _session_id: Uuid, _fee: &Fee) -> Result<PaymentResult, PortError> {
        let count = self.charges.fetch_add(1, Ordering::SeqCst) + 1;
        match self.script.lock().pop_front() {
            Some(outcome) => outcome,
            None => Ok(PaymentResult::confirmed(format!("MOMO-{count:06}"))),
        }
    }
}

// =============================================================================
// Observation sinks
// =============================================================================

/// Speech sink that forwards every spoken line through a channel, tagged
/// with its session; tests await lines as their synchronization points.
pub struct ChannelSpeech {
    lines: mpsc::UnboundedSender<(Uuid, String)>,
}

impl ChannelSpeech {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Uuid, String)>) {
        let (lines, spoken) = mpsc::unbounded_channel();
        (Self { lines }, spoken)
    }
}

#[async_trait]
impl SpeechSynthesizer for ChannelSpeech {
    async fn say(&self, session_id: Uuid, text: &str) -> Result<(), PortError> {
        self.lines
            .send((session_id, text.to_string()))
            .map_err(|_| PortError::Unavailable("speech channel closed".to_string()))
    }
}

/// Notifier that records deliveries instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, NotificationMessage)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, NotificationMessage)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(
        &self,
        recipient: &str,
        message: NotificationMessage,
    ) -> Result<(), PortError> {
        self.sent.lock().push((recipient.to_string(), message));
        Ok(())
    }
}

/// Call control that only logs; the scripted stack has no real line to
/// tear down.
pub struct NoopCallControl;

#[async_trait]
impl CallControl for NoopCallControl {
    async fn hangup(&self, session_id: Uuid) -> Result<(), PortError> {
        debug!(session_id = %session_id, "hangup requested");
        Ok(())
    }
}

// =============================================================================
// Bundled wiring
// =============================================================================

/// The scripted collaborator set, with handles kept for scripting and
/// assertions.
pub struct ScriptedPorts {
    pub collaborators: Collaborators,
    pub browser: Arc<ScriptedBrowser>,
    pub payments: Arc<ScriptedPayments>,
    pub notifier: Arc<RecordingNotifier>,
    /// Every spoken line in order, tagged with its session.
    pub spoken: mpsc::UnboundedReceiver<(Uuid, String)>,
}

/// Standard scripted wiring for demos and end-to-end tests.
pub fn scripted_ports(catalog: Arc<ServiceCatalog>) -> ScriptedPorts {
    let (speech, spoken) = ChannelSpeech::new();
    let browser = Arc::new(ScriptedBrowser::new());
    let payments = Arc::new(ScriptedPayments::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let collaborators = Collaborators {
        speech: Arc::new(speech),
        intents: Arc::new(RuleBasedIntentExtractor::new(catalog)),
        browser: browser.clone(),
        payments: payments.clone(),
        notifier: notifier.clone(),
        calls: Arc::new(NoopCallControl),
    };
    ScriptedPorts {
        collaborators,
        browser,
        payments,
        notifier,
        spoken,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speakwise_contracts::{FieldSpec, FieldValidator};

    fn extractor() -> RuleBasedIntentExtractor {
        RuleBasedIntentExtractor::new(Arc::new(ServiceCatalog::builtin()))
    }

    fn selection_context() -> DialogueContext {
        DialogueContext {
            session_id: Uuid::now_v7(),
            service_id: None,
            expecting: Expectation::ServiceSelection {
                offered: vec![
                    "birth_certificate".to_string(),
                    "driving_license_exam".to_string(),
                ],
            },
        }
    }

    fn field_context(field: &str) -> DialogueContext {
        DialogueContext {
            session_id: Uuid::now_v7(),
            service_id: Some("birth_certificate".to_string()),
            expecting: Expectation::FieldValue {
                field: FieldSpec::new(field, "prompt", FieldValidator::NonEmpty),
            },
        }
    }

    fn confirmation_context() -> DialogueContext {
        DialogueContext {
            session_id: Uuid::now_v7(),
            service_id: Some("birth_certificate".to_string()),
            expecting: Expectation::Confirmation,
        }
    }

    #[tokio::test]
    async fn test_service_is_matched_by_keywords() {
        let extractor = extractor();
        let intent = extractor
            .extract(
                &Transcript::certain("I would like a birth certificate please"),
                &selection_context(),
            )
            .await
            .expect("should extract");
        assert_eq!(
            intent,
            UserIntent::SelectService {
                service_id: "birth_certificate".to_string()
            }
        );

        let intent = extractor
            .extract(
                &Transcript::certain("register me for the driving license exam"),
                &selection_context(),
            )
            .await
            .expect("should extract");
        assert_eq!(
            intent,
            UserIntent::SelectService {
                service_id: "driving_license_exam".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unmatched_service_is_unclear() {
        let intent = extractor()
            .extract(
                &Transcript::certain("I want to renew my passport"),
                &selection_context(),
            )
            .await
            .expect("should extract");
        assert_eq!(intent, UserIntent::Unclear);
    }

    #[tokio::test]
    async fn test_field_answer_passes_through() {
        let intent = extractor()
            .extract(&Transcript::certain("Gasabo"), &field_context("district"))
            .await
            .expect("should extract");
        assert_eq!(
            intent,
            UserIntent::ProvideField {
                value: "Gasabo".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_yes_no_field_answer_becomes_affirm() {
        let intent = extractor()
            .extract(
                &Transcript::certain("yes it is"),
                &field_context("for_self"),
            )
            .await
            .expect("should extract");
        assert_eq!(intent, UserIntent::Affirm);
    }

    #[tokio::test]
    async fn test_confirmation_yes_and_no() {
        let extractor = extractor();
        let yes = extractor
            .extract(&Transcript::certain("yes, go ahead"), &confirmation_context())
            .await
            .expect("should extract");
        assert_eq!(yes, UserIntent::Affirm);

        let no = extractor
            .extract(&Transcript::certain("no that is wrong"), &confirmation_context())
            .await
            .expect("should extract");
        assert_eq!(no, UserIntent::Deny);
    }

    #[tokio::test]
    async fn test_redo_names_the_field() {
        let intent = extractor()
            .extract(
                &Transcript::certain("please change the sector"),
                &confirmation_context(),
            )
            .await
            .expect("should extract");
        assert_eq!(
            intent,
            UserIntent::RedoField {
                field: "sector".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_words_win() {
        let intent = extractor()
            .extract(
                &Transcript::certain("cancel the whole thing"),
                &field_context("district"),
            )
            .await
            .expect("should extract");
        assert_eq!(intent, UserIntent::Cancel);
    }

    #[tokio::test]
    async fn test_scripted_browser_defaults_to_success() {
        let browser = ScriptedBrowser::new();
        browser.push_failure("portal form rejected");

        let spec = ActionSpec {
            session_id: Uuid::now_v7(),
            service_id: "birth_certificate".to_string(),
            step_id: "submit".to_string(),
            instructions: "submit".to_string(),
            fields: Default::default(),
        };
        let first = browser.execute(&spec).await.expect("should answer");
        assert!(!first.success);
        let second = browser.execute(&spec).await.expect("should answer");
        assert!(second.success);
        assert_eq!(browser.invocations(), 2);
    }
}
