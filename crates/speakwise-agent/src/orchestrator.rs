// Agent orchestrator
//
// The single point where a caller turn meets the workflow. One turn in,
// one batch of side effects out: interpret the utterance, step the
// engine, act on its decisions (speak, drive the browser, charge, close),
// and consult the recovery policy whenever anything misbehaves.
//
// Decision: The orchestrator never retries a collaborator itself. Every
// failure is turned into a Failure and handed to the recovery policy, so
// retry budgets live in exactly one place.
// Decision: Browser and payment results are awaited inline under the
// session task, bounded by the configured timeouts and the call's
// cancellation token. There is no out-of-band result entry point.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use speakwise_contracts::{
    ActionResult, ActionSpec, EventBody, Failure, Fee, FieldSpec, FieldValidator, Outcome,
    PaymentResult, ServiceDefinition, Session, SessionStatus, Transcript, UserIntent,
};
use speakwise_contracts::{DialogueContext, Expectation};
use speakwise_core::{
    CoreError, Decision, EngineInput, Recovery, RecoveryPolicy, SessionManager, WorkflowEngine,
};

use crate::config::AgentConfig;
use crate::error::{AgentError, PortError};
use crate::ports::{Collaborators, NotificationMessage};
use crate::prompts;

/// What the call loop should do once a turn has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Keep the line open and wait for the next turn.
    Continue,
    /// The call is over: completed, failed, or cancelled.
    Ended,
}

/// Outcome of one guarded collaborator call.
enum GuardedCall<T> {
    /// The collaborator produced a result the engine can fold.
    Done(T),
    /// No engine-visible result exists (timeout, unreachable engine).
    OutOfBand(Failure),
    /// The caller hung up while the collaborator was working.
    Dropped,
}

/// What came of consulting the recovery policy.
enum Recovered {
    /// Keep driving with this decision.
    Decision(Decision),
    /// A reprompt was spoken; the caller has the floor.
    Wait,
    /// The session was aborted and closed.
    Ended,
}

pub struct Orchestrator {
    manager: Arc<SessionManager>,
    engine: WorkflowEngine,
    recovery: RecoveryPolicy,
    ports: Collaborators,
    config: AgentConfig,
}

impl Orchestrator {
    pub fn new(manager: Arc<SessionManager>, ports: Collaborators, config: AgentConfig) -> Self {
        let engine = config.engine();
        let recovery = config.recovery();
        Self {
            manager,
            engine,
            recovery,
            ports,
            config,
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Speak the opening menu for a freshly answered call.
    pub async fn greet(&self, session_id: Uuid) {
        let line = prompts::greeting(self.manager.catalog());
        self.speak(session_id, &line).await;
    }

    /// Process one recognized turn for a session, end to end.
    #[instrument(skip(self, transcript, cancel))]
    pub async fn handle_turn(
        &self,
        session_id: Uuid,
        transcript: Transcript,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        let session = self.manager.get(session_id).await?;
        if session.is_terminal() {
            debug!(status = %session.status, "turn arrived after session close");
            return Ok(TurnOutcome::Ended);
        }

        // The audit trail keeps what the recognizer heard even when
        // nothing comes of it.
        self.manager
            .update(session_id, |s| {
                s.record(EventBody::TurnReceived {
                    text: transcript.text.clone(),
                    confidence: transcript.confidence,
                });
                Ok(())
            })
            .await?;

        if transcript.confidence < self.config.confidence_threshold {
            let failure = Failure::low_confidence(transcript.confidence);
            self.record_failure(session_id, &failure).await?;
            if let Recovery::Reprompt { say } = self.recovery.evaluate(&session, &failure) {
                self.speak(session_id, &say).await;
            }
            return Ok(TurnOutcome::Continue);
        }

        let context = self.dialogue_context(&session);
        let intent = match self.ports.intents.extract(&transcript, &context).await {
            Ok(intent) => intent,
            Err(error) => {
                warn!(%error, "intent extraction failed");
                self.speak(session_id, &prompts::clarify()).await;
                return Ok(TurnOutcome::Continue);
            }
        };
        debug!(?intent, text = %transcript.text, "turn interpreted");

        match intent {
            UserIntent::SelectService { service_id } => {
                self.select_service(&session, &service_id, cancel).await
            }
            UserIntent::ProvideField { value } => self.provide_field(&session, value, cancel).await,
            UserIntent::Affirm => self.answer_yes_no(&session, true, cancel).await,
            UserIntent::Deny => self.answer_yes_no(&session, false, cancel).await,
            UserIntent::RedoField { field } => self.redo_field(&session, field, cancel).await,
            UserIntent::Cancel => {
                info!("caller cancelled the request");
                self.speak(session_id, &prompts::cancelled_goodbye()).await;
                self.close_and_hangup(session_id, SessionStatus::Abandoned)
                    .await;
                Ok(TurnOutcome::Ended)
            }
            UserIntent::Unclear => {
                self.reprompt_pending(&session).await;
                Ok(TurnOutcome::Continue)
            }
        }
    }

    /// Close out a call that ended without a terminal decision: hangup,
    /// task cancellation, transport failure. Safe to call on a session
    /// that already reached a terminal status.
    #[instrument(skip(self))]
    pub async fn call_dropped(&self, session_id: Uuid) {
        match self.manager.close(session_id, SessionStatus::Abandoned).await {
            Ok(_) => info!(session_id = %session_id, "call dropped, session abandoned"),
            Err(CoreError::SessionClosed(_, _)) => {}
            Err(error) => {
                warn!(session_id = %session_id, %error, "could not abandon dropped call")
            }
        }
    }

    /// The caller went quiet past the idle limit: say goodbye and close.
    #[instrument(skip(self))]
    pub async fn idle_timeout(&self, session_id: Uuid) {
        info!(session_id = %session_id, "idle timeout reached");
        self.speak(session_id, &prompts::timeout_goodbye()).await;
        self.close_and_hangup(session_id, SessionStatus::Abandoned)
            .await;
    }

    // =========================================================================
    // Intent handling
    // =========================================================================

    async fn select_service(
        &self,
        session: &Session,
        service_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        if let Some(bound) = session.service_id.as_deref() {
            if bound != service_id {
                let def = self.manager.catalog().get(bound)?;
                self.speak(session.id, &prompts::already_working(def)).await;
                return Ok(TurnOutcome::Continue);
            }
        }
        match self.manager.bind_service(session.id, service_id).await {
            Ok(_) => {}
            Err(CoreError::UnknownService(_)) => {
                self.speak(session.id, &prompts::service_menu(self.manager.catalog()))
                    .await;
                return Ok(TurnOutcome::Continue);
            }
            Err(error) => return Err(error.into()),
        }
        let def = self.manager.catalog().get(service_id)?;
        info!(session_id = %session.id, service_id, "service bound");
        self.speak(session.id, &prompts::service_bound(def)).await;
        self.drive(session.id, def, EngineInput::Resume, cancel).await
    }

    async fn provide_field(
        &self,
        session: &Session,
        value: String,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        let Some(def) = self.bound_def(session)? else {
            self.speak(session.id, &prompts::service_menu(self.manager.catalog()))
                .await;
            return Ok(TurnOutcome::Continue);
        };
        let Some(field) = self.pending_field(session) else {
            self.speak(session.id, &prompts::hold_on()).await;
            return Ok(TurnOutcome::Continue);
        };
        self.drive(
            session.id,
            def,
            EngineInput::Field {
                name: field.name,
                raw: value,
            },
            cancel,
        )
        .await
    }

    async fn answer_yes_no(
        &self,
        session: &Session,
        answer: bool,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        let Some(def) = self.bound_def(session)? else {
            self.speak(session.id, &prompts::service_menu(self.manager.catalog()))
                .await;
            return Ok(TurnOutcome::Continue);
        };
        match session.status {
            SessionStatus::AwaitingConfirmation => {
                self.drive(session.id, def, EngineInput::Confirmation(answer), cancel)
                    .await
            }
            SessionStatus::Started | SessionStatus::Collecting => {
                // A yes or no can be the answer to a yes/no field.
                if let Some(field) = self.pending_field(session) {
                    if matches!(field.validator, FieldValidator::YesNo) {
                        let raw = if answer { "yes" } else { "no" };
                        return self
                            .drive(
                                session.id,
                                def,
                                EngineInput::Field {
                                    name: field.name,
                                    raw: raw.to_string(),
                                },
                                cancel,
                            )
                            .await;
                    }
                    self.speak(session.id, &field.prompt).await;
                    return Ok(TurnOutcome::Continue);
                }
                self.speak(session.id, &prompts::hold_on()).await;
                Ok(TurnOutcome::Continue)
            }
            _ => {
                self.speak(session.id, &prompts::hold_on()).await;
                Ok(TurnOutcome::Continue)
            }
        }
    }

    async fn redo_field(
        &self,
        session: &Session,
        field: String,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        let Some(def) = self.bound_def(session)? else {
            self.speak(session.id, &prompts::service_menu(self.manager.catalog()))
                .await;
            return Ok(TurnOutcome::Continue);
        };
        if def.step_declaring(&field).is_none() {
            self.speak(session.id, &prompts::clarify()).await;
            return Ok(TurnOutcome::Continue);
        }
        self.drive(session.id, def, EngineInput::Redo { field }, cancel)
            .await
    }

    /// Repeat whatever the session is waiting for.
    async fn reprompt_pending(&self, session: &Session) {
        let line = match (&session.service_id, session.status) {
            (None, _) => prompts::service_menu(self.manager.catalog()),
            _ => match self.pending_field(session) {
                Some(field) => format!("{} {}", prompts::clarify(), field.prompt),
                None => prompts::clarify(),
            },
        };
        self.speak(session.id, &line).await;
    }

    // =========================================================================
    // Decision loop
    // =========================================================================

    /// Feed one stimulus into the engine, then act on decisions until the
    /// workflow needs the caller again or the call is over.
    async fn drive(
        &self,
        session_id: Uuid,
        def: &ServiceDefinition,
        input: EngineInput,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        let mut decision = self.step(session_id, def, input).await?;
        loop {
            match decision {
                Decision::AskField { step_id, field } => {
                    let line = match self.step_intro(session_id, def, &step_id, &field).await {
                        Some(intro) => format!("{intro} {}", field.prompt),
                        None => field.prompt.clone(),
                    };
                    self.speak(session_id, &line).await;
                    return Ok(TurnOutcome::Continue);
                }
                Decision::RequestConfirmation { step_id, summary } => {
                    let lead = self.step_prompt(def, &step_id);
                    self.speak(session_id, &prompts::confirmation(&lead, &summary))
                        .await;
                    return Ok(TurnOutcome::Continue);
                }
                Decision::DispatchBrowserAction(spec) => {
                    self.speak(session_id, &self.step_prompt(def, &spec.step_id))
                        .await;
                    match self.execute_browser(&spec, cancel).await {
                        GuardedCall::Done(result) => {
                            decision = self
                                .step(session_id, def, EngineInput::Browser(result))
                                .await?;
                        }
                        GuardedCall::OutOfBand(failure) => {
                            self.record_failure(session_id, &failure).await?;
                            match self.recover(session_id, def, &failure, cancel).await? {
                                Recovered::Decision(next) => decision = next,
                                Recovered::Wait => return Ok(TurnOutcome::Continue),
                                Recovered::Ended => return Ok(TurnOutcome::Ended),
                            }
                        }
                        GuardedCall::Dropped => {
                            self.call_dropped(session_id).await;
                            return Ok(TurnOutcome::Ended);
                        }
                    }
                }
                Decision::RequestPayment { step_id, fee } => {
                    let lead = self.step_prompt(def, &step_id);
                    self.speak(session_id, &prompts::payment_announcement(&lead, &fee))
                        .await;
                    match self.execute_payment(session_id, &fee, cancel).await {
                        GuardedCall::Done(result) => {
                            decision = self
                                .step(session_id, def, EngineInput::Payment(result))
                                .await?;
                        }
                        GuardedCall::OutOfBand(failure) => {
                            self.record_failure(session_id, &failure).await?;
                            match self.recover(session_id, def, &failure, cancel).await? {
                                Recovered::Decision(next) => decision = next,
                                Recovered::Wait => return Ok(TurnOutcome::Continue),
                                Recovered::Ended => return Ok(TurnOutcome::Ended),
                            }
                        }
                        GuardedCall::Dropped => {
                            self.call_dropped(session_id).await;
                            return Ok(TurnOutcome::Ended);
                        }
                    }
                }
                Decision::Recover(failure) => {
                    match self.recover(session_id, def, &failure, cancel).await? {
                        Recovered::Decision(next) => decision = next,
                        Recovered::Wait => return Ok(TurnOutcome::Continue),
                        Recovered::Ended => return Ok(TurnOutcome::Ended),
                    }
                }
                Decision::Finish(outcome) => return self.finish(session_id, def, outcome).await,
            }
        }
    }

    /// One engine step under the session's writer lock.
    async fn step(
        &self,
        session_id: Uuid,
        def: &ServiceDefinition,
        input: EngineInput,
    ) -> Result<Decision, AgentError> {
        Ok(self
            .manager
            .update(session_id, |s| self.engine.next(s, def, input))
            .await?)
    }

    /// Apply the recovery policy to a failure.
    async fn recover(
        &self,
        session_id: Uuid,
        def: &ServiceDefinition,
        failure: &Failure,
        cancel: &CancellationToken,
    ) -> Result<Recovered, AgentError> {
        let session = self.manager.get(session_id).await?;
        let action = self.recovery.evaluate(&session, failure);
        info!(session_id = %session_id, failure = %failure, action = ?action, "recovery policy consulted");

        match action {
            Recovery::Reprompt { say } => {
                self.speak(session_id, &say).await;
                Ok(Recovered::Wait)
            }
            Recovery::Retry { step_id, attempt } => {
                self.manager
                    .update(session_id, |s| {
                        self.engine.note_retry(s, &step_id, failure.kind);
                        Ok(())
                    })
                    .await?;
                let delay = self.config.retry_delay(attempt);
                debug!(session_id = %session_id, step_id = %step_id, attempt, ?delay, "retrying step");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        self.call_dropped(session_id).await;
                        return Ok(Recovered::Ended);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                let decision = self.step(session_id, def, EngineInput::Resume).await?;
                Ok(Recovered::Decision(decision))
            }
            Recovery::RollbackStep { step_id } => {
                info!(session_id = %session_id, step_id = %step_id, "rolling back");
                let decision = self
                    .manager
                    .update(session_id, |s| self.engine.rollback_to(s, def, &step_id))
                    .await?;
                Ok(Recovered::Decision(decision))
            }
            Recovery::Abort {
                reason,
                notify_human,
            } => {
                error!(session_id = %session_id, failure = %failure, reason = %reason, "aborting session");
                let outcome = self
                    .manager
                    .update(session_id, |s| self.engine.fail(s, def, failure))
                    .await?;
                if notify_human {
                    self.notify_operator(session_id, &session.caller, &reason).await;
                }
                self.speak(session_id, &prompts::outcome_line(&outcome, def))
                    .await;
                self.close_and_hangup(session_id, SessionStatus::Failed).await;
                Ok(Recovered::Ended)
            }
        }
    }

    /// Wrap up a workflow the engine finished on its own terms.
    async fn finish(
        &self,
        session_id: Uuid,
        def: &ServiceDefinition,
        outcome: Outcome,
    ) -> Result<TurnOutcome, AgentError> {
        info!(
            session_id = %session_id,
            success = outcome.success,
            reference = ?outcome.tracking_reference,
            "workflow finished"
        );
        if outcome.success {
            if let (Some(reference), Some(fee)) = (&outcome.tracking_reference, &def.fee) {
                let session = self.manager.get(session_id).await?;
                let message = NotificationMessage::TaskComplete {
                    transaction_id: reference.clone(),
                    date: Utc::now().format("%Y-%m-%d").to_string(),
                    amount: fee.amount,
                    currency: fee.currency.clone(),
                };
                if let Err(error) = self.ports.notifier.deliver(&session.caller, message).await {
                    warn!(session_id = %session_id, %error, "completion SMS failed");
                }
            }
        }
        self.speak(session_id, &prompts::outcome_line(&outcome, def))
            .await;
        let status = if outcome.success {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };
        self.close_and_hangup(session_id, status).await;
        Ok(TurnOutcome::Ended)
    }

    // =========================================================================
    // Guarded collaborator calls
    // =========================================================================

    async fn execute_browser(
        &self,
        spec: &ActionSpec,
        cancel: &CancellationToken,
    ) -> GuardedCall<ActionResult> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => GuardedCall::Dropped,
            outcome = timeout(self.config.browser_timeout, self.ports.browser.execute(spec)) => {
                match outcome {
                    Ok(Ok(result)) => GuardedCall::Done(result),
                    // A reported failure is an engine-visible result; an
                    // unreachable engine is not.
                    Ok(Err(PortError::Failed(message))) => {
                        GuardedCall::Done(ActionResult::failed(message))
                    }
                    Ok(Err(PortError::Unavailable(message))) => {
                        GuardedCall::OutOfBand(Failure::site_unavailable(&spec.step_id, message))
                    }
                    Err(_) => GuardedCall::OutOfBand(Failure::browser_timeout(&spec.step_id)),
                }
            }
        }
    }

    /// All payment problems surface as declined results so the decline is
    /// on the money trail; the gateway dedupes charges by session id.
    async fn execute_payment(
        &self,
        session_id: Uuid,
        fee: &Fee,
        cancel: &CancellationToken,
    ) -> GuardedCall<PaymentResult> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => GuardedCall::Dropped,
            outcome = timeout(self.config.payment_timeout, self.ports.payments.charge(session_id, fee)) => {
                match outcome {
                    Ok(Ok(result)) => GuardedCall::Done(result),
                    Ok(Err(error)) => GuardedCall::Done(PaymentResult::declined(error.to_string())),
                    Err(_) => GuardedCall::Done(PaymentResult::declined(
                        "the payment request timed out",
                    )),
                }
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn bound_def(&self, session: &Session) -> Result<Option<&ServiceDefinition>, AgentError> {
        match session.service_id.as_deref() {
            Some(id) => Ok(Some(self.manager.catalog().get(id)?)),
            None => Ok(None),
        }
    }

    /// The field the session is waiting on, if any.
    ///
    /// A declined confirmation re-enters a collect step with every field
    /// already present; the engine re-asks the first one and the answer
    /// overwrites, so a complete collect step still has a pending field.
    fn pending_field(&self, session: &Session) -> Option<FieldSpec> {
        let def = self.manager.catalog().get(session.service_id.as_deref()?).ok()?;
        let step = def.step(session.current_step)?;
        step.first_missing(&session.fields)
            .or_else(|| step.fields.first())
            .cloned()
    }

    fn dialogue_context(&self, session: &Session) -> DialogueContext {
        let expecting = match (&session.service_id, session.status) {
            (None, _) => Expectation::ServiceSelection {
                offered: self.manager.catalog().service_ids(),
            },
            (Some(_), SessionStatus::Started | SessionStatus::Collecting) => {
                match self.pending_field(session) {
                    Some(field) => Expectation::FieldValue { field },
                    None => Expectation::Hold,
                }
            }
            (Some(_), SessionStatus::AwaitingConfirmation) => Expectation::Confirmation,
            _ => Expectation::Hold,
        };
        DialogueContext {
            session_id: session.id,
            service_id: session.service_id.clone(),
            expecting,
        }
    }

    fn step_prompt(&self, def: &ServiceDefinition, step_id: &str) -> String {
        def.step_by_id(step_id)
            .map(|(_, step)| step.prompt.clone())
            .unwrap_or_default()
    }

    /// Collect steps carry an intro line, spoken once: when the step is
    /// entered with none of its fields collected yet.
    async fn step_intro(
        &self,
        session_id: Uuid,
        def: &ServiceDefinition,
        step_id: &str,
        field: &FieldSpec,
    ) -> Option<String> {
        let (_, step) = def.step_by_id(step_id)?;
        if step.prompt.is_empty() || step.fields.first().map(|f| &f.name) != Some(&field.name) {
            return None;
        }
        let session = self.manager.get(session_id).await.ok()?;
        if step.fields.iter().any(|f| session.fields.contains_key(&f.name)) {
            return None;
        }
        Some(step.prompt.clone())
    }

    async fn record_failure(&self, session_id: Uuid, failure: &Failure) -> Result<(), AgentError> {
        self.manager
            .update(session_id, |s| {
                s.record(EventBody::Error {
                    kind: failure.kind,
                    field: failure.field.clone(),
                    message: failure.message.clone(),
                });
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn notify_operator(&self, session_id: Uuid, caller: &str, reason: &str) {
        let message = NotificationMessage::FollowUpRequired {
            session_id,
            caller: caller.to_string(),
            reason: reason.to_string(),
        };
        if let Err(error) = self
            .ports
            .notifier
            .deliver(&self.config.ops_contact, message)
            .await
        {
            error!(session_id = %session_id, %error, "operator notification failed");
        }
    }

    /// End-of-call cleanup. Close races and hangup failures downgrade to
    /// logs; there is nobody left on the line to surface them to.
    async fn close_and_hangup(&self, session_id: Uuid, status: SessionStatus) {
        match self.manager.close(session_id, status).await {
            Ok(_) => {}
            Err(CoreError::SessionClosed(_, _)) => {}
            Err(error) => warn!(session_id = %session_id, %error, "session close failed"),
        }
        if let Err(error) = self.ports.calls.hangup(session_id).await {
            warn!(session_id = %session_id, %error, "hangup failed");
        }
    }

    /// Synthesis failures downgrade to logs; losing one prompt must not
    /// take the call down.
    async fn speak(&self, session_id: Uuid, text: &str) {
        debug!(session_id = %session_id, text, "speaking");
        if let Err(error) = self.ports.speech.say(session_id, text).await {
            warn!(session_id = %session_id, %error, "speech synthesis failed");
        }
    }
}
