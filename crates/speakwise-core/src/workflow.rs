//! Workflow engine
//!
//! One generic stepper interprets any catalog entry. `next` takes the
//! session, its service definition and the latest stimulus, mutates the
//! session through recorded events only, and returns the one decision the
//! orchestrator should act on:
//!
//! ```text
//!   turn/result ──▶ next(session, definition, input)
//!                        │
//!                        ├─▶ AskField              (speak, wait for turn)
//!                        ├─▶ DispatchBrowserAction (call collaborator)
//!                        ├─▶ RequestPayment        (call collaborator)
//!                        ├─▶ RequestConfirmation   (speak, wait for turn)
//!                        ├─▶ Finish                (close the call)
//!                        └─▶ Recover               (consult the policy)
//! ```
//!
//! The engine is pure state-machine logic: no I/O, no clock beyond
//! reference minting, no locking. The session manager provides the
//! single-writer context it runs in.

use chrono::Utc;
use speakwise_contracts::{
    ActionKind, ActionResult, ActionSpec, DispatchKind, EventBody, Failure, FailureKind, Fee,
    FieldSpec, Outcome, PaymentResult, ServiceDefinition, Session, SessionStatus, Step,
};

use crate::error::CoreError;

/// Where a declined confirmation sends the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackTarget {
    /// Nearest collect step before the confirmation (default).
    PreviousCollect,
    /// A pinned step id.
    Step(String),
}

/// The latest stimulus for a session.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineInput {
    /// No new stimulus: kick off after binding, or resume after a crash
    /// or reprompt.
    Resume,
    /// The caller answered the pending field.
    Field { name: String, raw: String },
    /// The browser collaborator came back.
    Browser(ActionResult),
    /// The payment collaborator came back.
    Payment(PaymentResult),
    /// The caller answered the confirmation prompt.
    Confirmation(bool),
    /// The caller explicitly asked to change an earlier answer.
    Redo { field: String },
}

/// What the orchestrator should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    AskField { step_id: String, field: FieldSpec },
    DispatchBrowserAction(ActionSpec),
    RequestPayment { step_id: String, fee: Fee },
    RequestConfirmation {
        step_id: String,
        summary: Vec<(String, String)>,
    },
    Finish(Outcome),
    Recover(Failure),
}

/// Deterministic workflow stepper.
#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    max_retries: u32,
    rollback: RollbackTarget,
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rollback: RollbackTarget::PreviousCollect,
        }
    }
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_rollback(mut self, rollback: RollbackTarget) -> Self {
        self.rollback = rollback;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Advance the workflow by one stimulus.
    pub fn next(
        &self,
        session: &mut Session,
        def: &ServiceDefinition,
        input: EngineInput,
    ) -> Result<Decision, CoreError> {
        if session.is_terminal() {
            return Err(CoreError::SessionClosed(session.id, session.status));
        }
        match session.service_id.as_deref() {
            None => return Err(CoreError::ServiceNotBound(session.id)),
            Some(bound) if bound != def.id => {
                return Err(CoreError::ServiceMismatch {
                    bound: bound.to_string(),
                    given: def.id.clone(),
                })
            }
            Some(_) => {}
        }

        match input {
            EngineInput::Resume => self.advance_from(session, def, session.current_step),
            EngineInput::Field { name, raw } => self.handle_field(session, def, &name, &raw),
            EngineInput::Browser(result) => self.handle_browser(session, def, result),
            EngineInput::Payment(result) => self.handle_payment(session, def, result),
            EngineInput::Confirmation(answer) => self.handle_confirmation(session, def, answer),
            EngineInput::Redo { field } => self.handle_redo(session, def, &field),
        }
    }

    /// Record a retry for a step and return the attempt count after it.
    /// The recovery policy decides *whether* to retry; this only books it.
    pub fn note_retry(&self, session: &mut Session, step_id: &str, reason: FailureKind) -> u32 {
        let attempt = session.retry_count(step_id) + 1;
        session.record(EventBody::Retry {
            step_id: step_id.to_string(),
            attempt,
            reason,
        });
        attempt
    }

    /// Terminate the workflow after an unrecoverable failure. Reports the
    /// last step that finished cleanly so partial completion is never
    /// presented as success.
    pub fn fail(
        &self,
        session: &mut Session,
        def: &ServiceDefinition,
        failure: &Failure,
    ) -> Result<Outcome, CoreError> {
        let failing_index = session.current_step.min(def.steps.len().saturating_sub(1));
        self.transition(session, SessionStatus::Failed, session.current_step)?;

        let failing_step = failure
            .step_id
            .clone()
            .or_else(|| def.step(failing_index).map(|s| s.id.clone()));
        let last_successful_step = if failing_index == 0 {
            None
        } else {
            def.step(failing_index - 1).map(|s| s.id.clone())
        };

        Ok(Outcome {
            success: false,
            service_id: def.id.clone(),
            last_successful_step,
            failing_step,
            tracking_reference: None,
            message: format!(
                "I could not complete your {} request: {}",
                def.display_name, failure.message
            ),
        })
    }

    /// Return the workflow to a named step and take it from there. Backs
    /// the `RollbackStep` recovery action; collected fields survive.
    pub fn rollback_to(
        &self,
        session: &mut Session,
        def: &ServiceDefinition,
        step_id: &str,
    ) -> Result<Decision, CoreError> {
        let (index, step) = def
            .step_by_id(step_id)
            .ok_or_else(|| CoreError::UnexpectedInput(format!("unknown rollback step {step_id}")))?;
        let status = match step.action {
            ActionKind::CollectInfo => SessionStatus::Collecting,
            ActionKind::BrowserAction => SessionStatus::Executing,
            ActionKind::Payment => SessionStatus::AwaitingPayment,
            ActionKind::Confirm => SessionStatus::AwaitingConfirmation,
            ActionKind::Terminal => SessionStatus::Collecting,
        };
        self.transition(session, status, index)?;
        self.advance_from(session, def, index)
    }

    /// Target index for a declined confirmation.
    pub fn rollback_index(&self, def: &ServiceDefinition, from: usize) -> usize {
        match &self.rollback {
            RollbackTarget::Step(id) => def
                .step_by_id(id)
                .map(|(index, _)| index)
                .or_else(|| def.last_collect_step_before(from))
                .unwrap_or(0),
            RollbackTarget::PreviousCollect => {
                def.last_collect_step_before(from).unwrap_or(0)
            }
        }
    }

    // =========================================================================
    // Input handlers
    // =========================================================================

    fn handle_field(
        &self,
        session: &mut Session,
        def: &ServiceDefinition,
        name: &str,
        raw: &str,
    ) -> Result<Decision, CoreError> {
        if session.status != SessionStatus::Collecting && session.status != SessionStatus::Started {
            return Err(CoreError::UnexpectedInput(format!(
                "field value while {}",
                session.status
            )));
        }
        let step = def
            .step(session.current_step)
            .ok_or_else(|| CoreError::UnexpectedInput("field value after final step".to_string()))?;
        let spec = step
            .field(name)
            .ok_or_else(|| CoreError::UndeclaredField {
                field: name.to_string(),
            })?;

        match spec.validator.validate(raw) {
            Ok(value) => {
                session.record(EventBody::FieldCollected {
                    field: name.to_string(),
                    value,
                });
                self.advance_from(session, def, session.current_step)
            }
            Err(complaint) => {
                session.record(EventBody::Error {
                    kind: FailureKind::FieldValidationFailed,
                    field: Some(name.to_string()),
                    message: complaint.clone(),
                });
                Ok(Decision::Recover(Failure::validation(
                    &step.id, name, complaint,
                )))
            }
        }
    }

    fn handle_browser(
        &self,
        session: &mut Session,
        def: &ServiceDefinition,
        result: ActionResult,
    ) -> Result<Decision, CoreError> {
        if session.status != SessionStatus::Executing {
            return Err(CoreError::UnexpectedInput(format!(
                "browser result while {}",
                session.status
            )));
        }
        let step = self.current_step_of(session, def, ActionKind::BrowserAction)?;
        let step_id = step.id.clone();

        session.record(EventBody::ActionResult {
            step_id: step_id.clone(),
            action: DispatchKind::Browser,
            success: result.success,
            data: result.extracted_data.clone(),
            error: result.error.clone(),
        });

        if result.success {
            self.advance_from(session, def, session.current_step + 1)
        } else {
            let message = result
                .error
                .unwrap_or_else(|| "the portal reported a failure".to_string());
            Ok(Decision::Recover(Failure::browser(&step_id, message)))
        }
    }

    fn handle_payment(
        &self,
        session: &mut Session,
        def: &ServiceDefinition,
        result: PaymentResult,
    ) -> Result<Decision, CoreError> {
        if session.status != SessionStatus::AwaitingPayment {
            return Err(CoreError::UnexpectedInput(format!(
                "payment result while {}",
                session.status
            )));
        }
        let step = self.current_step_of(session, def, ActionKind::Payment)?;
        let step_id = step.id.clone();

        session.record(EventBody::ActionResult {
            step_id: step_id.clone(),
            action: DispatchKind::Payment,
            success: result.success,
            data: result
                .reference
                .as_ref()
                .map(|r| serde_json::json!({ "reference": r })),
            error: result.message.clone(),
        });

        if result.success {
            self.advance_from(session, def, session.current_step + 1)
        } else {
            let message = result
                .message
                .unwrap_or_else(|| "the payment was not confirmed".to_string());
            Ok(Decision::Recover(Failure::payment(&step_id, message)))
        }
    }

    fn handle_confirmation(
        &self,
        session: &mut Session,
        def: &ServiceDefinition,
        answer: bool,
    ) -> Result<Decision, CoreError> {
        if session.status != SessionStatus::AwaitingConfirmation {
            return Err(CoreError::UnexpectedInput(format!(
                "confirmation answer while {}",
                session.status
            )));
        }
        let index = session.current_step;
        self.current_step_of(session, def, ActionKind::Confirm)?;

        if answer {
            return self.advance_from(session, def, index + 1);
        }

        // Declined: back to the rollback step, keeping every validated
        // field. The first field of the target step is re-asked; its
        // answer overwrites, and redo requests can reach the others.
        let target = self.rollback_index(def, index);
        self.transition(session, SessionStatus::Collecting, target)?;
        let step = def
            .step(target)
            .ok_or_else(|| CoreError::UnexpectedInput("rollback past final step".to_string()))?;
        match step.fields.first() {
            Some(field) => Ok(Decision::AskField {
                step_id: step.id.clone(),
                field: field.clone(),
            }),
            None => self.advance_from(session, def, target),
        }
    }

    fn handle_redo(
        &self,
        session: &mut Session,
        def: &ServiceDefinition,
        field: &str,
    ) -> Result<Decision, CoreError> {
        let declaring = def
            .step_declaring(field)
            .ok_or_else(|| CoreError::UndeclaredField {
                field: field.to_string(),
            })?;

        session.record(EventBody::FieldCleared {
            field: field.to_string(),
        });
        self.transition(session, SessionStatus::Collecting, declaring)?;
        self.advance_from(session, def, declaring)
    }

    // =========================================================================
    // Advancement
    // =========================================================================

    /// Walk forward from `start` to the next step that needs something,
    /// recording only the landing transition.
    fn advance_from(
        &self,
        session: &mut Session,
        def: &ServiceDefinition,
        start: usize,
    ) -> Result<Decision, CoreError> {
        let mut index = start;
        loop {
            let Some(step) = def.step(index) else {
                return self.complete(session, def);
            };
            match step.action {
                ActionKind::CollectInfo => {
                    if let Some(field) = step.first_missing(&session.fields) {
                        self.transition(session, SessionStatus::Collecting, index)?;
                        return Ok(Decision::AskField {
                            step_id: step.id.clone(),
                            field: field.clone(),
                        });
                    }
                    index += 1;
                }
                ActionKind::BrowserAction => {
                    self.transition(session, SessionStatus::Executing, index)?;
                    session.record(EventBody::ActionDispatched {
                        step_id: step.id.clone(),
                        action: DispatchKind::Browser,
                    });
                    return Ok(Decision::DispatchBrowserAction(build_action_spec(
                        session, def, step,
                    )));
                }
                ActionKind::Payment => {
                    // Confirmed payments are never charged twice; a
                    // rollback that re-advances skips straight past.
                    if session.confirmed_payments.contains(&step.id) {
                        index += 1;
                        continue;
                    }
                    let fee = def.fee.clone().ok_or_else(|| {
                        CoreError::InvalidDefinition(
                            def.id.clone(),
                            "payment step declared without a fee".to_string(),
                        )
                    })?;
                    self.transition(session, SessionStatus::AwaitingPayment, index)?;
                    session.record(EventBody::ActionDispatched {
                        step_id: step.id.clone(),
                        action: DispatchKind::Payment,
                    });
                    return Ok(Decision::RequestPayment {
                        step_id: step.id.clone(),
                        fee,
                    });
                }
                ActionKind::Confirm => {
                    self.transition(session, SessionStatus::AwaitingConfirmation, index)?;
                    return Ok(Decision::RequestConfirmation {
                        step_id: step.id.clone(),
                        summary: self.summary(session, def),
                    });
                }
                ActionKind::Terminal => return self.complete(session, def),
            }
        }
    }

    fn complete(
        &self,
        session: &mut Session,
        def: &ServiceDefinition,
    ) -> Result<Decision, CoreError> {
        self.transition(session, SessionStatus::Completed, def.steps.len())?;
        let tracking_reference = def
            .requires_payment
            .then(|| mint_reference(&def.reference_prefix));
        Ok(Decision::Finish(Outcome {
            success: true,
            service_id: def.id.clone(),
            last_successful_step: def.steps.last().map(|s| s.id.clone()),
            failing_step: None,
            tracking_reference,
            message: format!("Your {} request is complete.", def.display_name),
        }))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn transition(
        &self,
        session: &mut Session,
        to: SessionStatus,
        step: usize,
    ) -> Result<(), CoreError> {
        let from = session.status;
        if from == to && session.current_step == step {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(CoreError::InvalidTransition { from, to });
        }
        session.record(EventBody::StateTransition { from, to, step });
        Ok(())
    }

    fn current_step_of<'a>(
        &self,
        session: &Session,
        def: &'a ServiceDefinition,
        expected: ActionKind,
    ) -> Result<&'a Step, CoreError> {
        let step = def.step(session.current_step).ok_or_else(|| {
            CoreError::UnexpectedInput("result arrived after the final step".to_string())
        })?;
        if step.action != expected {
            return Err(CoreError::UnexpectedInput(format!(
                "result does not match step {}",
                step.id
            )));
        }
        Ok(step)
    }

    /// Collected fields in declaration order, for the read-back summary.
    fn summary(&self, session: &Session, def: &ServiceDefinition) -> Vec<(String, String)> {
        def.steps
            .iter()
            .flat_map(|s| s.fields.iter())
            .filter_map(|f| {
                session
                    .fields
                    .get(&f.name)
                    .map(|v| (f.name.clone(), v.clone()))
            })
            .collect()
    }
}

fn build_action_spec(session: &Session, def: &ServiceDefinition, step: &Step) -> ActionSpec {
    ActionSpec {
        session_id: session.id,
        service_id: def.id.clone(),
        step_id: step.id.clone(),
        instructions: format!(
            "Complete the '{}' step of the {} service on the government portal using the attached field values.",
            step.id, def.display_name
        ),
        fields: session.fields.clone(),
    }
}

/// Mint a caller-quotable tracking reference (BC-20250114093042).
pub fn mint_reference(prefix: &str) -> String {
    format!("{prefix}-{}", Utc::now().format("%Y%m%d%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use speakwise_contracts::FieldValidator;

    /// The minimal service shape used throughout the engine tests:
    /// collect(district, sector) -> submit -> payment -> confirm.
    fn test_service() -> ServiceDefinition {
        ServiceDefinition::new("birth_certificate", "Birth Certificate", "BC")
            .with_step(Step::collect(
                "location",
                "Where should the certificate be issued?",
                vec![
                    FieldSpec::new(
                        "district",
                        "Which district?",
                        FieldValidator::OneOf {
                            choices: vec!["Gasabo".to_string(), "Kicukiro".to_string()],
                        },
                    ),
                    FieldSpec::new(
                        "sector",
                        "Which sector?",
                        FieldValidator::OneOf {
                            choices: vec!["Jali".to_string(), "Gisozi".to_string()],
                        },
                    ),
                ],
            ))
            .with_step(Step::browser("submit", "Submitting."))
            .with_step(Step::payment("payment", "Paying."))
            .with_step(Step::confirm("confirm", "Please confirm."))
            .with_fee(Fee::rwf(5000))
    }

    fn bound_session(def: &ServiceDefinition) -> Session {
        let mut session = Session::new("+250788123456");
        session.record(EventBody::ServiceSelected {
            service_id: def.id.clone(),
        });
        session
    }

    fn ask_field(engine: &WorkflowEngine, session: &mut Session, def: &ServiceDefinition) -> String {
        match engine.next(session, def, EngineInput::Resume) {
            Ok(Decision::AskField { field, .. }) => field.name,
            other => panic!("expected AskField, got {other:?}"),
        }
    }

    #[test]
    fn test_kickoff_asks_first_field_in_declaration_order() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);

        let field = ask_field(&engine, &mut session, &def);
        assert_eq!(field, "district");
        assert_eq!(session.status, SessionStatus::Collecting);
        assert_eq!(session.current_step, 0);
    }

    #[test]
    fn test_valid_field_advances_to_next_missing_field() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        ask_field(&engine, &mut session, &def);

        let decision = engine
            .next(
                &mut session,
                &def,
                EngineInput::Field {
                    name: "district".to_string(),
                    raw: "gasabo".to_string(),
                },
            )
            .expect("should accept district");

        // Normalized to catalog casing, next field asked.
        assert_eq!(session.field_value("district"), Some("Gasabo"));
        assert!(
            matches!(decision, Decision::AskField { field, .. } if field.name == "sector"),
        );
    }

    #[test]
    fn test_invalid_field_never_stores_and_never_advances() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        ask_field(&engine, &mut session, &def);

        let decision = engine
            .next(
                &mut session,
                &def,
                EngineInput::Field {
                    name: "district".to_string(),
                    raw: "Huye".to_string(),
                },
            )
            .expect("invalid input is not an engine error");

        assert!(matches!(
            decision,
            Decision::Recover(Failure {
                kind: FailureKind::FieldValidationFailed,
                ..
            })
        ));
        assert_eq!(session.field_value("district"), None);
        assert_eq!(session.current_step, 0);
        assert_eq!(session.field_retry_count("district"), 1);
        // Step-level retry budget untouched by field reprompts.
        assert_eq!(session.retry_count("location"), 0);
    }

    #[test]
    fn test_completed_collect_step_dispatches_browser_action() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        ask_field(&engine, &mut session, &def);

        engine
            .next(
                &mut session,
                &def,
                EngineInput::Field {
                    name: "district".to_string(),
                    raw: "Gasabo".to_string(),
                },
            )
            .expect("should accept district");
        let decision = engine
            .next(
                &mut session,
                &def,
                EngineInput::Field {
                    name: "sector".to_string(),
                    raw: "Jali".to_string(),
                },
            )
            .expect("should accept sector");

        match decision {
            Decision::DispatchBrowserAction(spec) => {
                assert_eq!(spec.step_id, "submit");
                assert_eq!(spec.service_id, "birth_certificate");
                assert_eq!(spec.fields.get("district").map(String::as_str), Some("Gasabo"));
                assert_eq!(spec.session_id, session.id);
            }
            other => panic!("expected DispatchBrowserAction, got {other:?}"),
        }
        assert_eq!(session.status, SessionStatus::Executing);
        assert_eq!(session.current_step, 1);
    }

    #[test]
    fn test_browser_failure_yields_recover_and_no_advance() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        collect_location(&engine, &mut session, &def);

        let decision = engine
            .next(
                &mut session,
                &def,
                EngineInput::Browser(ActionResult::failed("portal form rejected")),
            )
            .expect("failure result is not an engine error");

        assert!(matches!(
            decision,
            Decision::Recover(Failure {
                kind: FailureKind::BrowserActionFailed,
                ..
            })
        ));
        assert_eq!(session.current_step, 1);
        assert_eq!(session.status, SessionStatus::Executing);
        let last = session.last_browser_result.as_ref().expect("result folded");
        assert!(!last.success);
    }

    #[test]
    fn test_browser_success_moves_to_payment() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        collect_location(&engine, &mut session, &def);

        let decision = engine
            .next(
                &mut session,
                &def,
                EngineInput::Browser(ActionResult::ok(serde_json::json!({"application": "A-1"}))),
            )
            .expect("should accept browser success");

        assert!(matches!(
            decision,
            Decision::RequestPayment { ref step_id, ref fee }
                if step_id == "payment" && fee.amount == 5000
        ));
        assert_eq!(session.status, SessionStatus::AwaitingPayment);
        assert_eq!(session.current_step, 2);
    }

    #[test]
    fn test_payment_success_moves_to_confirmation_with_summary() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        run_to_payment(&engine, &mut session, &def);

        let decision = engine
            .next(
                &mut session,
                &def,
                EngineInput::Payment(PaymentResult::confirmed("MOMO-123")),
            )
            .expect("should accept payment");

        match decision {
            Decision::RequestConfirmation { step_id, summary } => {
                assert_eq!(step_id, "confirm");
                assert_eq!(
                    summary,
                    vec![
                        ("district".to_string(), "Gasabo".to_string()),
                        ("sector".to_string(), "Jali".to_string()),
                    ]
                );
            }
            other => panic!("expected RequestConfirmation, got {other:?}"),
        }
        assert!(session.confirmed_payments.contains("payment"));
    }

    #[test]
    fn test_affirmative_confirmation_completes_with_tracking_reference() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        run_to_confirmation(&engine, &mut session, &def);

        let decision = engine
            .next(&mut session, &def, EngineInput::Confirmation(true))
            .expect("should accept confirmation");

        match decision {
            Decision::Finish(outcome) => {
                assert!(outcome.success);
                assert_eq!(outcome.last_successful_step.as_deref(), Some("confirm"));
                assert!(outcome
                    .tracking_reference
                    .as_deref()
                    .is_some_and(|r| r.starts_with("BC-")));
            }
            other => panic!("expected Finish, got {other:?}"),
        }
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.current_step, def.steps.len());
        // Every required field present at completion.
        for name in def.required_field_names() {
            assert!(session.fields.contains_key(name), "missing field {name}");
        }
    }

    #[test]
    fn test_negative_confirmation_rolls_back_keeping_fields() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        run_to_confirmation(&engine, &mut session, &def);

        let decision = engine
            .next(&mut session, &def, EngineInput::Confirmation(false))
            .expect("should accept denial");

        assert_eq!(session.status, SessionStatus::Collecting);
        assert_eq!(session.current_step, 0);
        assert_eq!(session.field_value("district"), Some("Gasabo"));
        assert_eq!(session.field_value("sector"), Some("Jali"));
        assert!(
            matches!(decision, Decision::AskField { field, .. } if field.name == "district"),
        );
    }

    #[test]
    fn test_rollback_readvance_never_charges_payment_twice() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        run_to_confirmation(&engine, &mut session, &def);

        engine
            .next(&mut session, &def, EngineInput::Confirmation(false))
            .expect("should roll back");
        // Re-answer the re-asked field with the same value.
        let decision = engine
            .next(
                &mut session,
                &def,
                EngineInput::Field {
                    name: "district".to_string(),
                    raw: "Gasabo".to_string(),
                },
            )
            .expect("should accept re-answer");

        // Straight back to the browser step; the confirmed payment is
        // skipped when the walk reaches it again.
        assert!(matches!(decision, Decision::DispatchBrowserAction(_)));
        let decision = engine
            .next(
                &mut session,
                &def,
                EngineInput::Browser(ActionResult::ok(serde_json::json!({}))),
            )
            .expect("should accept resubmission");
        assert!(
            matches!(decision, Decision::RequestConfirmation { .. }),
            "payment already confirmed, workflow should go straight to confirmation"
        );
    }

    #[test]
    fn test_pinned_rollback_step_is_honored() {
        let engine = WorkflowEngine::new().with_rollback(RollbackTarget::Step("location".to_string()));
        let def = test_service();
        let mut session = bound_session(&def);
        run_to_confirmation(&engine, &mut session, &def);

        engine
            .next(&mut session, &def, EngineInput::Confirmation(false))
            .expect("should roll back");
        assert_eq!(session.current_step, 0);
        assert_eq!(session.status, SessionStatus::Collecting);
    }

    #[test]
    fn test_rollback_to_reenters_named_step_with_fields_intact() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        run_to_payment(&engine, &mut session, &def);

        // Policy-driven return to the submission step: fields survive and
        // the browser action re-dispatches.
        let decision = engine
            .rollback_to(&mut session, &def, "submit")
            .expect("should roll back");
        assert!(matches!(decision, Decision::DispatchBrowserAction(_)));
        assert_eq!(session.current_step, 1);
        assert_eq!(session.field_value("district"), Some("Gasabo"));

        let err = engine.rollback_to(&mut session, &def, "no_such_step").unwrap_err();
        assert!(matches!(err, CoreError::UnexpectedInput(_)));
    }

    #[test]
    fn test_redo_clears_field_and_reasks_it() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        run_to_confirmation(&engine, &mut session, &def);

        let decision = engine
            .next(
                &mut session,
                &def,
                EngineInput::Redo {
                    field: "sector".to_string(),
                },
            )
            .expect("should redo");

        assert_eq!(session.field_value("sector"), None);
        assert_eq!(session.field_value("district"), Some("Gasabo"));
        assert!(
            matches!(decision, Decision::AskField { field, .. } if field.name == "sector"),
        );
        assert_eq!(session.current_step, 0);
    }

    #[test]
    fn test_resume_at_executing_redispatches_same_step() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        collect_location(&engine, &mut session, &def);
        assert_eq!(session.status, SessionStatus::Executing);

        // Crash-resume: no new stimulus, the pending dispatch re-issues.
        let decision = engine
            .next(&mut session, &def, EngineInput::Resume)
            .expect("should resume");
        assert!(
            matches!(decision, Decision::DispatchBrowserAction(spec) if spec.step_id == "submit"),
        );
    }

    #[test]
    fn test_note_retry_increments_step_budget() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        collect_location(&engine, &mut session, &def);

        assert_eq!(
            engine.note_retry(&mut session, "submit", FailureKind::BrowserTimeout),
            1
        );
        assert_eq!(
            engine.note_retry(&mut session, "submit", FailureKind::BrowserActionFailed),
            2
        );
        assert_eq!(session.retry_count("submit"), 2);
    }

    #[test]
    fn test_fail_reports_last_successful_and_failing_step() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        collect_location(&engine, &mut session, &def);

        let failure = Failure::browser("submit", "portal down");
        let outcome = engine
            .fail(&mut session, &def, &failure)
            .expect("should fail the workflow");

        assert!(!outcome.success);
        assert_eq!(outcome.failing_step.as_deref(), Some("submit"));
        assert_eq!(outcome.last_successful_step.as_deref(), Some("location"));
        assert_eq!(session.status, SessionStatus::Failed);
    }

    #[test]
    fn test_engine_rejects_unbound_session() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = Session::new("+250788123456");

        let err = engine
            .next(&mut session, &def, EngineInput::Resume)
            .unwrap_err();
        assert!(matches!(err, CoreError::ServiceNotBound(_)));
    }

    #[test]
    fn test_engine_rejects_closed_session() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        run_to_confirmation(&engine, &mut session, &def);
        engine
            .next(&mut session, &def, EngineInput::Confirmation(true))
            .expect("should complete");

        let err = engine
            .next(&mut session, &def, EngineInput::Resume)
            .unwrap_err();
        assert!(matches!(err, CoreError::SessionClosed(_, _)));
    }

    #[test]
    fn test_result_for_wrong_state_is_rejected() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        ask_field(&engine, &mut session, &def);

        let err = engine
            .next(
                &mut session,
                &def,
                EngineInput::Payment(PaymentResult::confirmed("MOMO-1")),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::UnexpectedInput(_)));
    }

    #[test]
    fn test_step_index_is_monotone_outside_rollback_and_redo() {
        let engine = WorkflowEngine::new();
        let def = test_service();
        let mut session = bound_session(&def);
        run_to_confirmation(&engine, &mut session, &def);
        engine
            .next(&mut session, &def, EngineInput::Confirmation(true))
            .expect("should complete");

        let mut last = 0usize;
        for event in &session.history {
            if let EventBody::StateTransition { step, .. } = &event.body {
                assert!(*step >= last, "step index regressed without a rollback");
                last = *step;
            }
        }
    }

    // =========================================================================
    // Walk helpers
    // =========================================================================

    fn collect_location(engine: &WorkflowEngine, session: &mut Session, def: &ServiceDefinition) {
        ask_field(engine, session, def);
        engine
            .next(
                session,
                def,
                EngineInput::Field {
                    name: "district".to_string(),
                    raw: "Gasabo".to_string(),
                },
            )
            .expect("should accept district");
        engine
            .next(
                session,
                def,
                EngineInput::Field {
                    name: "sector".to_string(),
                    raw: "Jali".to_string(),
                },
            )
            .expect("should accept sector");
    }

    fn run_to_payment(engine: &WorkflowEngine, session: &mut Session, def: &ServiceDefinition) {
        collect_location(engine, session, def);
        engine
            .next(
                session,
                def,
                EngineInput::Browser(ActionResult::ok(serde_json::json!({}))),
            )
            .expect("should accept browser success");
    }

    fn run_to_confirmation(engine: &WorkflowEngine, session: &mut Session, def: &ServiceDefinition) {
        run_to_payment(engine, session, def);
        engine
            .next(
                session,
                def,
                EngineInput::Payment(PaymentResult::confirmed("MOMO-123")),
            )
            .expect("should accept payment");
    }
}
