//! Error recovery policy
//!
//! One pure table consulted by the orchestrator on every failure signal.
//! The policy reads budgets from the session and returns an action; it
//! never mutates state and never performs I/O, so every rule is testable
//! with a session and a failure and nothing else.

use speakwise_contracts::{Failure, FailureKind, Session};

/// What to do about a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    /// Ask the caller to repeat or correct themselves. Consumes no
    /// step-level budget.
    Reprompt { say: String },
    /// Re-issue the failing step's dispatch. Only offered while the
    /// step's budget allows; `attempt` is the retry about to be booked.
    Retry { step_id: String, attempt: u32 },
    /// Return the workflow to an earlier step. Reserved for
    /// catalog-driven policies; the built-in table never produces it,
    /// but orchestrators must handle it.
    RollbackStep { step_id: String },
    /// Stop the workflow. `notify_human` routes an operator alert
    /// before the caller hears the failure message.
    Abort { reason: String, notify_human: bool },
}

/// Built-in recovery rules.
///
/// Browser and site failures retry up to the step budget. Validation
/// failures reprompt (retrying an invalid value unchanged is never
/// useful). Payment failures get a single automatic retry, then abort
/// with a human notification: a charge must never be silently abandoned.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    max_retries: u32,
    payment_auto_retries: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            payment_auto_retries: 1,
        }
    }
}

impl RecoveryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_payment_auto_retries(mut self, payment_auto_retries: u32) -> Self {
        self.payment_auto_retries = payment_auto_retries;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn evaluate(&self, session: &Session, failure: &Failure) -> Recovery {
        match failure.kind {
            FailureKind::SpeechLowConfidence => Recovery::Reprompt {
                say: "Sorry, I did not catch that. Could you say it again?".to_string(),
            },
            FailureKind::FieldValidationFailed => self.reprompt_field(session, failure),
            FailureKind::BrowserActionFailed
            | FailureKind::BrowserTimeout
            | FailureKind::ExternalSiteUnavailable => {
                self.retry_step(session, failure, self.max_retries, false)
            }
            // One automatic retry by default, then a human takes over.
            FailureKind::PaymentFailed => {
                self.retry_step(session, failure, self.payment_auto_retries, true)
            }
        }
    }

    /// Reprompt for the field until its counter passes the retry cap;
    /// a caller who cannot produce a valid value is not kept in a loop.
    fn reprompt_field(&self, session: &Session, failure: &Failure) -> Recovery {
        if let Some(field) = &failure.field {
            if session.field_retry_count(field) > self.max_retries {
                return Recovery::Abort {
                    reason: format!("could not collect a valid value for {field}"),
                    notify_human: false,
                };
            }
        }
        Recovery::Reprompt {
            say: failure.message.clone(),
        }
    }

    fn retry_step(
        &self,
        session: &Session,
        failure: &Failure,
        budget: u32,
        notify_on_abort: bool,
    ) -> Recovery {
        let Some(step_id) = failure.step_id.clone() else {
            // No step to re-issue against.
            return Recovery::Abort {
                reason: failure.message.clone(),
                notify_human: notify_on_abort,
            };
        };
        let used = session.retry_count(&step_id);
        if used < budget {
            Recovery::Retry {
                step_id,
                attempt: used + 1,
            }
        } else {
            Recovery::Abort {
                reason: format!("step {step_id} failed after {used} retries: {}", failure.message),
                notify_human: notify_on_abort,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speakwise_contracts::{EventBody, Session};

    fn session_with_retries(step_id: &str, attempts: u32) -> Session {
        let mut session = Session::new("+250788123456");
        for attempt in 1..=attempts {
            session.record(EventBody::Retry {
                step_id: step_id.to_string(),
                attempt,
                reason: FailureKind::BrowserActionFailed,
            });
        }
        session
    }

    #[test]
    fn test_browser_failure_retries_until_budget_exhausted() {
        let policy = RecoveryPolicy::new().with_max_retries(3);
        let failure = Failure::browser("submit", "portal form rejected");

        for used in 0..3 {
            let session = session_with_retries("submit", used);
            assert_eq!(
                policy.evaluate(&session, &failure),
                Recovery::Retry {
                    step_id: "submit".to_string(),
                    attempt: used + 1,
                }
            );
        }

        let session = session_with_retries("submit", 3);
        assert!(matches!(
            policy.evaluate(&session, &failure),
            Recovery::Abort {
                notify_human: false,
                ..
            }
        ));
    }

    #[test]
    fn test_browser_timeout_shares_the_step_budget() {
        let policy = RecoveryPolicy::new().with_max_retries(2);
        let session = session_with_retries("submit", 2);

        assert!(matches!(
            policy.evaluate(&session, &Failure::browser_timeout("submit")),
            Recovery::Abort { .. }
        ));
    }

    #[test]
    fn test_payment_failure_retries_once_then_notifies_human() {
        let policy = RecoveryPolicy::new();
        let failure = Failure::payment("payment", "charge declined");

        let fresh = Session::new("+250788123456");
        assert_eq!(
            policy.evaluate(&fresh, &failure),
            Recovery::Retry {
                step_id: "payment".to_string(),
                attempt: 1,
            }
        );

        let retried = session_with_retries("payment", 1);
        assert!(matches!(
            policy.evaluate(&retried, &failure),
            Recovery::Abort {
                notify_human: true,
                ..
            }
        ));
    }

    #[test]
    fn test_validation_failure_reprompts_with_the_complaint() {
        let policy = RecoveryPolicy::new();
        let session = Session::new("+250788123456");
        let failure = Failure::validation("location", "district", "the options are Gasabo or Kicukiro");

        assert_eq!(
            policy.evaluate(&session, &failure),
            Recovery::Reprompt {
                say: "the options are Gasabo or Kicukiro".to_string(),
            }
        );
        // Reprompts never touch the step budget.
        assert_eq!(session.retry_count("location"), 0);
    }

    #[test]
    fn test_exhausted_field_reprompts_abort() {
        let policy = RecoveryPolicy::new().with_max_retries(2);
        let mut session = Session::new("+250788123456");
        for _ in 0..3 {
            session.record(EventBody::Error {
                kind: FailureKind::FieldValidationFailed,
                field: Some("district".to_string()),
                message: "the options are Gasabo or Kicukiro".to_string(),
            });
        }

        let failure = Failure::validation("location", "district", "the options are Gasabo or Kicukiro");
        assert!(matches!(
            policy.evaluate(&session, &failure),
            Recovery::Abort {
                notify_human: false,
                ..
            }
        ));
    }

    #[test]
    fn test_low_confidence_always_reprompts() {
        let policy = RecoveryPolicy::new();
        let session = Session::new("+250788123456");

        assert!(matches!(
            policy.evaluate(&session, &Failure::low_confidence(0.31)),
            Recovery::Reprompt { .. }
        ));
    }

    #[test]
    fn test_failure_without_step_aborts_instead_of_retrying() {
        let policy = RecoveryPolicy::new();
        let session = Session::new("+250788123456");
        let failure = Failure::new(FailureKind::ExternalSiteUnavailable, "portal unreachable");

        assert!(matches!(
            policy.evaluate(&session, &failure),
            Recovery::Abort { .. }
        ));
    }
}
