// Runtime configuration, loaded from environment variables

use std::env;
use std::time::Duration;

use rand::Rng;

use speakwise_core::{RecoveryPolicy, RollbackTarget, WorkflowEngine};

/// Tunables for the call runtime.
///
/// Environment variables:
/// - `SPEAKWISE_MAX_RETRIES`: step retry budget (default: 3)
/// - `SPEAKWISE_CALL_TIMEOUT_SECS`: idle seconds before a silent call is
///   abandoned (default: 300)
/// - `SPEAKWISE_BROWSER_TIMEOUT_SECS`: bound on one browser action
///   (default: 60)
/// - `SPEAKWISE_PAYMENT_TIMEOUT_SECS`: bound on one charge (default: 90)
/// - `SPEAKWISE_CONFIDENCE_THRESHOLD`: transcripts below this are
///   reprompted instead of interpreted (default: 0.6)
/// - `SPEAKWISE_ROLLBACK_STEP`: step id a declined confirmation returns
///   to (default: the nearest preceding collect step)
/// - `SPEAKWISE_OPS_CONTACT`: recipient for human-follow-up notices
///   (default: "operations")
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_retries: u32,
    pub call_timeout: Duration,
    pub browser_timeout: Duration,
    pub payment_timeout: Duration,
    pub confidence_threshold: f32,
    pub rollback_step: Option<String>,
    pub ops_contact: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            call_timeout: Duration::from_secs(300),
            browser_timeout: Duration::from_secs(60),
            payment_timeout: Duration::from_secs(90),
            confidence_threshold: 0.6,
            rollback_step: None,
            ops_contact: "operations".to_string(),
        }
    }
}

impl AgentConfig {
    /// Create configuration from environment variables, falling back to
    /// the documented defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: parse_var("SPEAKWISE_MAX_RETRIES", defaults.max_retries),
            call_timeout: secs_var("SPEAKWISE_CALL_TIMEOUT_SECS", defaults.call_timeout),
            browser_timeout: secs_var("SPEAKWISE_BROWSER_TIMEOUT_SECS", defaults.browser_timeout),
            payment_timeout: secs_var("SPEAKWISE_PAYMENT_TIMEOUT_SECS", defaults.payment_timeout),
            confidence_threshold: parse_var(
                "SPEAKWISE_CONFIDENCE_THRESHOLD",
                defaults.confidence_threshold,
            ),
            rollback_step: env::var("SPEAKWISE_ROLLBACK_STEP")
                .ok()
                .filter(|v| !v.is_empty()),
            ops_contact: env::var("SPEAKWISE_OPS_CONTACT").unwrap_or(defaults.ops_contact),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_browser_timeout(mut self, timeout: Duration) -> Self {
        self.browser_timeout = timeout;
        self
    }

    pub fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_rollback_step(mut self, step_id: impl Into<String>) -> Self {
        self.rollback_step = Some(step_id.into());
        self
    }

    pub fn with_ops_contact(mut self, contact: impl Into<String>) -> Self {
        self.ops_contact = contact.into();
        self
    }

    /// Workflow engine configured from these knobs.
    pub fn engine(&self) -> WorkflowEngine {
        let rollback = match &self.rollback_step {
            Some(step_id) => RollbackTarget::Step(step_id.clone()),
            None => RollbackTarget::PreviousCollect,
        };
        WorkflowEngine::new()
            .with_max_retries(self.max_retries)
            .with_rollback(rollback)
    }

    /// Recovery policy configured from these knobs.
    pub fn recovery(&self) -> RecoveryPolicy {
        RecoveryPolicy::new().with_max_retries(self.max_retries)
    }

    /// Delay before re-dispatching a failed step (1-based attempt).
    ///
    /// Doubles from half a second and caps at five: the caller is on the
    /// line, so the backoff stays conversational. Ten percent jitter
    /// spreads simultaneous retries against the same portal.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = 0.5 * f64::from(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = base.min(5.0);
        let jitter_range = capped * 0.1;
        let mut rng = rand::thread_rng();
        let jittered = capped + rng.gen_range(-jitter_range..=jitter_range);
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn secs_var(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
