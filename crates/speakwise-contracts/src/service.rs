// Service definitions: what a government service asks for and in which order
//
// A service is an ordered list of steps interpreted by the workflow engine.
// Adding a new service (or reshaping an existing one) is catalog data, not
// engine code.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// What executing a step means to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Ask the caller for the step's fields, one at a time.
    CollectInfo,
    /// Drive the portal through the browser automation collaborator.
    BrowserAction,
    /// Charge the service fee.
    Payment,
    /// Read the collected data back and wait for a yes/no.
    Confirm,
    /// Closing step: speak the outcome and end the call.
    Terminal,
}

/// Validation rule attached to a field.
///
/// Values arrive as recognized speech, so validators both check and
/// normalize: `validate` returns the canonical value to store, or a
/// speakable complaint for the reprompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldValidator {
    NonEmpty,
    OneOf { choices: Vec<String> },
    Digits { len: usize },
    /// YYYY-MM-DD calendar date.
    Date,
    YesNo,
    Phone,
}

impl FieldValidator {
    pub fn validate(&self, raw: &str) -> Result<String, String> {
        let value = raw.trim();
        match self {
            Self::NonEmpty => {
                if value.is_empty() {
                    Err("I did not catch a value".to_string())
                } else {
                    Ok(value.to_string())
                }
            }
            Self::OneOf { choices } => choices
                .iter()
                .find(|c| c.eq_ignore_ascii_case(value))
                .cloned()
                .ok_or_else(|| format!("the options are {}", choices.join(" or "))),
            Self::Digits { len } => {
                let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.len() == *len && value.chars().all(|c| !c.is_alphabetic()) {
                    Ok(digits)
                } else {
                    Err(format!("that should be a {len} digit number"))
                }
            }
            Self::Date => match chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d") {
                Ok(date) => Ok(date.format("%Y-%m-%d").to_string()),
                Err(_) => Err("I need a date as year, month and day".to_string()),
            },
            Self::YesNo => match value.to_ascii_lowercase().as_str() {
                "yes" | "yeah" | "yep" | "correct" | "true" => Ok("yes".to_string()),
                "no" | "nope" | "false" => Ok("no".to_string()),
                _ => Err("please answer yes or no".to_string()),
            },
            Self::Phone => {
                let digits: String = value
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '+')
                    .collect();
                let digit_count = digits.chars().filter(|c| c.is_ascii_digit()).count();
                if (9..=13).contains(&digit_count) {
                    Ok(digits)
                } else {
                    Err("that does not sound like a phone number".to_string())
                }
            }
        }
    }
}

/// One piece of information a step collects from the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Question spoken when asking for this field.
    pub prompt: String,
    pub validator: FieldValidator,
}

impl FieldSpec {
    pub fn new(
        name: impl Into<String>,
        prompt: impl Into<String>,
        validator: FieldValidator,
    ) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            validator,
        }
    }
}

/// One step of a service workflow.
///
/// Field declaration order is the collection order: the engine always asks
/// for the first missing field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    /// Spoken when the step begins (browser/payment/confirm narration).
    pub prompt: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    pub action: ActionKind,
}

impl Step {
    pub fn collect(id: impl Into<String>, prompt: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            fields,
            action: ActionKind::CollectInfo,
        }
    }

    pub fn browser(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            fields: Vec::new(),
            action: ActionKind::BrowserAction,
        }
    }

    pub fn payment(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            fields: Vec::new(),
            action: ActionKind::Payment,
        }
    }

    pub fn confirm(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            fields: Vec::new(),
            action: ActionKind::Confirm,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// First declared field the caller has not answered yet.
    pub fn first_missing<'a>(&'a self, collected: &BTreeMap<String, String>) -> Option<&'a FieldSpec> {
        self.fields.iter().find(|f| !collected.contains_key(&f.name))
    }

    pub fn is_complete(&self, collected: &BTreeMap<String, String>) -> bool {
        self.first_missing(collected).is_none()
    }
}

/// Service fee, charged at the payment step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub amount: u32,
    pub currency: String,
}

impl Fee {
    pub fn rwf(amount: u32) -> Self {
        Self {
            amount,
            currency: "RWF".to_string(),
        }
    }
}

impl fmt::Display for Fee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// A complete service workflow as catalog data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: String,
    pub display_name: String,
    /// Short code used to mint tracking references ("BC" -> BC-20250114093042).
    pub reference_prefix: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub requires_payment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<Fee>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ServiceDefinition {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        reference_prefix: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            reference_prefix: reference_prefix.into(),
            steps: Vec::new(),
            requires_payment: false,
            fee: None,
            enabled: true,
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_fee(mut self, fee: Fee) -> Self {
        self.requires_payment = true;
        self.fee = Some(fee);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn step_by_id(&self, id: &str) -> Option<(usize, &Step)> {
        self.steps.iter().enumerate().find(|(_, s)| s.id == id)
    }

    pub fn is_last_step(&self, index: usize) -> bool {
        index + 1 >= self.steps.len()
    }

    /// True when some step of this service declares the field.
    pub fn declares_field(&self, name: &str) -> bool {
        self.steps.iter().any(|s| s.field(name).is_some())
    }

    /// Step declaring the field, for redo requests.
    pub fn step_declaring(&self, field: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.field(field).is_some())
    }

    /// Every field name the service collects, in declaration order.
    pub fn required_field_names(&self) -> Vec<&str> {
        self.steps
            .iter()
            .flat_map(|s| s.fields.iter().map(|f| f.name.as_str()))
            .collect()
    }

    /// Nearest collect step at or before `index`; the default rollback
    /// target for a declined confirmation.
    pub fn last_collect_step_before(&self, index: usize) -> Option<usize> {
        self.steps[..index.min(self.steps.len())]
            .iter()
            .rposition(|s| s.action == ActionKind::CollectInfo)
    }
}
