// Spoken-line and notification templates
//
// Decision: Prompts live in one module as plain functions over catalog and
// session data, so the orchestrator stays free of string literals and tests
// can assert on wording in a single place.

use speakwise_contracts::{Fee, Outcome, ServiceDefinition};
use speakwise_core::ServiceCatalog;

use crate::ports::NotificationMessage;

/// Opening line for a fresh call, including the service menu.
pub fn greeting(catalog: &ServiceCatalog) -> String {
    format!(
        "Welcome to SpeakWise. How can I assist you today? {}",
        service_menu(catalog)
    )
}

/// Spoken list of services the caller can pick from.
pub fn service_menu(catalog: &ServiceCatalog) -> String {
    let names: Vec<&str> = catalog
        .enabled()
        .map(|def| def.display_name.as_str())
        .collect();
    match names.as_slice() {
        [] => "No services are available right now.".to_string(),
        [only] => format!("I can help you with {only}. Shall we begin?"),
        [init @ .., last] => format!(
            "I can help you with {} or {last}. Which one would you like?",
            init.join(", ")
        ),
    }
}

/// Acknowledgement once a service has been selected.
pub fn service_bound(def: &ServiceDefinition) -> String {
    format!("Alright, {}. Let's get started.", def.display_name)
}

/// Reply when the caller asks for a new service mid-transaction.
pub fn already_working(def: &ServiceDefinition) -> String {
    format!(
        "We're already working on your {} request. Let's finish that first.",
        def.display_name
    )
}

/// Read-back of collected fields, led by the confirm step's own prompt.
pub fn confirmation(step_prompt: &str, summary: &[(String, String)]) -> String {
    let readback: Vec<String> = summary
        .iter()
        .map(|(name, value)| format!("{} is {value}", name.replace('_', " ")))
        .collect();
    if readback.is_empty() {
        format!("{step_prompt} Shall I go ahead?")
    } else {
        format!("{step_prompt} I have {}. Shall I go ahead?", readback.join(", "))
    }
}

/// Fee announcement before the gateway is charged.
pub fn payment_announcement(step_prompt: &str, fee: &Fee) -> String {
    format!(
        "{step_prompt} The service fee is {} {}.",
        format_amount(fee.amount),
        fee.currency
    )
}

/// Reprompt when the transcript was too uncertain to act on.
pub fn clarify() -> String {
    "Sorry, I didn't catch that. Could you say it again?".to_string()
}

/// Reply to input that arrives while no answer is expected.
pub fn hold_on() -> String {
    "One moment please, I'm still working on it.".to_string()
}

/// Closing line after the caller cancels.
pub fn cancelled_goodbye() -> String {
    "Alright, I've cancelled your request. Thank you for calling SpeakWise. Goodbye.".to_string()
}

/// Closing line after the idle timer expires.
pub fn timeout_goodbye() -> String {
    "I haven't heard from you in a while, so I'll end the call here. \
     You're welcome to call back any time. Goodbye."
        .to_string()
}

/// Final spoken line for a finished session, success or failure.
pub fn outcome_line(outcome: &Outcome, def: &ServiceDefinition) -> String {
    if outcome.success {
        let mut line = format!("Good news: your {} request is complete.", def.display_name);
        if let Some(reference) = &outcome.tracking_reference {
            line.push_str(&format!(" Your tracking reference is {reference}."));
        }
        if def.requires_payment {
            line.push_str(" I've sent the receipt to your phone by SMS.");
        }
        line.push_str(" Thank you for calling SpeakWise. Goodbye.");
        line
    } else {
        // The outcome message already names the service and the reason.
        format!(
            "I'm sorry. {}. Please try again later. Goodbye.",
            outcome.message.trim_end_matches('.')
        )
    }
}

/// Body text for an outbound notification.
pub fn render_notification(message: &NotificationMessage) -> String {
    match message {
        NotificationMessage::TaskComplete {
            transaction_id,
            date,
            amount,
            currency,
        } => format!(
            "Your SpeakWise transaction {transaction_id} on {date} for {} {currency} \
             completed successfully. Keep this reference for your records.",
            format_amount(*amount)
        ),
        NotificationMessage::FollowUpRequired {
            session_id,
            caller,
            reason,
        } => format!(
            "Follow-up required for session {session_id} (caller {caller}): {reason}"
        ),
    }
}

/// Thousands-separated rendering, so fees read naturally over the phone.
fn format_amount(amount: u32) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use speakwise_core::ServiceCatalog;

    #[test]
    fn test_greeting_lists_builtin_services() {
        let catalog = ServiceCatalog::builtin();
        let line = greeting(&catalog);
        assert!(line.starts_with("Welcome to SpeakWise."));
        assert!(line.contains("Birth Certificate"));
        assert!(line.contains("Driving License Exam"));
    }

    #[test]
    fn test_menu_handles_single_service() {
        let catalog = ServiceCatalog::new();
        let catalog = {
            let mut c = catalog;
            c.register(
                ServiceDefinition::new("svc", "Test Service", "TS")
                    .with_step(speakwise_contracts::Step::confirm("confirm", "Go?")),
            )
            .expect("should register test service");
            c
        };
        assert_eq!(
            service_menu(&catalog),
            "I can help you with Test Service. Shall we begin?"
        );
    }

    #[test]
    fn test_confirmation_reads_fields_back() {
        let summary = vec![
            ("district".to_string(), "Gasabo".to_string()),
            ("sector".to_string(), "Jali".to_string()),
        ];
        let line = confirmation("Please confirm the details.", &summary);
        assert_eq!(
            line,
            "Please confirm the details. I have district is Gasabo, sector is Jali. Shall I go ahead?"
        );
    }

    #[test]
    fn test_payment_announcement_formats_amount() {
        let line = payment_announcement("I will start the payment now.", &Fee::rwf(5000));
        assert_eq!(
            line,
            "I will start the payment now. The service fee is 5,000 RWF."
        );
    }

    #[test]
    fn test_outcome_line_success_includes_reference() {
        let def = ServiceDefinition::new("birth_certificate", "Birth Certificate", "BC")
            .with_fee(Fee::rwf(5000));
        let outcome = Outcome {
            success: true,
            service_id: "birth_certificate".to_string(),
            last_successful_step: Some("confirm".to_string()),
            failing_step: None,
            tracking_reference: Some("BC-20250114093042".to_string()),
            message: "completed".to_string(),
        };
        let line = outcome_line(&outcome, &def);
        assert!(line.contains("BC-20250114093042"));
        assert!(line.contains("SMS"));
    }

    #[test]
    fn test_outcome_line_failure_carries_reason() {
        let def = ServiceDefinition::new("birth_certificate", "Birth Certificate", "BC");
        let outcome = Outcome {
            success: false,
            service_id: "birth_certificate".to_string(),
            last_successful_step: None,
            failing_step: Some("submit".to_string()),
            tracking_reference: None,
            message: "The payment could not be processed.".to_string(),
        };
        let line = outcome_line(&outcome, &def);
        assert!(line.contains("I'm sorry"));
        assert!(line.contains("The payment could not be processed."));
    }

    #[test]
    fn test_task_complete_notification_body() {
        let body = render_notification(&NotificationMessage::TaskComplete {
            transaction_id: "BC-20250114093042".to_string(),
            date: "2025-01-14".to_string(),
            amount: 5000,
            currency: "RWF".to_string(),
        });
        assert!(body.contains("BC-20250114093042"));
        assert!(body.contains("5,000 RWF"));
    }

    #[test]
    fn test_format_amount_groups_thousands() {
        assert_eq!(format_amount(0), "0");
        assert_eq!(format_amount(999), "999");
        assert_eq!(format_amount(10000), "10,000");
        assert_eq!(format_amount(1234567), "1,234,567");
    }
}
