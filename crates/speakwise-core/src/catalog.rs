//! Service catalog
//!
//! Ordered registry of the services a caller can ask for. Workflows are
//! catalog data: adding a service or reshaping its steps never touches the
//! engine. Catalogs can also be deserialized straight from configuration
//! (a `Vec<ServiceDefinition>` in JSON).

use speakwise_contracts::{ActionKind, FieldSpec, FieldValidator, Fee, ServiceDefinition, Step};

use crate::error::CoreError;

/// Ordered lookup of service definitions by id.
#[derive(Debug, Default)]
pub struct ServiceCatalog {
    services: Vec<ServiceDefinition>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the services shipped in-tree.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.services.push(birth_certificate());
        catalog.services.push(driving_license_exam());
        catalog
    }

    pub fn from_definitions(defs: Vec<ServiceDefinition>) -> Result<Self, CoreError> {
        let mut catalog = Self::new();
        for def in defs {
            catalog.register(def)?;
        }
        Ok(catalog)
    }

    /// Add or replace a definition, rejecting ones the engine cannot run.
    pub fn register(&mut self, def: ServiceDefinition) -> Result<(), CoreError> {
        if def.steps.is_empty() {
            return Err(CoreError::InvalidDefinition(
                def.id.clone(),
                "a service needs at least one step".to_string(),
            ));
        }
        let has_payment_step = def.steps.iter().any(|s| s.action == ActionKind::Payment);
        if has_payment_step && def.fee.is_none() {
            return Err(CoreError::InvalidDefinition(
                def.id.clone(),
                "payment step declared without a fee".to_string(),
            ));
        }
        match self.services.iter_mut().find(|s| s.id == def.id) {
            Some(existing) => *existing = def,
            None => self.services.push(def),
        }
        Ok(())
    }

    /// Look up an enabled service. Missing and disabled entries are both
    /// `UnknownService` to callers.
    pub fn get(&self, id: &str) -> Result<&ServiceDefinition, CoreError> {
        self.services
            .iter()
            .find(|s| s.id == id && s.enabled)
            .ok_or_else(|| CoreError::UnknownService(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_ok()
    }

    /// Enabled services in catalog order (the spoken menu order).
    pub fn enabled(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.iter().filter(|s| s.enabled)
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.enabled().map(|s| s.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Birth certificate application on the Irembo portal (5000 RWF).
pub fn birth_certificate() -> ServiceDefinition {
    ServiceDefinition::new("birth_certificate", "Birth Certificate", "BC")
        .with_step(Step::collect(
            "applicant",
            "I need a few details about the applicant.",
            vec![
                FieldSpec::new(
                    "for_self",
                    "Is the certificate for yourself?",
                    FieldValidator::YesNo,
                ),
                FieldSpec::new(
                    "national_id",
                    "What is the national ID number of the person the certificate is for?",
                    FieldValidator::Digits { len: 16 },
                ),
            ],
        ))
        .with_step(Step::collect(
            "location",
            "Now the issuing office.",
            vec![
                FieldSpec::new(
                    "district",
                    "Which district should issue the certificate, Gasabo or Kicukiro?",
                    FieldValidator::OneOf {
                        choices: vec!["Gasabo".to_string(), "Kicukiro".to_string()],
                    },
                ),
                FieldSpec::new(
                    "sector",
                    "Which sector office, Jali or Gisozi?",
                    FieldValidator::OneOf {
                        choices: vec!["Jali".to_string(), "Gisozi".to_string()],
                    },
                ),
                FieldSpec::new(
                    "reason",
                    "What is the certificate for? For example education, employment or travel.",
                    FieldValidator::NonEmpty,
                ),
            ],
        ))
        .with_step(Step::browser(
            "submit",
            "I am submitting your application to the portal now. One moment please.",
        ))
        .with_step(Step::payment(
            "payment",
            "I will now start the payment for the certificate fee.",
        ))
        .with_step(Step::confirm(
            "confirm",
            "Please confirm the application details.",
        ))
        .with_fee(Fee::rwf(5000))
}

/// Driving license exam registration on the Irembo portal (10000 RWF).
pub fn driving_license_exam() -> ServiceDefinition {
    ServiceDefinition::new(
        "driving_license_exam",
        "Driving License Exam Registration",
        "DL",
    )
    .with_step(Step::collect(
        "exam",
        "Let's set up your exam registration.",
        vec![
            FieldSpec::new(
                "test_type",
                "Is this a new registration or a rescheduling?",
                FieldValidator::OneOf {
                    choices: vec!["registration".to_string(), "rescheduling".to_string()],
                },
            ),
            FieldSpec::new(
                "test_language",
                "Would you like to take the exam in English or Kinyarwanda?",
                FieldValidator::OneOf {
                    choices: vec!["English".to_string(), "Kinyarwanda".to_string()],
                },
            ),
        ],
    ))
    .with_step(Step::collect(
        "location",
        "Now the exam location and date.",
        vec![
            FieldSpec::new(
                "district",
                "In which district would you like to take the exam, Gasabo or Kicukiro?",
                FieldValidator::OneOf {
                    choices: vec!["Gasabo".to_string(), "Kicukiro".to_string()],
                },
            ),
            FieldSpec::new(
                "preferred_date",
                "What date would you prefer? Say it as year, month and day.",
                FieldValidator::Date,
            ),
        ],
    ))
    .with_step(Step::browser(
        "submit",
        "I am registering you for the exam now. One moment please.",
    ))
    .with_step(Step::payment(
        "payment",
        "I will now start the payment for the registration fee.",
    ))
    .with_step(Step::confirm(
        "confirm",
        "Please confirm your registration details.",
    ))
    .with_fee(Fee::rwf(10000))
}
