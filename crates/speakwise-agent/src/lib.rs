pub mod config;
pub mod error;
pub mod orchestrator;
pub mod ports;
pub mod prompts;
pub mod router;
pub mod scripted;

// Re-export main types
pub use config::AgentConfig;
pub use error::{AgentError, PortError};
pub use orchestrator::{Orchestrator, TurnOutcome};
pub use router::CallRouter;

// Re-export the collaborator seams
pub use ports::{
    BrowserAutomation, CallControl, Collaborators, IntentExtractor, Notifier,
    NotificationMessage, PaymentGateway, SpeechSynthesizer,
};

// Re-export scripted collaborators for demos and tests
pub use scripted::{scripted_ports, RuleBasedIntentExtractor, ScriptedPorts};
