//! # SpeakWise Core
//!
//! Session orchestration for voice-driven government services: the state
//! that survives a call, the engine that decides what happens next, and
//! the policy that decides what a failure costs.
//!
//! ## Features
//!
//! - **Event-sourced sessions**: every mutation is an appended event, so
//!   a session replays exactly after a crash
//! - **Catalog-driven workflows**: services are data; one engine interprets
//!   birth certificates and driving license exams alike
//! - **Single-writer sessions**: turns and action results for one call are
//!   serialized; concurrent calls never contend
//! - **Centralized recovery**: retry, reprompt and abort rules live in one
//!   pure table, testable without a call stack
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SessionManager                        │
//! │  (owns live sessions, single-writer updates, snapshots)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkflowEngine                        │
//! │  (pure stepper: session + definition + input → Decision)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ServiceCatalog │ RecoveryPolicy            │
//! │  (workflow data, read-only)     (failure → recovery action) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use speakwise_core::prelude::*;
//!
//! let catalog = Arc::new(ServiceCatalog::builtin());
//! let store = Arc::new(InMemorySessionStore::new());
//! let manager = SessionManager::new(catalog.clone(), store);
//! let engine = WorkflowEngine::new();
//!
//! let session = manager.create("+250788123456", "birth_certificate").await?;
//! let decision = manager
//!     .update(session.id, |s| {
//!         let def = catalog.get("birth_certificate")?;
//!         engine.next(s, def, EngineInput::Resume)
//!     })
//!     .await?;
//! // decision == Decision::AskField { .. }
//! ```

pub mod catalog;
pub mod error;
pub mod manager;
pub mod memory;
pub mod recovery;
pub mod replay;
pub mod store;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::catalog::ServiceCatalog;
    pub use crate::error::CoreError;
    pub use crate::manager::SessionManager;
    pub use crate::memory::InMemorySessionStore;
    pub use crate::recovery::{Recovery, RecoveryPolicy};
    pub use crate::replay::{initial_state, replay, verify};
    pub use crate::store::{SessionStore, StoreError};
    pub use crate::workflow::{Decision, EngineInput, RollbackTarget, WorkflowEngine};
    pub use speakwise_contracts::{
        ActionKind, ActionResult, ActionSpec, EventBody, Failure, FailureKind, Outcome,
        PaymentResult, ServiceDefinition, Session, SessionEvent, SessionStatus, Step,
    };
}

// Re-export key types at crate root
pub use catalog::ServiceCatalog;
pub use error::CoreError;
pub use manager::SessionManager;
pub use memory::InMemorySessionStore;
pub use recovery::{Recovery, RecoveryPolicy};
pub use replay::{initial_state, replay, verify};
pub use store::{SessionStore, StoreError};
pub use workflow::{mint_reference, Decision, EngineInput, RollbackTarget, WorkflowEngine};
