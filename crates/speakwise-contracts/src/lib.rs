// Domain contracts for SpeakWise
// Service definitions, per-call sessions, the session event log, action
// specs crossing the browser/payment seams, and caller-turn types.
//
// Everything here is plain serde data; runtime behavior lives in
// speakwise-core and speakwise-agent.

pub mod action;
pub mod event;
pub mod failure;
pub mod service;
pub mod session;
pub mod turn;

pub use action::*;
pub use event::*;
pub use failure::*;
pub use service::*;
pub use session::*;
pub use turn::*;
