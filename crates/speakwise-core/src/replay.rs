//! Crash recovery by event replay
//!
//! Session state is a pure fold over the event log (`Session::apply`), so
//! reconstructing a session is replaying its history over a time-zero
//! baseline. Live mutation and replay share the fold; they cannot drift
//! apart.

use std::collections::{BTreeMap, BTreeSet};

use speakwise_contracts::{Session, SessionEvent, SessionStatus};

/// The time-zero twin of a session: same identity, state as it was the
/// instant the call was answered, before any event.
pub fn initial_state(of: &Session) -> Session {
    Session {
        id: of.id,
        caller: of.caller.clone(),
        service_id: None,
        current_step: 0,
        fields: BTreeMap::new(),
        status: SessionStatus::Started,
        retry_counts: BTreeMap::new(),
        field_retries: BTreeMap::new(),
        confirmed_payments: BTreeSet::new(),
        history: Vec::new(),
        last_browser_result: None,
        created_at: of.created_at,
        updated_at: of.created_at,
    }
}

/// Fold a history over a baseline. Events are applied *and* appended, so
/// the result of replaying a full history is equal to the live session,
/// history included.
pub fn replay(baseline: &Session, events: &[SessionEvent]) -> Session {
    let mut session = baseline.clone();
    for event in events {
        session.apply(event);
        session.history.push(event.clone());
    }
    session
}

/// True when the session's own history reproduces its state. A false
/// return means an event was lost or state was mutated outside `record`.
pub fn verify(session: &Session) -> bool {
    replay(&initial_state(session), &session.history) == *session
}
