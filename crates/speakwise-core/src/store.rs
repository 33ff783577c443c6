//! Session persistence boundary
//!
//! The durable engine behind `save`/`load` is an external collaborator;
//! the core only depends on this trait. Snapshots are whole sessions
//! (history included), so the latest snapshot is always enough to resume
//! a call after a crash.

use async_trait::async_trait;
use speakwise_contracts::Session;
use uuid::Uuid;

/// Errors from session storage implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying storage backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Snapshot could not be encoded or decoded.
    #[error("snapshot serialization error: {0}")]
    Serialization(String),
}

/// Storage interface for session snapshots.
///
/// Implementations can persist to a database, a file, or keep snapshots in
/// memory for tests and single-process deployments. `save` overwrites the
/// previous snapshot for the session id.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Persist the current snapshot of a session.
    async fn save(&self, session: &Session) -> Result<(), StoreError>;

    /// Load the latest snapshot, if one exists.
    async fn load(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    /// All stored snapshots, oldest call first.
    async fn list(&self) -> Result<Vec<Session>, StoreError>;
}
