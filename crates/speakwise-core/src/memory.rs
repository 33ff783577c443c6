//! In-memory session store
//!
//! The default store for tests, examples and single-process deployments.
//! Everything is lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use speakwise_contracts::Session;
use uuid::Uuid;

use crate::store::{SessionStore, StoreError};

/// Thread-safe in-memory implementation of [`SessionStore`].
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Drop all snapshots (test helper).
    pub fn clear(&self) {
        self.sessions.write().clear();
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions.write().insert(session.id, session.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_overwrites_previous_snapshot() {
        tokio_test::block_on(async {
            let store = InMemorySessionStore::new();
            let mut session = Session::new("+250788123456");

            store.save(&session).await.expect("should save");
            assert_eq!(store.len(), 1);

            session.record(speakwise_contracts::EventBody::FieldCollected {
                field: "district".to_string(),
                value: "Gasabo".to_string(),
            });
            store.save(&session).await.expect("should save");
            assert_eq!(store.len(), 1);

            let loaded = store
                .load(session.id)
                .await
                .expect("should load")
                .expect("snapshot should exist");
            assert_eq!(loaded.field_value("district"), Some("Gasabo"));
        });
    }

    #[test]
    fn test_load_missing_session_returns_none() {
        tokio_test::block_on(async {
            let store = InMemorySessionStore::new();
            let loaded = store.load(Uuid::now_v7()).await.expect("should load");
            assert!(loaded.is_none());
        });
    }

    #[test]
    fn test_list_orders_by_call_start() {
        tokio_test::block_on(async {
            let store = InMemorySessionStore::new();
            let first = Session::new("+250788000001");
            let second = Session::new("+250788000002");

            // Insert out of order; list should come back oldest first.
            store.save(&second).await.expect("should save");
            store.save(&first).await.expect("should save");

            let all = store.list().await.expect("should list");
            assert_eq!(all.len(), 2);
            assert!(all[0].created_at <= all[1].created_at);
        });
    }
}
