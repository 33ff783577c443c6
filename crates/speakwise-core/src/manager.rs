//! Session manager
//!
//! Owns the canonical copy of every live session and enforces the
//! single-writer discipline: all mutation goes through [`SessionManager::update`],
//! which serializes mutators behind a per-session async mutex. Callers get
//! snapshots (clones), never references into the live map.
//!
//! Persistence policy: a snapshot is written through the [`SessionStore`]
//! whenever a mutation changes the status, the step index or the collected
//! fields, so a crash loses at most the in-flight turn.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use speakwise_contracts::{EventBody, Session, SessionStatus, SessionSummary};

use crate::catalog::ServiceCatalog;
use crate::error::CoreError;
use crate::store::SessionStore;

pub struct SessionManager {
    catalog: Arc<ServiceCatalog>,
    store: Arc<dyn SessionStore>,
    live: DashMap<Uuid, Arc<Mutex<Session>>>,
}

impl SessionManager {
    pub fn new(catalog: Arc<ServiceCatalog>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            catalog,
            store,
            live: DashMap::new(),
        }
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    /// Open a session for an answered call whose service intent is not
    /// yet known. The session stays STARTED until a service is bound.
    #[instrument(skip(self, caller))]
    pub async fn open(&self, caller: impl Into<String>) -> Result<Session, CoreError> {
        let session = Session::new(caller);
        let snapshot = session.clone();
        self.store.save(&snapshot).await?;
        self.live
            .insert(session.id, Arc::new(Mutex::new(session)));
        info!(session_id = %snapshot.id, caller = %snapshot.caller, "session opened");
        Ok(snapshot)
    }

    /// Open a session already bound to a service. Fails with
    /// `UnknownService` when the id is absent from the catalog or disabled.
    #[instrument(skip(self, caller))]
    pub async fn create(
        &self,
        caller: impl Into<String>,
        service_id: &str,
    ) -> Result<Session, CoreError> {
        let definition = self.catalog.get(service_id)?;
        let opened = self.open(caller).await?;
        self.bind_service(opened.id, &definition.id).await
    }

    /// Bind a STARTED session to a service once intent is resolved.
    #[instrument(skip(self))]
    pub async fn bind_service(
        &self,
        session_id: Uuid,
        service_id: &str,
    ) -> Result<Session, CoreError> {
        let definition = self.catalog.get(service_id)?;
        self.update(session_id, |session| {
            if let Some(bound) = &session.service_id {
                if bound != &definition.id {
                    return Err(CoreError::ServiceMismatch {
                        bound: bound.clone(),
                        given: definition.id.clone(),
                    });
                }
                return Ok(session.clone());
            }
            session.record(EventBody::ServiceSelected {
                service_id: definition.id.clone(),
            });
            Ok(session.clone())
        })
        .await
    }

    /// Snapshot of a session: the live copy when the call is active,
    /// otherwise whatever the store has. Live promotion happens for
    /// non-terminal stored sessions so a restarted process can resume.
    #[instrument(skip(self))]
    pub async fn get(&self, session_id: Uuid) -> Result<Session, CoreError> {
        if let Some(handle) = self.handle(session_id) {
            return Ok(handle.lock().await.clone());
        }
        let stored = self
            .store
            .load(session_id)
            .await?
            .ok_or(CoreError::SessionNotFound(session_id))?;
        if !stored.is_terminal() {
            debug!(session_id = %session_id, "promoting stored session to live");
            self.live
                .entry(session_id)
                .or_insert_with(|| Arc::new(Mutex::new(stored.clone())));
        }
        Ok(stored)
    }

    /// Apply one mutation under the session's writer lock.
    ///
    /// The mutator records events on the session; this method handles
    /// locking and the snapshot policy. Returns whatever the mutator
    /// returns. Terminal sessions reject mutation.
    #[instrument(skip(self, mutator))]
    pub async fn update<T>(
        &self,
        session_id: Uuid,
        mutator: impl FnOnce(&mut Session) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let handle = self.handle_or_promote(session_id).await?;
        let mut session = handle.lock().await;
        if session.is_terminal() {
            return Err(CoreError::SessionClosed(session.id, session.status));
        }

        let before = (
            session.status,
            session.current_step,
            session.service_id.clone(),
            session.fields.clone(),
        );
        let out = mutator(&mut session)?;
        let dirty = before
            != (
                session.status,
                session.current_step,
                session.service_id.clone(),
                session.fields.clone(),
            );
        if dirty {
            self.store.save(&session).await?;
            if let Some(event) = session.history.last() {
                debug!(session_id = %session.id, event = event.kind(), "snapshot written");
            }
        }
        Ok(out)
    }

    /// Force a durability point regardless of what changed.
    #[instrument(skip(self))]
    pub async fn snapshot(&self, session_id: Uuid) -> Result<(), CoreError> {
        let handle = self.handle_or_promote(session_id).await?;
        let session = handle.lock().await;
        self.store.save(&session).await?;
        Ok(())
    }

    /// Terminate a session. Records the closing transition, flushes the
    /// final state and evicts the live entry; afterwards the session is
    /// read-only through [`SessionManager::get`].
    #[instrument(skip(self))]
    pub async fn close(
        &self,
        session_id: Uuid,
        final_status: SessionStatus,
    ) -> Result<Session, CoreError> {
        if !final_status.is_terminal() {
            return Err(CoreError::InvalidTransition {
                from: final_status,
                to: final_status,
            });
        }
        let handle = self.handle_or_promote(session_id).await?;
        let mut session = handle.lock().await;

        if session.status != final_status {
            if session.is_terminal() {
                return Err(CoreError::SessionClosed(session.id, session.status));
            }
            let from = session.status;
            let step = session.current_step;
            session.record(EventBody::StateTransition {
                from,
                to: final_status,
                step,
            });
        }
        self.store.save(&session).await?;
        let finalized = session.clone();
        drop(session);
        self.live.remove(&session_id);
        info!(session_id = %session_id, status = %final_status, "session closed");
        Ok(finalized)
    }

    /// Dashboard rows for every live session, oldest call first.
    pub async fn list_active(&self) -> Vec<SessionSummary> {
        // Collect handles first: a dashmap guard must not be held across
        // an await point.
        let handles: Vec<Arc<Mutex<Session>>> =
            self.live.iter().map(|entry| entry.value().clone()).collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.lock().await.summary());
        }
        // v7 ids are time-ordered, so this is oldest call first.
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    pub fn active_count(&self) -> usize {
        self.live.len()
    }

    fn handle(&self, session_id: Uuid) -> Option<Arc<Mutex<Session>>> {
        self.live.get(&session_id).map(|entry| entry.value().clone())
    }

    async fn handle_or_promote(
        &self,
        session_id: Uuid,
    ) -> Result<Arc<Mutex<Session>>, CoreError> {
        if let Some(handle) = self.handle(session_id) {
            return Ok(handle);
        }
        let stored = self
            .store
            .load(session_id)
            .await?
            .ok_or(CoreError::SessionNotFound(session_id))?;
        // Closed sessions never rejoin the live map; callers observe the
        // terminal state through this detached handle and reject the
        // mutation themselves.
        if stored.is_terminal() {
            return Ok(Arc::new(Mutex::new(stored)));
        }
        Ok(self
            .live
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(stored)))
            .value()
            .clone())
    }
}
