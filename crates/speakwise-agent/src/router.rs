// Call router
//
// Telephony events come in here. Each answered call gets a dedicated
// tokio task with an inbox; turns for one session are therefore applied
// strictly in arrival order while separate calls proceed in parallel.
//
// Decision: The task owns the whole call lifecycle (greeting, turns,
// idle timeout, teardown). The router only spawns, forwards and cancels.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use speakwise_contracts::Transcript;
use speakwise_core::SessionManager;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::orchestrator::{Orchestrator, TurnOutcome};

const TURN_INBOX_DEPTH: usize = 16;

struct CallHandle {
    inbox: mpsc::Sender<Transcript>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct CallRouter {
    orchestrator: Arc<Orchestrator>,
    manager: Arc<SessionManager>,
    config: AgentConfig,
    calls: Arc<DashMap<Uuid, CallHandle>>,
}

impl CallRouter {
    pub fn new(orchestrator: Arc<Orchestrator>, config: AgentConfig) -> Self {
        let manager = orchestrator.manager().clone();
        Self {
            orchestrator,
            manager,
            config,
            calls: Arc::new(DashMap::new()),
        }
    }

    /// Answer a call: open a session and spawn its task.
    pub async fn on_call_started(&self, caller: &str) -> Result<Uuid, AgentError> {
        let session = self.manager.open(caller).await?;
        let session_id = session.id;

        let (inbox, turns) = mpsc::channel(TURN_INBOX_DEPTH);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(session_task(
            self.orchestrator.clone(),
            self.calls.clone(),
            session_id,
            turns,
            cancel.clone(),
            self.config.call_timeout,
        ));
        self.calls.insert(
            session_id,
            CallHandle {
                inbox,
                cancel,
                task,
            },
        );
        info!(session_id = %session_id, caller, active = self.calls.len(), "call started");
        Ok(session_id)
    }

    /// Queue one recognized turn for its session task.
    pub async fn on_turn_received(
        &self,
        session_id: Uuid,
        transcript: Transcript,
    ) -> Result<(), AgentError> {
        // Clone the sender out of the map entry before awaiting on it.
        let inbox = self
            .calls
            .get(&session_id)
            .map(|entry| entry.inbox.clone())
            .ok_or(AgentError::CallGone(session_id))?;
        inbox
            .send(transcript)
            .await
            .map_err(|_| AgentError::CallGone(session_id))
    }

    /// Telephony hangup: cancel the task and wait for it to finish
    /// closing the session.
    pub async fn on_call_ended(&self, session_id: Uuid) {
        match self.calls.remove(&session_id) {
            Some((_, handle)) => {
                handle.cancel.cancel();
                if let Err(error) = handle.task.await {
                    error!(session_id = %session_id, %error, "session task panicked");
                }
            }
            None => {
                // Task already gone; make sure the session is not left
                // open anyway.
                self.orchestrator.call_dropped(session_id).await;
            }
        }
        info!(session_id = %session_id, active = self.calls.len(), "call ended");
    }

    pub fn active_calls(&self) -> usize {
        self.calls.len()
    }

    /// Cancel every live call and wait for the tasks to drain.
    pub async fn shutdown(&self) {
        let ids: Vec<Uuid> = self.calls.iter().map(|entry| *entry.key()).collect();
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, handle)) = self.calls.remove(&id) {
                handle.cancel.cancel();
                tasks.push(handle.task);
            }
        }
        info!(count = tasks.len(), "draining session tasks");
        for joined in join_all(tasks).await {
            if let Err(error) = joined {
                error!(%error, "session task panicked during shutdown");
            }
        }
    }
}

/// One task per call: greet, then apply turns in arrival order until the
/// call ends, the line goes idle, or the router cancels.
async fn session_task(
    orchestrator: Arc<Orchestrator>,
    calls: Arc<DashMap<Uuid, CallHandle>>,
    session_id: Uuid,
    mut turns: mpsc::Receiver<Transcript>,
    cancel: CancellationToken,
    idle_limit: Duration,
) {
    orchestrator.greet(session_id).await;
    let mut idle_deadline = Instant::now() + idle_limit;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                orchestrator.call_dropped(session_id).await;
                break;
            }
            _ = tokio::time::sleep_until(idle_deadline) => {
                orchestrator.idle_timeout(session_id).await;
                break;
            }
            received = turns.recv() => match received {
                Some(transcript) => {
                    idle_deadline = Instant::now() + idle_limit;
                    match orchestrator.handle_turn(session_id, transcript, &cancel).await {
                        Ok(TurnOutcome::Continue) => {}
                        Ok(TurnOutcome::Ended) => break,
                        Err(error) => {
                            error!(session_id = %session_id, %error, "turn processing failed");
                            orchestrator.call_dropped(session_id).await;
                            break;
                        }
                    }
                }
                None => break,
            },
        }
    }
    calls.remove(&session_id);
    debug!(session_id = %session_id, "session task exited");
}
