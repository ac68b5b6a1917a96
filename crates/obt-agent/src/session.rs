//! In-flight request tracking shared by the transfer and provisioning engines.
//!
//! A session lives from the moment a request is issued until its completion
//! is delivered. Completion delivery removes the session first and only then
//! applies any side effect, so a completion whose session is already gone
//! (discarded by a full reset) is dropped without touching the registry.

use crate::task_registry::TaskRegistry;
use obt_core::{Outcome, RequestId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Sessions keyed by request.
#[derive(Debug)]
pub struct SessionTable<S> {
    sessions: Arc<Mutex<HashMap<RequestId, S>>>,
}

impl<S> Clone for SessionTable<S> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl<S> Default for SessionTable<S> {
    fn default() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<S: Clone> SessionTable<S> {
    pub fn insert(&self, request_id: RequestId, session: S) {
        self.sessions.lock().insert(request_id, session);
    }

    pub fn remove(&self, request_id: RequestId) -> Option<S> {
        self.sessions.lock().remove(&request_id)
    }

    pub fn snapshot(&self) -> Vec<S> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn clear(&self) {
        self.sessions.lock().clear();
    }
}

/// Ticket for an accepted request; resolves once the outcome has been applied.
#[derive(Debug)]
pub struct Pending {
    request_id: RequestId,
    rx: oneshot::Receiver<Outcome>,
}

impl Pending {
    /// Request this ticket tracks
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Wait for the outcome.
    ///
    /// Returns `None` if the session was discarded before a completion arrived.
    pub async fn outcome(self) -> Option<Outcome> {
        self.rx.await.ok()
    }
}

/// Watch `completion` for `request_id` and run `apply` with its session.
pub(crate) fn track<S, F>(
    tasks: &TaskRegistry,
    sessions: SessionTable<S>,
    request_id: RequestId,
    completion: oneshot::Receiver<Outcome>,
    apply: F,
) -> Pending
where
    S: Clone + Send + 'static,
    F: FnOnce(S, Outcome) + Send + 'static,
{
    let (ticket_tx, ticket_rx) = oneshot::channel();
    tasks.spawn_cancellable(async move {
        let outcome = match completion.await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(request_id = %request_id, "Collaborator dropped request without completing it");
                Outcome::Failed
            }
        };
        let Some(session) = sessions.remove(request_id) else {
            debug!(request_id = %request_id, "Ignoring completion for discarded session");
            return;
        };
        apply(session, outcome);
        let _ = ticket_tx.send(outcome);
    });
    Pending {
        request_id,
        rx: ticket_rx,
    }
}
