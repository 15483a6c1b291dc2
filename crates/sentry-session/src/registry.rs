//! Session registry: the live session id to PTY mapping.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use sentry_pty::{Pty, PtySize};
use tokio::sync::{RwLock, RwLockReadGuard};

/// One live interactive session.
struct Session {
    instance: u64,
    pty: Arc<dyn Pty>,
    size: PtySize,
    gate: Arc<OutputGate>,
}

/// Admits output for one registration until it ends.
///
/// Senders hold the gate open for the duration of a send; `shut` waits for any
/// send in flight, so nothing is emitted for a session once its removal has
/// returned.
#[derive(Debug)]
pub struct OutputGate {
    open: RwLock<bool>,
}

impl OutputGate {
    fn new() -> Self {
        Self {
            open: RwLock::new(true),
        }
    }

    /// Hold the gate open, or `None` once the registration has ended.
    pub async fn enter(&self) -> Option<RwLockReadGuard<'_, bool>> {
        let open = self.open.read().await;
        (*open).then_some(open)
    }

    pub async fn is_open(&self) -> bool {
        *self.open.read().await
    }

    async fn shut(&self) {
        *self.open.write().await = false;
    }
}

/// Identifies one registration of a session id.
///
/// A dashboard may reuse a session id after the previous session ended; the
/// instance number keeps a stale streamer from tearing down its successor.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub instance: u64,
    pub pty: Arc<dyn Pty>,
    pub gate: Arc<OutputGate>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

/// Concurrency-safe mapping from session id to its PTY.
///
/// Lookups share a read lock so `data` and `resize` for different sessions
/// proceed in parallel; insertion and removal are exclusive. PTYs are closed
/// after the lock is released.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    next_instance: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_instance: AtomicU64::new(1),
        }
    }

    /// Register `pty` under `session_id`.
    ///
    /// A session already registered under the same id is closed and replaced,
    /// so at most one PTY is ever associated with an id.
    pub async fn insert(
        &self,
        session_id: impl Into<String>,
        pty: Arc<dyn Pty>,
        size: PtySize,
    ) -> SessionHandle {
        let session_id = session_id.into();
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let gate = Arc::new(OutputGate::new());
        let session = Session {
            instance,
            pty: Arc::clone(&pty),
            size,
            gate: Arc::clone(&gate),
        };

        let replaced = self
            .sessions
            .write()
            .await
            .insert(session_id.clone(), session);

        if let Some(old) = replaced {
            tracing::warn!(session_id = %session_id, "Replacing live session with the same id");
            end(&session_id, old).await;
        }

        SessionHandle {
            session_id,
            instance,
            pty,
            gate,
        }
    }

    /// Look up the PTY for a session.
    pub async fn get(&self, session_id: &str) -> Option<Arc<dyn Pty>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| Arc::clone(&s.pty))
    }

    /// Last size applied to a session.
    pub async fn size(&self, session_id: &str) -> Option<PtySize> {
        self.sessions.read().await.get(session_id).map(|s| s.size)
    }

    /// Record a new size for a session. Returns false if the session is gone.
    pub async fn set_size(&self, session_id: &str, size: PtySize) -> bool {
        self.sessions
            .write()
            .await
            .get_mut(session_id)
            .map(|s| s.size = size)
            .is_some()
    }

    /// Registration currently holding `session_id`, if any.
    pub async fn instance(&self, session_id: &str) -> Option<u64> {
        self.sessions.read().await.get(session_id).map(|s| s.instance)
    }

    /// Remove a session and close its PTY. Returns false if it was not registered.
    ///
    /// Once this returns, the session's streamer emits nothing further.
    pub async fn remove(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(session) => {
                end(session_id, session).await;
                true
            }
            None => false,
        }
    }

    /// Remove a session only if it is still the given registration.
    pub async fn remove_instance(&self, session_id: &str, instance: u64) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(session_id) {
                Some(s) if s.instance == instance => sessions.remove(session_id),
                _ => None,
            }
        };
        match removed {
            Some(session) => {
                end(session_id, session).await;
                true
            }
            None => false,
        }
    }

    /// Remove and close every session. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(String, Session)> = self.sessions.write().await.drain().collect();
        let count = drained.len();
        for (session_id, session) in drained {
            end(&session_id, session).await;
        }
        count
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Registered session ids, sorted.
    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shut the output gate, then close the PTY. Runs outside the map lock.
async fn end(session_id: &str, session: Session) {
    session.gate.shut().await;
    if let Err(e) = session.pty.close() {
        tracing::warn!(session_id = %session_id, "Failed to close PTY: {e}");
    }
}
