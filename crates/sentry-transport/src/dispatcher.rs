//! Routes inbound dashboard messages to sessions.

use std::sync::Arc;

use sentry_core::{Message, MessageSink, MessageType};
use sentry_pty::{Pty, PtyError, PtySize, PtySpawner};
use sentry_session::{OutputStreamer, SessionRegistry};
use tokio::sync::RwLock;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Interprets one inbound message at a time.
///
/// The read loop awaits `dispatch` before reading the next frame, so messages
/// are applied strictly in arrival order. Blocking PTY work runs on the
/// blocking pool but is still awaited inline.
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    spawner: Arc<dyn PtySpawner>,
    sink: Arc<dyn MessageSink>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    agent_id: RwLock<Option<String>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        spawner: Arc<dyn PtySpawner>,
        sink: Arc<dyn MessageSink>,
        tracker: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            spawner,
            sink,
            tracker,
            shutdown,
            agent_id: RwLock::new(None),
        }
    }

    /// Agent id assigned by the most recent `registered` reply.
    pub async fn agent_id(&self) -> Option<String> {
        self.agent_id.read().await.clone()
    }

    /// Apply one message.
    pub async fn dispatch(&self, msg: Message) {
        tracing::debug!(message_type = %msg.kind, session_id = msg.session_id(), "Dispatching");

        match msg.kind {
            MessageType::Registered => self.registered(msg).await,
            MessageType::Ping => self.sink.send_message(Message::pong()).await,
            MessageType::Pong => {}
            MessageType::StartShell => self.start_shell(&msg).await,
            MessageType::Data => self.write_input(msg).await,
            MessageType::Resize => self.resize(&msg).await,
            MessageType::CloseShell => self.close_shell(&msg).await,
            MessageType::Register | MessageType::Error => {
                tracing::warn!(message_type = %msg.kind, "Ignoring agent-bound message from gateway");
            }
            MessageType::Unknown(ref kind) => {
                tracing::warn!(message_type = %kind, "Ignoring unknown message type");
            }
        }
    }

    async fn registered(&self, msg: Message) {
        tracing::info!(agent_id = ?msg.agent_id, "Registered with dashboard");
        if let Some(id) = msg.agent_id.filter(|id| !id.is_empty()) {
            *self.agent_id.write().await = Some(id);
        }
    }

    async fn start_shell(&self, msg: &Message) {
        let session_id = msg.session_id();
        if session_id.is_empty() {
            tracing::warn!("start_shell without a session id");
            return;
        }

        let (cols, rows) = msg.size();
        let size = PtySize::or_default(cols, rows);
        tracing::info!(
            session_id = %session_id,
            cols = size.cols,
            rows = size.rows,
            "Starting shell"
        );

        let spawner = Arc::clone(&self.spawner);
        let spawned = tokio::task::spawn_blocking(move || spawner.spawn(size))
            .await
            .map_err(|e| PtyError::Io(e.into()))
            .and_then(|result| result);

        let pty = match spawned {
            Ok(pty) => pty,
            Err(e) => {
                tracing::error!(session_id = %session_id, "Failed to start shell: {e}");
                self.sink
                    .send_message(Message::error(session_id, e.to_string()))
                    .await;
                return;
            }
        };

        if self.shutdown.is_cancelled() {
            if let Err(e) = pty.close() {
                tracing::debug!(session_id = %session_id, "Failed to close PTY: {e}");
            }
            return;
        }

        let handle = self.registry.insert(session_id, pty, size).await;
        OutputStreamer::new(handle, Arc::clone(&self.registry), Arc::clone(&self.sink))
            .spawn(&self.tracker);
    }

    async fn write_input(&self, msg: Message) {
        let session_id = msg.session_id().to_owned();
        let Some(pty) = self.registry.get(&session_id).await else {
            tracing::debug!(session_id = %session_id, "Input for unknown session");
            return;
        };
        let Some(data) = msg.data.filter(|d| !d.is_empty()) else {
            return;
        };

        let written = tokio::task::spawn_blocking(move || pty.write(data.as_bytes())).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(session_id = %session_id, "PTY write failed: {e}"),
            Err(e) => tracing::warn!(session_id = %session_id, "PTY write task failed: {e}"),
        }
    }

    async fn resize(&self, msg: &Message) {
        let session_id = msg.session_id();
        let Some(pty) = self.registry.get(session_id).await else {
            tracing::debug!(session_id = %session_id, "Resize for unknown session");
            return;
        };

        let (cols, rows) = msg.size();
        let size = PtySize::or_default(cols, rows);
        match pty.resize(size) {
            Ok(()) => {
                self.registry.set_size(session_id, size).await;
                tracing::debug!(session_id = %session_id, cols = size.cols, rows = size.rows, "Resized");
            }
            Err(e) => tracing::warn!(session_id = %session_id, "PTY resize failed: {e}"),
        }
    }

    async fn close_shell(&self, msg: &Message) {
        let session_id = msg.session_id();
        if self.registry.remove(session_id).await {
            tracing::info!(session_id = %session_id, "Session closed by dashboard");
        } else {
            tracing::debug!(session_id = %session_id, "Close for unknown session");
        }
    }
}
