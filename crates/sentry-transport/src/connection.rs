//! Connection manager: the gateway connection's whole lifecycle.

use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use sentry_core::{Message, MessageSink, TunnelConfig};
use sentry_pty::PtySpawner;
use sentry_session::SessionRegistry;
use tokio::{sync::watch, task::JoinHandle};
use tokio_tungstenite::tungstenite;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    Backoff, ConnectionState, Dispatcher,
    websocket::{self, Outbound, WsReader},
};

/// Keeps one authenticated connection to the dashboard gateway alive.
///
/// `start` launches the reconnect loop in the background; `stop` ends it,
/// closes the transport, terminates every session and waits for all
/// background tasks to finish.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    run_loop: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    config: TunnelConfig,
    outbound: Arc<Outbound>,
    registry: Arc<SessionRegistry>,
    dispatcher: Dispatcher,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(config: TunnelConfig, spawner: Arc<dyn PtySpawner>) -> Self {
        let outbound = Arc::new(Outbound::new());
        let registry = Arc::new(SessionRegistry::new());
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            spawner,
            outbound.clone(),
            tracker.clone(),
            shutdown.clone(),
        );
        let (state, _) = watch::channel(ConnectionState::Idle);

        Self {
            inner: Arc::new(Inner {
                config,
                outbound,
                registry,
                dispatcher,
                state,
                shutdown,
                tracker,
            }),
            run_loop: Mutex::new(None),
        }
    }

    /// Launch the reconnect loop. Returns immediately; later calls are no-ops.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut run_loop = self.run_loop.lock().unwrap_or_else(PoisonError::into_inner);
        if run_loop.is_some() || self.inner.shutdown.is_cancelled() {
            return;
        }
        *run_loop = Some(self.inner.tracker.spawn(Arc::clone(&self.inner).run()));
    }

    /// Shut the tunnel down. Idempotent.
    ///
    /// On return no reconnect will be attempted, the transport is closed, the
    /// registry is empty and every streamer has finished.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if !inner.shutdown.is_cancelled() {
            tracing::info!("Stopping tunnel");
        }
        inner.shutdown.cancel();
        inner.set_state(ConnectionState::ShuttingDown);

        inner.outbound.detach().await;
        let closed = inner.registry.close_all().await;
        if closed > 0 {
            tracing::info!(sessions = closed, "Closed active sessions");
        }

        let run_loop = self
            .run_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = run_loop {
            if let Err(e) = handle.await {
                tracing::error!("Tunnel loop panicked: {e}");
            }
            // A session started while the loop was finishing its last message.
            inner.registry.close_all().await;
        }

        inner.tracker.close();
        inner.tracker.wait().await;
    }

    /// Send a message to the dashboard, dropping it if not connected.
    pub async fn send_message(&self, msg: Message) {
        self.inner.outbound.send_message(msg).await;
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Observe lifecycle transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Agent id assigned by the dashboard at the last registration.
    pub async fn agent_id(&self) -> Option<String> {
        self.inner.dispatcher.agent_id().await
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.inner.registry.len().await
    }

    /// Ids of live sessions, sorted.
    pub async fn session_ids(&self) -> Vec<String> {
        self.inner.registry.session_ids().await
    }

    /// Background tasks still running: the loop plus one per streamer.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.inner.tracker.len()
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    async fn run(self: Arc<Self>) {
        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_max);

        while !self.shutdown.is_cancelled() {
            self.set_state(ConnectionState::Connecting);
            tracing::info!(url = %self.config.gateway_url, "Connecting to dashboard gateway");

            let attempt = tokio::select! {
                () = self.shutdown.cancelled() => break,
                attempt = websocket::connect(&self.config) => attempt,
            };

            match attempt {
                Ok((writer, reader)) => {
                    backoff.reset();
                    self.outbound.attach(writer).await;
                    self.serve(reader).await;
                    self.outbound.detach().await;
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    self.set_state(ConnectionState::Closing);
                }
                Err(e) => {
                    self.set_state(ConnectionState::Failed);
                    tracing::warn!("Gateway connection failed: {e}");
                }
            }

            let delay = backoff.next_delay();
            tracing::info!(
                attempt = backoff.failures(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting after delay"
            );
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::ShuttingDown);
        tracing::info!("Tunnel loop stopped");
    }

    /// Register, then feed inbound frames to the dispatcher until the
    /// connection ends or shutdown is requested.
    async fn serve(&self, mut reader: WsReader) {
        self.set_state(ConnectionState::Connected);
        tracing::info!("Connected to dashboard gateway");

        self.outbound
            .send_message(Message::register(&self.config.node_name))
            .await;
        self.set_state(ConnectionState::Registered);

        loop {
            let frame = tokio::select! {
                () = self.shutdown.cancelled() => return,
                frame = reader.next() => frame,
            };

            let decoded = match frame {
                None => {
                    tracing::info!("Gateway ended the stream");
                    return;
                }
                Some(Err(e)) => {
                    tracing::warn!("WebSocket read error: {e}");
                    return;
                }
                Some(Ok(tungstenite::Message::Text(text))) => Message::decode(text.as_str()),
                Some(Ok(tungstenite::Message::Binary(bytes))) => Message::decode_bytes(&bytes),
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    tracing::info!(?frame, "Gateway closed the connection");
                    return;
                }
                // Control frames are answered by the WebSocket layer.
                Some(Ok(_)) => continue,
            };

            match decoded {
                Ok(msg) => self.dispatcher.dispatch(msg).await,
                Err(e) => tracing::warn!("Dropping malformed message: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sentry_pty::mock::MockSpawner;

    use super::*;

    fn unreachable_config() -> TunnelConfig {
        // Port 9 (discard) is closed on test hosts, so every attempt fails fast.
        TunnelConfig::new("ws://127.0.0.1:9/agent", "key", "node")
            .with_backoff(Duration::from_millis(50), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let manager = ConnectionManager::new(unreachable_config(), Arc::new(MockSpawner::new()));
        assert_eq!(manager.state(), ConnectionState::Idle);

        manager.stop().await;
        assert_eq!(manager.state(), ConnectionState::ShuttingDown);

        manager.start();
        assert_eq!(manager.task_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_attempts_keep_retrying_until_stop() {
        let manager = ConnectionManager::new(unreachable_config(), Arc::new(MockSpawner::new()));
        let mut states = manager.subscribe_state();
        manager.start();
        manager.start();

        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == ConnectionState::Failed),
        )
        .await
        .expect("never failed")
        .unwrap();

        manager.stop().await;
        manager.stop().await;
        assert_eq!(manager.state(), ConnectionState::ShuttingDown);
        assert_eq!(manager.task_count(), 0);
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        let manager = ConnectionManager::new(unreachable_config(), Arc::new(MockSpawner::new()));
        manager.send_message(Message::ping()).await;
        assert_eq!(manager.agent_id().await, None);
        manager.stop().await;
    }
}
