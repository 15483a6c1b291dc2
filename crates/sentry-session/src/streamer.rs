//! Output streaming: one task per session pumping PTY output to the dashboard.

use std::sync::Arc;

use sentry_core::{Message, MessageSink};
use sentry_pty::{Pty, PtyError};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::task::TaskTracker;

use crate::{SessionHandle, SessionRegistry};

/// Bytes requested from the PTY per read.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Chunks buffered between the blocking reader and the async sender.
const CHUNK_QUEUE_DEPTH: usize = 32;

/// Streams one session's PTY output as `data` messages.
///
/// The task ends exactly when the PTY reaches end of stream or fails, which
/// also happens once the registry closes the PTY. Output still queued when the
/// registration ends is dropped. A session that ended on its own, or was
/// closed, is announced with one `close_shell`; a replaced one is not, since
/// its id now belongs to the successor.
pub struct OutputStreamer {
    session: SessionHandle,
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn MessageSink>,
}

impl OutputStreamer {
    #[must_use]
    pub fn new(
        session: SessionHandle,
        registry: Arc<SessionRegistry>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            session,
            registry,
            sink,
        }
    }

    /// Start streaming on `tracker`.
    pub fn spawn(self, tracker: &TaskTracker) -> JoinHandle<()> {
        let (tx, rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);
        let pty = Arc::clone(&self.session.pty);
        let reader = tracker.spawn_blocking(move || pump(pty.as_ref(), &tx));
        tracker.spawn(self.run(rx, reader))
    }

    async fn run(
        self,
        mut chunks: mpsc::Receiver<Vec<u8>>,
        reader: JoinHandle<Result<(), PtyError>>,
    ) {
        let session_id = self.session.session_id.as_str();
        let mut carry = Utf8Carry::default();

        while let Some(chunk) = chunks.recv().await {
            let text = carry.decode(&chunk);
            if !text.is_empty() && !self.send_data(text).await {
                break;
            }
        }
        // Unblocks the reader if we stopped early.
        drop(chunks);

        let tail = carry.finish();
        if !tail.is_empty() {
            self.send_data(tail).await;
        }

        match reader.await {
            Ok(Ok(())) => tracing::info!(session_id = %session_id, "Terminal closed"),
            Ok(Err(e)) => tracing::info!(session_id = %session_id, "Terminal closed: {e}"),
            Err(e) => tracing::error!(session_id = %session_id, "PTY reader panicked: {e}"),
        }

        let instance = self.session.instance;
        let ended = self.registry.remove_instance(session_id, instance).await;
        if !ended && self.registry.instance(session_id).await.is_some() {
            tracing::debug!(session_id = %session_id, "Session was replaced, not announcing close");
            return;
        }
        self.sink
            .send_message(Message::close_shell(session_id))
            .await;
    }

    /// Send one `data` frame unless the registration has ended.
    async fn send_data(&self, text: String) -> bool {
        let Some(_open) = self.session.gate.enter().await else {
            tracing::debug!(
                session_id = %self.session.session_id,
                "Dropping output for an ended session"
            );
            return false;
        };
        self.sink
            .send_message(Message::data(&self.session.session_id, text))
            .await;
        true
    }
}

/// Blocking read loop feeding `tx` until end of stream.
fn pump(pty: &dyn Pty, tx: &mpsc::Sender<Vec<u8>>) -> Result<(), PtyError> {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let n = pty.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        if tx.blocking_send(buf[..n].to_vec()).is_err() {
            return Ok(());
        }
    }
}

/// Incremental UTF-8 decoder for terminal output.
///
/// Holds back a multi-byte sequence split across reads until the rest of it
/// arrives, and replaces bytes that can never be valid with U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    /// Decode as much of `pending + chunk` as is complete.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    out.push_str(text);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = start + e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid + len;
                        }
                        // Truncated sequence at the end: wait for more bytes.
                        None => {
                            start = valid;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        out
    }

    /// Flush whatever is held back, lossily.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sentry_core::{MessageType, testing::RecordingSink};
    use sentry_pty::{PtySize, mock::MockPty};

    use super::*;

    #[test]
    fn test_utf8_carry_splits_multibyte() {
        let mut carry = Utf8Carry::default();
        let bytes = "é€".as_bytes();

        assert_eq!(carry.decode(&bytes[..1]), "");
        assert_eq!(carry.decode(&bytes[1..3]), "é");
        assert_eq!(carry.decode(&bytes[3..]), "€");
        assert_eq!(carry.finish(), "");
    }

    #[test]
    fn test_utf8_carry_replaces_invalid() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.decode(b"a\xffb"), "a\u{fffd}b");
        assert_eq!(carry.decode(b"\xe2\x82"), "");
        assert_eq!(carry.finish(), "\u{fffd}");
    }

    async fn start(
        pty: Arc<MockPty>,
    ) -> (
        Arc<SessionRegistry>,
        Arc<RecordingSink>,
        mpsc::UnboundedReceiver<Message>,
        TaskTracker,
    ) {
        let registry = Arc::new(SessionRegistry::new());
        let (sink, rx) = RecordingSink::new();
        let sink = Arc::new(sink);
        let tracker = TaskTracker::new();

        let handle = registry.insert("s1", pty, PtySize::DEFAULT).await;
        OutputStreamer::new(handle, Arc::clone(&registry), sink.clone()).spawn(&tracker);
        (registry, sink, rx, tracker)
    }

    #[tokio::test]
    async fn test_streams_output_as_data() {
        let pty = Arc::new(MockPty::new(PtySize::DEFAULT, b"$ "));
        let (_registry, _sink, mut rx, _tracker) = start(pty.clone()).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first, Message::data("s1", "$ "));

        pty.write(b"echo hi\n").unwrap();
        let echoed = rx.recv().await.unwrap();
        assert_eq!(echoed.session_id(), "s1");
        assert_eq!(echoed.payload(), "echo hi\n");

        pty.close().unwrap();
    }

    #[tokio::test]
    async fn test_eof_sends_close_and_unregisters() {
        let pty = Arc::new(MockPty::new(PtySize::DEFAULT, b""));
        let (registry, sink, mut rx, tracker) = start(pty.clone()).await;

        pty.hang_up();

        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg, Message::close_shell("s1"));

        tracker.close();
        tokio::time::timeout(Duration::from_secs(2), tracker.wait())
            .await
            .unwrap();
        assert!(!registry.contains("s1").await);
        assert!(pty.is_closed());
        assert_eq!(sink.sent_of(&MessageType::CloseShell).await.len(), 1);
    }

    #[tokio::test]
    async fn test_registry_removal_ends_task() {
        let pty = Arc::new(MockPty::new(PtySize::DEFAULT, b""));
        let (registry, sink, _rx, tracker) = start(pty.clone()).await;

        assert!(registry.remove("s1").await);

        tracker.close();
        tokio::time::timeout(Duration::from_secs(2), tracker.wait())
            .await
            .unwrap();
        assert!(tracker.is_empty());
        assert!(sink.sent_of(&MessageType::Data).await.is_empty());
    }
}
