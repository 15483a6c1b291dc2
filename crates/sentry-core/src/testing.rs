//! In-memory test doubles.

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::{Message, MessageSink, MessageType};

/// A sink that records every message and forwards it to a channel.
pub struct RecordingSink {
    sent: Mutex<Vec<Message>>,
    tx: mpsc::UnboundedSender<Message>,
}

impl RecordingSink {
    /// Create a sink and the receiver that observes it.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sent: Mutex::new(Vec::new()),
                tx,
            },
            rx,
        )
    }

    /// Snapshot of everything sent so far.
    pub async fn sent(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }

    /// Messages of one type sent so far.
    pub async fn sent_of(&self, kind: &MessageType) -> Vec<Message> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|m| &m.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send_message(&self, msg: Message) {
        self.sent.lock().await.push(msg.clone());
        let _ = self.tx.send(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_and_forwards() {
        let (sink, mut rx) = RecordingSink::new();
        tokio_test::block_on(async {
            sink.send_message(Message::ping()).await;
            sink.send_message(Message::data("s1", "x")).await;
        });

        assert_eq!(rx.try_recv().unwrap(), Message::ping());
        assert_eq!(rx.try_recv().unwrap(), Message::data("s1", "x"));
        let data = tokio_test::block_on(sink.sent_of(&MessageType::Data));
        assert_eq!(data, vec![Message::data("s1", "x")]);
    }
}
