//! Seams shared between the session and transport layers.

use async_trait::async_trait;

use crate::Message;

/// The outbound write path.
///
/// The dispatcher, every output streamer and the keepalive responder all send
/// through one implementation of this trait, which serializes frames so they
/// are never interleaved on the transport.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Send one message.
    ///
    /// Delivery is best effort: when no transport is established the message
    /// is dropped, and write failures are logged rather than returned.
    async fn send_message(&self, msg: Message);
}
