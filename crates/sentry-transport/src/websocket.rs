//! WebSocket transport to the dashboard gateway.

use std::time::Duration;

use async_trait::async_trait;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use sentry_core::{EncodeError, Message, MessageSink, TunnelConfig};
use thiserror::Error;
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, client::IntoClientRequest, http::HeaderValue},
};

/// Handshake header carrying the agent's API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Handshake header carrying the agent's node name.
pub const NODE_NAME_HEADER: &str = "X-Node-Name";

/// How long `detach` waits for the Close frame to go out.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsWriter = SplitSink<WsStream, tungstenite::Message>;
pub type WsReader = SplitStream<WsStream>;

/// Failure to establish a gateway connection. Always retried.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid {name} header: {reason}")]
    InvalidHeader { name: &'static str, reason: String },
    #[error("WebSocket handshake failed: {0}")]
    Handshake(Box<tungstenite::Error>),
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tungstenite::Error> for ConnectionError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::Io(io) => Self::Io(io),
            other => Self::Handshake(Box::new(other)),
        }
    }
}

/// Failure to write one outbound frame.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Failed to encode message: {0}")]
    Encode(#[from] EncodeError),
    #[error("WebSocket write failed: {0}")]
    Transport(Box<tungstenite::Error>),
}

impl From<tungstenite::Error> for WriteError {
    fn from(e: tungstenite::Error) -> Self {
        Self::Transport(Box::new(e))
    }
}

/// Open an authenticated WebSocket to the gateway.
///
/// # Errors
/// Returns error if the URL or credentials cannot form a valid request, or if
/// the TCP/TLS/WebSocket handshake fails.
pub async fn connect(config: &TunnelConfig) -> Result<(WsWriter, WsReader), ConnectionError> {
    let mut request = config
        .gateway_url
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;

    let headers = request.headers_mut();
    headers.insert(API_KEY_HEADER, header_value(API_KEY_HEADER, &config.api_key)?);
    headers.insert(
        NODE_NAME_HEADER,
        header_value(NODE_NAME_HEADER, &config.node_name)?,
    );

    let (stream, response) = connect_async(request).await?;
    tracing::debug!(status = %response.status(), "WebSocket handshake complete");
    Ok(stream.split())
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, ConnectionError> {
    HeaderValue::from_str(value).map_err(|e| ConnectionError::InvalidHeader {
        name,
        reason: e.to_string(),
    })
}

/// The single outbound write path.
///
/// Holds the write half of whichever connection is current. The mutex keeps
/// frames from different producers from interleaving; with no connection
/// attached, messages are dropped.
#[derive(Default)]
pub struct Outbound {
    writer: Mutex<Option<WsWriter>>,
}

impl Outbound {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `writer` the current connection.
    pub async fn attach(&self, writer: WsWriter) {
        *self.writer.lock().await = Some(writer);
    }

    /// Drop the current connection, sending a Close frame first.
    /// Returns false if nothing was attached.
    pub async fn detach(&self) -> bool {
        let Some(mut writer) = self.writer.lock().await.take() else {
            return false;
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("WebSocket close failed: {e}"),
            Err(_) => tracing::debug!("WebSocket close timed out"),
        }
        true
    }

    pub async fn is_attached(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Write one message. Returns `Ok(false)` if it was dropped because no
    /// connection is attached.
    ///
    /// # Errors
    /// Returns error if the message cannot be encoded or the write fails.
    pub async fn write(&self, msg: &Message) -> Result<bool, WriteError> {
        let frame = msg.encode()?;
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Ok(false);
        };
        writer.send(tungstenite::Message::text(frame)).await?;
        Ok(true)
    }
}

#[async_trait]
impl MessageSink for Outbound {
    async fn send_message(&self, msg: Message) {
        match self.write(&msg).await {
            Ok(true) => tracing::trace!(message_type = %msg.kind, "Sent message"),
            Ok(false) => {
                tracing::debug!(message_type = %msg.kind, "Not connected, dropping message");
            }
            Err(e) => tracing::warn!(message_type = %msg.kind, "Failed to send message: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detached_write_is_dropped() {
        let outbound = Outbound::new();
        assert!(!outbound.is_attached().await);
        assert!(!outbound.write(&Message::ping()).await.unwrap());
        assert!(!outbound.detach().await);
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let config = TunnelConfig::new("not a url", "key", "node");
        let Err(err) = connect(&config).await else {
            panic!("connected to an invalid URL");
        };
        assert!(matches!(err, ConnectionError::InvalidUrl(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_invalid_header() {
        let config = TunnelConfig::new("ws://127.0.0.1:9/agent", "bad\nkey", "node");
        let Err(err) = connect(&config).await else {
            panic!("connected with an invalid header");
        };
        assert!(
            matches!(
                err,
                ConnectionError::InvalidHeader {
                    name: API_KEY_HEADER,
                    ..
                }
            ),
            "got {err:?}"
        );
    }

    #[test]
    fn test_io_errors_are_network_errors() {
        let err: ConnectionError = tungstenite::Error::Io(std::io::Error::from(
            std::io::ErrorKind::ConnectionRefused,
        ))
        .into();
        assert!(matches!(err, ConnectionError::Io(_)));
    }
}
