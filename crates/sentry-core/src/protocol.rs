//! Wire protocol between the agent and the dashboard gateway.
//!
//! Every frame is a single JSON object carried in a WebSocket text frame.
//! Fields that do not apply to a message type are omitted on encode and
//! default to `None` on decode, so peers never depend on their presence.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Message type tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Agent identifies itself after connecting.
    Register,
    /// Dashboard acknowledges a `register`.
    Registered,
    /// Dashboard requests a new interactive session.
    StartShell,
    /// Raw terminal bytes, either direction.
    Data,
    /// Dashboard changes the PTY dimensions.
    Resize,
    /// Either side terminates a session.
    CloseShell,
    /// Agent reports a session-scoped failure.
    Error,
    /// Liveness check.
    Ping,
    /// Liveness reply.
    Pong,
    /// A tag this agent does not know. Kept so newer dashboards stay compatible.
    #[serde(untagged)]
    Unknown(String),
}

impl MessageType {
    /// The tag as it appears on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Register => "register",
            Self::Registered => "registered",
            Self::StartShell => "start_shell",
            Self::Data => "data",
            Self::Resize => "resize",
            Self::CloseShell => "close_shell",
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Unknown(tag) => tag,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discrete protocol unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Type tag.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Dashboard-assigned session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Terminal bytes as text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Terminal width in columns.
    #[serde(
        default,
        deserialize_with = "clamped_dimension",
        skip_serializing_if = "Option::is_none"
    )]
    pub cols: Option<u16>,
    /// Terminal height in rows.
    #[serde(
        default,
        deserialize_with = "clamped_dimension",
        skip_serializing_if = "Option::is_none"
    )]
    pub rows: Option<u16>,
    /// Node name announced in `register`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    /// Failure text carried by `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Identifier the gateway assigned in `registered`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl Message {
    /// An empty message of the given type.
    #[must_use]
    pub const fn new(kind: MessageType) -> Self {
        Self {
            kind,
            session_id: None,
            data: None,
            cols: None,
            rows: None,
            node_name: None,
            error: None,
            agent_id: None,
        }
    }

    #[must_use]
    pub fn register(node_name: impl Into<String>) -> Self {
        Self {
            node_name: Some(node_name.into()),
            ..Self::new(MessageType::Register)
        }
    }

    #[must_use]
    pub const fn ping() -> Self {
        Self::new(MessageType::Ping)
    }

    #[must_use]
    pub const fn pong() -> Self {
        Self::new(MessageType::Pong)
    }

    #[must_use]
    pub fn start_shell(session_id: impl Into<String>, cols: u16, rows: u16) -> Self {
        Self {
            session_id: Some(session_id.into()),
            cols: Some(cols),
            rows: Some(rows),
            ..Self::new(MessageType::StartShell)
        }
    }

    #[must_use]
    pub fn data(session_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            data: Some(data.into()),
            ..Self::new(MessageType::Data)
        }
    }

    #[must_use]
    pub fn resize(session_id: impl Into<String>, cols: u16, rows: u16) -> Self {
        Self {
            session_id: Some(session_id.into()),
            cols: Some(cols),
            rows: Some(rows),
            ..Self::new(MessageType::Resize)
        }
    }

    #[must_use]
    pub fn close_shell(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::new(MessageType::CloseShell)
        }
    }

    #[must_use]
    pub fn error(session_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            error: Some(error.into()),
            ..Self::new(MessageType::Error)
        }
    }

    /// Session identifier, or `""` when absent.
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.session_id.as_deref().unwrap_or_default()
    }

    /// Payload text, or `""` when absent.
    #[must_use]
    pub fn payload(&self) -> &str {
        self.data.as_deref().unwrap_or_default()
    }

    /// Requested `(cols, rows)`, with zero standing in for an absent field.
    #[must_use]
    pub fn size(&self) -> (u16, u16) {
        (self.cols.unwrap_or(0), self.rows.unwrap_or(0))
    }

    /// Serialize into one text frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not a JSON object with a `type` tag.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Parse one binary frame holding UTF-8 JSON.
    ///
    /// # Errors
    /// Returns error if the frame is not valid UTF-8 JSON with a `type` tag.
    pub fn decode_bytes(frame: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(frame)?)
    }
}

/// Accept any integer dimension: negatives become 0 (and so the default
/// size), oversized values saturate at `u16::MAX`.
fn clamped_dimension<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<i64>::deserialize(deserializer)?;
    Ok(value.map(|v| u16::try_from(v.clamp(0, i64::from(u16::MAX))).unwrap_or(u16::MAX)))
}

/// Inbound frame could not be parsed.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Outbound message could not be serialized.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_wire_shape() {
        let json = Message::register("web-01").encode().unwrap();
        assert_eq!(json, r#"{"type":"register","nodeName":"web-01"}"#);
    }

    #[test]
    fn test_pong_has_no_fields() {
        let json = Message::pong().encode().unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_decode_start_shell() {
        let msg =
            Message::decode(r#"{"type":"start_shell","sessionId":"s1","cols":100,"rows":30}"#)
                .unwrap();
        assert_eq!(msg.kind, MessageType::StartShell);
        assert_eq!(msg.session_id(), "s1");
        assert_eq!(msg.size(), (100, 30));
    }

    #[test]
    fn test_decode_missing_size_defaults_to_zero() {
        let msg = Message::decode(r#"{"type":"start_shell","sessionId":"s1"}"#).unwrap();
        assert_eq!(msg.size(), (0, 0));
    }

    #[test]
    fn test_decode_registered_with_agent_id() {
        let msg = Message::decode(r#"{"type":"registered","agentId":"agent-1-abc"}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Registered);
        assert_eq!(msg.agent_id.as_deref(), Some("agent-1-abc"));
    }

    #[test]
    fn test_decode_unknown_type_is_kept() {
        let msg = Message::decode(r#"{"type":"upload_file","path":"/tmp/x"}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Unknown("upload_file".to_string()));
        assert_eq!(msg.kind.to_string(), "upload_file");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Message::decode("not json").is_err());
        assert!(Message::decode(r#"{"sessionId":"s1"}"#).is_err());
        assert!(Message::decode(r#"{"type":"resize","cols":"wide"}"#).is_err());
    }

    #[test]
    fn test_decode_out_of_range_size_is_clamped() {
        let msg =
            Message::decode(r#"{"type":"start_shell","sessionId":"s1","cols":-5,"rows":70000}"#)
                .unwrap();
        assert_eq!(msg.session_id(), "s1");
        assert_eq!(msg.size(), (0, u16::MAX));

        let msg = Message::decode(r#"{"type":"resize","sessionId":"s1","cols":null}"#).unwrap();
        assert_eq!(msg.size(), (0, 0));
    }

    #[test]
    fn test_decode_bytes() {
        let msg = Message::decode_bytes(br#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Ping);
        assert!(Message::decode_bytes(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_data_keeps_control_bytes() {
        let msg = Message::data("s1", "\u{1b}[1mhi\r\n");
        let parsed = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(parsed.payload(), "\u{1b}[1mhi\r\n");
    }
}
