//! Connection lifecycle states.

use std::fmt;

/// Where the connection manager is in its lifecycle.
///
/// `Connecting → Connected → Registered → (Closing | Failed) → Connecting …`
/// repeats until `stop`, after which the state is `ShuttingDown` for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Constructed, loop not started.
    Idle,
    /// Opening the transport.
    Connecting,
    /// Transport open, `register` not yet sent.
    Connected,
    /// `register` sent; dispatching dashboard messages.
    Registered,
    /// The gateway closed the connection or the read loop ended.
    Closing,
    /// The last attempt failed; waiting out the backoff.
    Failed,
    /// Stopped; no further reconnects.
    ShuttingDown,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Registered => "registered",
            Self::Closing => "closing",
            Self::Failed => "failed",
            Self::ShuttingDown => "shutting_down",
        }
    }

    /// Whether a transport is currently open.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Registered)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
