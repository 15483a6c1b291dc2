//! Tunnel connection settings.

use std::time::Duration;

/// First reconnect delay.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Ceiling for the reconnect delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Immutable settings handed to the connection manager at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Gateway WebSocket URL (`ws://` or `wss://`).
    pub gateway_url: String,
    /// API key presented during the handshake.
    pub api_key: String,
    /// Node name presented during the handshake and in `register`.
    pub node_name: String,
    /// Delay after the first failed attempt.
    pub backoff_base: Duration,
    /// Upper bound for the delay between attempts.
    pub backoff_max: Duration,
}

impl TunnelConfig {
    /// Create settings with the default reconnect policy.
    #[must_use]
    pub fn new(
        gateway_url: impl Into<String>,
        api_key: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            api_key: api_key.into(),
            node_name: node_name.into(),
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }

    /// Override the reconnect delays.
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TunnelConfig::new("ws://localhost:3004/agent", "key", "node");
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.backoff_max, Duration::from_secs(30));
    }

    #[test]
    fn test_with_backoff() {
        let config = TunnelConfig::new("ws://x", "", "n")
            .with_backoff(Duration::from_millis(10), Duration::from_millis(300));
        assert_eq!(config.backoff_base, Duration::from_millis(10));
        assert_eq!(config.backoff_max, Duration::from_millis(300));
    }
}
