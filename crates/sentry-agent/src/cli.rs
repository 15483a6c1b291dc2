//! Command line and environment configuration.

use std::time::Duration;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use sentry_core::TunnelConfig;

pub const DEFAULT_GATEWAY_URL: &str = "ws://localhost:3004/agent";

const UNKNOWN_NODE: &str = "unknown";

/// Sentry host agent: exposes interactive shells to the dashboard over an
/// outbound WebSocket.
#[derive(Debug, Parser)]
#[command(name = "sentry-agent", version, about)]
pub struct Args {
    /// Dashboard gateway WebSocket URL.
    #[arg(long, env = "SENTRY_GATEWAY_URL", default_value = DEFAULT_GATEWAY_URL)]
    pub gateway_url: String,

    /// API key presented to the gateway.
    #[arg(long, env = "SENTRY_API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    /// Name this node registers under. Defaults to the host name.
    #[arg(long, env = "SENTRY_NODE_NAME")]
    pub node_name: Option<String>,

    /// First reconnect delay in milliseconds.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub backoff_base_ms: u64,

    /// Longest reconnect delay in milliseconds.
    #[arg(long, default_value_t = 30_000, value_parser = clap::value_parser!(u64).range(1..))]
    pub backoff_max_ms: u64,
}

impl Args {
    /// Validate the arguments and build the tunnel settings.
    ///
    /// # Errors
    /// Returns error if the gateway URL is not a WebSocket URL or the backoff
    /// bounds are inverted.
    pub fn tunnel_config(&self) -> Result<TunnelConfig> {
        let scheme = self
            .gateway_url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .with_context(|| format!("Gateway URL has no scheme: {}", self.gateway_url))?;
        ensure!(
            scheme == "ws" || scheme == "wss",
            "Gateway URL must use ws:// or wss://, got {}",
            self.gateway_url
        );
        ensure!(
            self.backoff_max_ms >= self.backoff_base_ms,
            "--backoff-max-ms ({}) is below --backoff-base-ms ({})",
            self.backoff_max_ms,
            self.backoff_base_ms
        );

        let node_name = self
            .node_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| node_name_or_unknown(host_name()));

        Ok(
            TunnelConfig::new(&self.gateway_url, &self.api_key, node_name).with_backoff(
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_millis(self.backoff_max_ms),
            ),
        )
    }
}

/// `name` if it is usable, else the `unknown` placeholder.
fn node_name_or_unknown(name: Option<String>) -> String {
    name.map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_NODE.to_string())
}

/// The host name as the OS reports it.
#[cfg(unix)]
#[allow(unsafe_code)]
fn host_name() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the pointer and length describe `buf`, which outlives the call.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        tracing::warn!(err = %std::io::Error::last_os_error(), "Failed to read host name");
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Some(String::from_utf8_lossy(&buf[..len]).into_owned())
}

/// The host name as the OS reports it.
#[cfg(windows)]
fn host_name() -> Option<String> {
    // Set by the system for every process, services included.
    std::env::var("COMPUTERNAME").ok()
}
