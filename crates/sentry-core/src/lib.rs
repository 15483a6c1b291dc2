//! Core building blocks for the sentry remote tunnel.
//!
//! This crate provides:
//! - `Message` - The wire protocol exchanged with the dashboard gateway
//! - `MessageSink` - The single outbound write path every producer funnels through
//! - `TunnelConfig` - Immutable connection settings

pub mod config;
pub mod protocol;
pub mod traits;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::TunnelConfig;
pub use protocol::{DecodeError, EncodeError, Message, MessageType};
pub use traits::MessageSink;
