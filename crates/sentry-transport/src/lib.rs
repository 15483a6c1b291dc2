//! Gateway connection for the sentry remote tunnel.
//!
//! Provides:
//! - `ConnectionManager` - Connect, register, read, reconnect with backoff, tear down
//! - `Dispatcher` - Routes dashboard messages to sessions
//! - `Outbound` - The serialized WebSocket write path
//! - `Backoff` / `ConnectionState` - Reconnect policy and lifecycle states

pub mod backoff;
pub mod connection;
pub mod dispatcher;
pub mod state;
pub mod websocket;

pub use backoff::Backoff;
pub use connection::ConnectionManager;
pub use dispatcher::Dispatcher;
pub use state::ConnectionState;
pub use websocket::{API_KEY_HEADER, ConnectionError, NODE_NAME_HEADER, Outbound, WriteError};
