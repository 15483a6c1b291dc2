//! Interactive session bookkeeping for the remote tunnel.
//!
//! Provides:
//! - `SessionRegistry` - Concurrency-safe session id to PTY mapping
//! - `OutputStreamer` - Per-session task pumping PTY output to the dashboard

pub mod registry;
pub mod streamer;

pub use registry::{OutputGate, SessionHandle, SessionRegistry};
pub use streamer::{OutputStreamer, READ_BUFFER_SIZE, Utf8Carry};
