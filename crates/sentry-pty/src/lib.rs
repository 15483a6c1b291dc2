//! Cross-platform pseudo-terminal sessions.
//!
//! Provides:
//! - `Pty` - The read/write/resize/close capability every variant implements
//! - `UnixPty` / `ConPty` - The POSIX and Windows console-pty variants
//! - `PtySpawner` - Seam through which sessions obtain new terminals
//! - Shell detection utilities for Unix and Windows

pub mod pty;
pub mod shell;

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use pty::{NativeSpawner, Pty, PtyError, PtySize, PtySpawner};
pub use shell::{interactive_shell, resolve_executable_path};

#[cfg(unix)]
pub use unix::UnixPty;

#[cfg(windows)]
pub use windows::ConPty;
