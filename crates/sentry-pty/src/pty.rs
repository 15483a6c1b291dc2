//! The pseudo-terminal capability shared by every platform variant.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

/// Terminal type advertised to the shell so interactive programs render correctly.
pub const TERM: &str = "xterm-256color";

/// PTY error.
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("No usable shell found: {0}")]
    ShellNotFound(String),
    #[error("Failed to create PTY: {0}")]
    CreateFailed(String),
    #[error("Failed to spawn shell: {0}")]
    SpawnFailed(String),
    #[error("PTY resize failed: {0}")]
    ResizeFailed(String),
    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PTY is closed")]
    Closed,
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    pub cols: u16,
    pub rows: u16,
}

impl PtySize {
    /// Size used when the dashboard does not ask for one.
    pub const DEFAULT: Self = Self { cols: 80, rows: 24 };

    #[must_use]
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Build a size from requested dimensions, substituting the default
    /// for any dimension that is zero.
    #[must_use]
    pub const fn or_default(cols: u16, rows: u16) -> Self {
        Self {
            cols: if cols == 0 { Self::DEFAULT.cols } else { cols },
            rows: if rows == 0 { Self::DEFAULT.rows } else { rows },
        }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<PtySize> for portable_pty::PtySize {
    fn from(size: PtySize) -> Self {
        Self {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// A shell process attached to a pseudo-terminal.
///
/// Every method takes `&self` so one instance can be shared between the
/// session registry (writes, resizes, close) and its output streamer (reads).
pub trait Pty: Send + Sync {
    /// Block until output is available and copy it into `buf`.
    ///
    /// Returns `Ok(0)` at end of stream.
    ///
    /// # Errors
    /// Returns error if the read fails, which also means the stream is over.
    fn read(&self, buf: &mut [u8]) -> Result<usize, PtyError>;

    /// Write all of `data` to the shell's input.
    ///
    /// # Errors
    /// Returns error if the PTY is closed or the write fails.
    fn write(&self, data: &[u8]) -> Result<(), PtyError>;

    /// Change the terminal dimensions.
    ///
    /// # Errors
    /// Returns error if the PTY is closed or the platform call fails.
    fn resize(&self, size: PtySize) -> Result<(), PtyError>;

    /// Terminate the shell and release the terminal. Idempotent.
    ///
    /// # Errors
    /// Returns error if releasing platform resources fails.
    fn close(&self) -> Result<(), PtyError>;
}

/// Factory for new terminals.
pub trait PtySpawner: Send + Sync {
    /// Spawn a shell attached to a new PTY of the given size.
    ///
    /// # Errors
    /// Returns error if no shell is available or PTY allocation fails.
    fn spawn(&self, size: PtySize) -> Result<Arc<dyn Pty>, PtyError>;
}

/// Spawner for the platform's native variant.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSpawner;

impl PtySpawner for NativeSpawner {
    #[cfg(unix)]
    fn spawn(&self, size: PtySize) -> Result<Arc<dyn Pty>, PtyError> {
        Ok(Arc::new(crate::unix::UnixPty::spawn(size)?))
    }

    #[cfg(windows)]
    fn spawn(&self, size: PtySize) -> Result<Arc<dyn Pty>, PtyError> {
        Ok(Arc::new(crate::windows::ConPty::spawn(size)?))
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_or_default_fills_zero_dimensions() {
        assert_eq!(PtySize::or_default(0, 0), PtySize::new(80, 24));
        assert_eq!(PtySize::or_default(100, 0), PtySize::new(100, 24));
        assert_eq!(PtySize::or_default(0, 30), PtySize::new(80, 30));
        assert_eq!(PtySize::or_default(100, 30), PtySize::new(100, 30));
    }

    #[test]
    fn test_into_portable_size() {
        let size: portable_pty::PtySize = PtySize::new(120, 40).into();
        assert_eq!(size.cols, 120);
        assert_eq!(size.rows, 40);
        assert_eq!(size.pixel_width, 0);
    }
}
