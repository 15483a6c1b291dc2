//! Channel-backed PTY doubles for tests that must not spawn real shells.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
    mpsc,
};

use crate::{Pty, PtyError, PtySize, PtySpawner, pty::lock};

struct Output {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

/// A fake terminal that echoes its input back as output.
///
/// `close` ends the output stream, which is how a real shell behaves once it
/// has been terminated.
pub struct MockPty {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    output: Mutex<Output>,
    written: Mutex<Vec<u8>>,
    sizes: Mutex<Vec<PtySize>>,
    closed: AtomicBool,
}

impl MockPty {
    /// Create a terminal whose first output is `banner` (a prompt, say).
    #[must_use]
    pub fn new(size: PtySize, banner: &[u8]) -> Self {
        let (tx, rx) = mpsc::channel();
        if !banner.is_empty() {
            let _ = tx.send(banner.to_vec());
        }
        Self {
            tx: Mutex::new(Some(tx)),
            output: Mutex::new(Output {
                rx,
                pending: Vec::new(),
            }),
            written: Mutex::new(Vec::new()),
            sizes: Mutex::new(vec![size]),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue output as if the shell had printed it.
    pub fn emit(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if let Some(tx) = lock(&self.tx).as_ref() {
            let _ = tx.send(data.to_vec());
        }
    }

    /// End the output stream as if the shell had exited on its own.
    pub fn hang_up(&self) {
        drop(lock(&self.tx).take());
    }

    /// Everything written to the terminal so far.
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        lock(&self.written).clone()
    }

    /// Initial size followed by every resize.
    #[must_use]
    pub fn sizes(&self) -> Vec<PtySize> {
        lock(&self.sizes).clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Pty for MockPty {
    fn read(&self, buf: &mut [u8]) -> Result<usize, PtyError> {
        let mut output = lock(&self.output);
        if output.pending.is_empty() {
            match output.rx.recv() {
                Ok(chunk) => output.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(output.pending.len());
        buf[..n].copy_from_slice(&output.pending[..n]);
        output.pending.drain(..n);
        Ok(n)
    }

    fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if self.is_closed() {
            return Err(PtyError::Closed);
        }
        lock(&self.written).extend_from_slice(data);
        self.emit(data);
        Ok(())
    }

    fn resize(&self, size: PtySize) -> Result<(), PtyError> {
        if self.is_closed() {
            return Err(PtyError::Closed);
        }
        lock(&self.sizes).push(size);
        Ok(())
    }

    fn close(&self) -> Result<(), PtyError> {
        self.closed.store(true, Ordering::Release);
        self.hang_up();
        Ok(())
    }
}

/// Spawner handing out `MockPty`s and remembering each one.
pub struct MockSpawner {
    spawned: Mutex<Vec<Arc<MockPty>>>,
    fail_with: Option<String>,
    banner: Vec<u8>,
}

impl MockSpawner {
    #[must_use]
    pub fn new() -> Self {
        Self::build(None, b"")
    }

    fn build(fail_with: Option<String>, banner: &[u8]) -> Self {
        Self {
            spawned: Mutex::new(Vec::new()),
            fail_with,
            banner: banner.to_vec(),
        }
    }

    /// Every terminal starts by printing `banner`.
    #[must_use]
    pub fn with_banner(banner: &[u8]) -> Self {
        Self::build(None, banner)
    }

    /// Every spawn fails with `CreateFailed(reason)`.
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self::build(Some(reason.into()), b"")
    }

    /// Terminals spawned so far, oldest first.
    #[must_use]
    pub fn spawned(&self) -> Vec<Arc<MockPty>> {
        lock(&self.spawned).clone()
    }
}

impl Default for MockSpawner {
    fn default() -> Self {
        Self::new()
    }
}

// Blocked readers only return once their terminal closes, and a runtime
// waits for its blocking threads on shutdown.
impl Drop for MockSpawner {
    fn drop(&mut self) {
        for pty in lock(&self.spawned).iter() {
            let _ = pty.close();
        }
    }
}

impl PtySpawner for MockSpawner {
    fn spawn(&self, size: PtySize) -> Result<Arc<dyn Pty>, PtyError> {
        if let Some(reason) = &self.fail_with {
            return Err(PtyError::CreateFailed(reason.clone()));
        }
        let pty = Arc::new(MockPty::new(size, &self.banner));
        lock(&self.spawned).push(Arc::clone(&pty));
        Ok(pty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_and_eof() {
        let pty = MockPty::new(PtySize::DEFAULT, b"$ ");
        let mut buf = [0u8; 2];

        pty.write(b"hi!").unwrap();
        assert_eq!(pty.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"$ ");
        assert_eq!(pty.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"hi");
        assert_eq!(pty.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'!');

        pty.close().unwrap();
        assert_eq!(pty.read(&mut buf).unwrap(), 0);
        assert!(pty.write(b"x").is_err());
    }

    #[test]
    fn test_failing_spawner() {
        let spawner = MockSpawner::failing("out of ptys");
        let err = spawner.spawn(PtySize::DEFAULT).err().unwrap();
        assert_eq!(err.to_string(), "Failed to create PTY: out of ptys");
        assert!(spawner.spawned().is_empty());
    }
}
