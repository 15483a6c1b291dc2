//! POSIX pseudo-terminal variant.

use std::{
    io::{Read, Write},
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use portable_pty::{Child, CommandBuilder, MasterPty, native_pty_system};

use crate::{
    Pty, PtyError, PtySize,
    pty::{TERM, lock},
    shell::UnixShell,
};

/// How long a hung-up shell gets to exit before its group is killed.
const REAP_GRACE: Duration = Duration::from_secs(2);

const REAP_POLL: Duration = Duration::from_millis(20);

type ShellChild = Box<dyn Child + Send + Sync>;

/// The user's shell attached to a POSIX PTY.
pub struct UnixPty {
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    reader: Mutex<Box<dyn Read + Send>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    child: Mutex<Option<ShellChild>>,
    pid: Option<u32>,
    closed: AtomicBool,
}

impl UnixPty {
    /// Spawn the user's shell (`$SHELL`, default `/bin/bash`) on a new PTY.
    ///
    /// # Errors
    /// Returns error if no shell exists or the PTY cannot be allocated.
    pub fn spawn(size: PtySize) -> Result<Self, PtyError> {
        let shell = UnixShell::current_shell()
            .ok_or_else(|| PtyError::ShellNotFound("$SHELL, /bin/bash, /bin/sh".to_string()))?;
        Self::spawn_shell(shell.path(), size)
    }

    /// Spawn a specific shell on a new PTY.
    ///
    /// # Errors
    /// Returns error if the PTY cannot be allocated or the shell fails to start.
    pub fn spawn_shell(shell: &Path, size: PtySize) -> Result<Self, PtyError> {
        tracing::debug!(
            shell = %shell.display(),
            cols = size.cols,
            rows = size.rows,
            "Spawning PTY shell"
        );

        let pair = native_pty_system()
            .openpty(size.into())
            .map_err(|e| PtyError::CreateFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.env("TERM", TERM);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        // Only the child may hold the slave side, so its exit ends our reads.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::CreateFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::CreateFailed(e.to_string()))?;

        Ok(Self {
            pid: child.process_id(),
            master: Mutex::new(Some(pair.master)),
            reader: Mutex::new(reader),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(Some(child)),
            closed: AtomicBool::new(false),
        })
    }

    /// Process id of the shell, if known.
    #[must_use]
    pub const fn process_id(&self) -> Option<u32> {
        self.pid
    }

    fn child_exited(&self) -> bool {
        lock(&self.child)
            .as_mut()
            .is_none_or(|child| matches!(child.try_wait(), Ok(Some(_))))
    }
}

impl Pty for UnixPty {
    fn read(&self, buf: &mut [u8]) -> Result<usize, PtyError> {
        Ok(lock(&self.reader).read(buf)?)
    }

    fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        let mut writer = lock(&self.writer);
        let writer = writer.as_mut().ok_or(PtyError::Closed)?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    fn resize(&self, size: PtySize) -> Result<(), PtyError> {
        lock(&self.master)
            .as_ref()
            .ok_or(PtyError::Closed)?
            .resize(size.into())
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))
    }

    fn close(&self) -> Result<(), PtyError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // A reaped pid may already belong to someone else.
        if let Some(pid) = self.pid.filter(|_| !self.child_exited()) {
            // Interactive shells ignore SIGTERM, so hang up the session as well.
            signal_group(pid, libc::SIGHUP);
            signal_group(pid, libc::SIGTERM);
        }

        drop(lock(&self.writer).take());
        drop(lock(&self.master).take());
        Ok(())
    }
}

impl Drop for UnixPty {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!(?e, "Failed to close PTY on drop");
        }

        let Some(mut child) = lock(&self.child).take() else {
            return;
        };
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        // Still exiting: wait on a side thread so the dropping task never blocks.
        let pid = self.pid;
        let reaper = thread::Builder::new()
            .name("pty-reaper".to_string())
            .spawn(move || reap(&mut child, pid));
        if let Err(e) = reaper {
            tracing::warn!(?pid, "Failed to start PTY reaper: {e}");
        }
    }
}

/// Collect a signalled shell, killing its process group if it lingers.
fn reap(child: &mut ShellChild, pid: Option<u32>) {
    if wait_exit(child, REAP_GRACE) {
        return;
    }
    if let Some(pid) = pid {
        tracing::debug!(pid, "Shell outlived hangup, killing its process group");
        signal_group(pid, libc::SIGKILL);
    }
    if !wait_exit(child, REAP_GRACE) {
        tracing::warn!(?pid, "Shell did not exit after SIGKILL");
    }
}

/// Poll until the child has been reaped or `timeout` passes.
fn wait_exit(child: &mut ShellChild, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) | Err(_) => return true,
            Ok(None) if Instant::now() >= deadline => return false,
            Ok(None) => thread::sleep(REAP_POLL),
        }
    }
}

/// Send `signal` to the process group led by `pid`.
///
/// portable-pty starts the shell with `setsid()`, so the shell leads its own
/// group and the negative pid also reaches the jobs it started.
#[allow(unsafe_code)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        tracing::warn!(pid, "PID exceeds pid_t, cannot send signal");
        return;
    };
    if pid <= 0 {
        return;
    }
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc != 0 {
        tracing::debug!(
            pid,
            signal,
            err = %std::io::Error::last_os_error(),
            "Failed to signal process group"
        );
    }
}
