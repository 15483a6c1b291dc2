//! Windows console pseudo-terminal (ConPTY) variant.

use std::{
    io::{Read, Write},
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use portable_pty::{ChildKiller, CommandBuilder, MasterPty, native_pty_system};

use crate::{Pty, PtyError, PtySize, pty::lock, shell::interactive_shell};

type SharedMaster = Arc<Mutex<Option<Box<dyn MasterPty + Send>>>>;

/// A PowerShell session inside a console pseudo-terminal.
pub struct ConPty {
    master: SharedMaster,
    reader: Mutex<Box<dyn Read + Send>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    closed: AtomicBool,
}

impl ConPty {
    /// Spawn `pwsh.exe` (or `powershell.exe`) inside a new pseudo console.
    ///
    /// # Errors
    /// Returns error if no PowerShell is installed or ConPTY creation fails.
    pub fn spawn(size: PtySize) -> Result<Self, PtyError> {
        let shell = interactive_shell()?;
        Self::spawn_shell(&shell, size)
    }

    /// Spawn a specific shell inside a new pseudo console.
    ///
    /// # Errors
    /// Returns error if ConPTY creation fails or the shell fails to start.
    pub fn spawn_shell(shell: &Path, size: PtySize) -> Result<Self, PtyError> {
        tracing::debug!(
            shell = %shell.display(),
            cols = size.cols,
            rows = size.rows,
            "Spawning ConPTY shell"
        );

        let pair = native_pty_system()
            .openpty(size.into())
            .map_err(|e| PtyError::CreateFailed(e.to_string()))?;

        let mut child = pair
            .slave
            .spawn_command(CommandBuilder::new(shell))
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::CreateFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::CreateFailed(e.to_string()))?;
        let killer = child.clone_killer();
        let master: SharedMaster = Arc::new(Mutex::new(Some(pair.master)));

        // A pseudo console keeps its output pipe open after the shell exits;
        // closing it once the child is gone is what ends our reads.
        let exit_master = Arc::clone(&master);
        thread::Builder::new()
            .name("conpty-exit".into())
            .spawn(move || {
                let status = child.wait();
                tracing::debug!(?status, "ConPTY shell exited");
                drop(lock(&exit_master).take());
            })?;

        Ok(Self {
            master,
            reader: Mutex::new(reader),
            writer: Mutex::new(Some(writer)),
            killer: Mutex::new(killer),
            closed: AtomicBool::new(false),
        })
    }
}

impl Pty for ConPty {
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
        if let Err(e) = lock(&self.killer).kill() {
            tracing::debug!(?e, "ConPTY shell already gone");
        }
        drop(lock(&self.writer).take());
        drop(lock(&self.master).take());
        Ok(())
    }
}

impl Drop for ConPty {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!(?e, "Failed to close ConPTY on drop");
        }
    }
}
