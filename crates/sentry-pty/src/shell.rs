//! Cross-platform shell detection.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use crate::PtyError;

/// Shell used when `$SHELL` is unset or unusable.
pub const DEFAULT_UNIX_SHELL: &str = "/bin/bash";

/// Last-resort shell on systems without bash.
const FALLBACK_UNIX_SHELL: &str = "/bin/sh";

/// PowerShell flavours in order of preference.
const WINDOWS_SHELLS: [&str; 2] = ["pwsh.exe", "powershell.exe"];

/// Returns the path to an interactive shell for the current platform.
///
/// On Windows, prefers PowerShell 7 (`pwsh.exe`), falling back to Windows
/// PowerShell. On Unix, returns the user's configured shell from `$SHELL`.
///
/// # Errors
/// Returns `PtyError::ShellNotFound` if no candidate exists.
pub fn interactive_shell() -> Result<PathBuf, PtyError> {
    if cfg!(windows) {
        WINDOWS_SHELLS
            .iter()
            .find_map(|name| resolve_executable_path(name))
            .ok_or_else(|| PtyError::ShellNotFound(WINDOWS_SHELLS.join(", ")))
    } else {
        UnixShell::current_shell()
            .map(|shell| shell.path().to_path_buf())
            .ok_or_else(|| {
                PtyError::ShellNotFound(format!("{DEFAULT_UNIX_SHELL}, {FALLBACK_UNIX_SHELL}"))
            })
    }
}

/// Resolve an executable by name.
///
/// Absolute paths are accepted as-is when they point at a file; anything
/// else is looked up on the current `PATH`.
#[must_use]
pub fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    which::which(executable).ok()
}

/// Unix shell types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnixShell {
    Zsh(PathBuf),
    Bash(PathBuf),
    Sh(PathBuf),
    Other(PathBuf),
}

impl UnixShell {
    /// Get the shell path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Zsh(p) | Self::Bash(p) | Self::Sh(p) | Self::Other(p) => p,
        }
    }

    /// Get the current shell from `$SHELL`, falling back to bash then sh.
    #[must_use]
    pub fn current_shell() -> Option<Self> {
        Self::select(std::env::var("SHELL").ok().as_deref())
    }

    fn select(configured: Option<&str>) -> Option<Self> {
        configured
            .into_iter()
            .chain([DEFAULT_UNIX_SHELL, FALLBACK_UNIX_SHELL])
            .find_map(|candidate| Self::from_path(Path::new(candidate)))
    }

    /// Create from a path. The path must be absolute and exist.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        if !(path.is_absolute() && path.is_file()) {
            return None;
        }
        let path_buf = path.to_path_buf();
        let shell = match path.file_name().and_then(OsStr::to_str) {
            Some("zsh") => Self::Zsh(path_buf),
            Some("bash") => Self::Bash(path_buf),
            Some("sh") => Self::Sh(path_buf),
            _ => Self::Other(path_buf),
        };
        Some(shell)
    }
}
