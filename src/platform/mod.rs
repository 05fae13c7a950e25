use std::path::{Path, PathBuf};

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Build a **tokio** `Command` for the process-manager CLI (`pm2` / `pm2.cmd`).
    fn process_manager_command(bin: &str) -> tokio::process::Command;

    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &Path);

    /// Set restrictive *file* permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions(path: &Path);

    /// Root data directory for agentfleet.
    /// Unix: `~/.agentfleet`, Windows: `%APPDATA%\agentfleet`.
    fn data_dir() -> PathBuf;
}

pub const DATA_DIR_ENV: &str = "AGENTFLEET_DATA_DIR";

/// `AGENTFLEET_DATA_DIR` wins over the platform default.
pub(crate) fn resolve_data_dir(default: PathBuf) -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => default,
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
