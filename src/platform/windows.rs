use std::path::{Path, PathBuf};

use super::{Platform, resolve_data_dir};

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn process_manager_command(bin: &str) -> tokio::process::Command {
        // npm installs pm2 as a .cmd shim on Windows.
        let program = if bin.ends_with(".cmd") || bin.ends_with(".exe") {
            bin.to_string()
        } else {
            format!("{}.cmd", bin)
        };
        let mut cmd = tokio::process::Command::new(program);
        cmd.kill_on_drop(true);
        cmd
    }

    fn restrict_dir_permissions(_path: &Path) {}

    fn restrict_file_permissions(_path: &Path) {}

    fn data_dir() -> PathBuf {
        resolve_data_dir(
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("agentfleet"),
        )
    }
}
