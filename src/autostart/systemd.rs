//! systemd unit registration (Linux)

use std::path::PathBuf;
use tracing::debug;

use super::{
    remove_entry, run_tool, write_entry, BootCommand, PlatformResult, Registrar, SERVICE_NAME,
};

const SYSTEM_UNIT_DIR: &str = "/etc/systemd/system";

/// Installs `dualshare.service` as a system unit
#[derive(Debug, Clone)]
pub struct SystemdUnit {
    unit_dir: PathBuf,
    manage: bool,
}

impl Default for SystemdUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemdUnit {
    /// Unit in /etc/systemd/system, enabled through systemctl
    pub fn new() -> Self {
        Self {
            unit_dir: PathBuf::from(SYSTEM_UNIT_DIR),
            manage: true,
        }
    }

    /// Unit written into `unit_dir` without calling systemctl
    pub fn with_unit_dir(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            manage: false,
        }
    }

    fn unit_name() -> String {
        format!("{}.service", SERVICE_NAME)
    }

    /// Path of the unit file
    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(Self::unit_name())
    }
}

/// Render the unit file for `command`
pub fn render_unit(command: &BootCommand) -> String {
    let mut exec = vec![quote_arg(&command.program.display().to_string())];
    exec.extend(command.args.iter().map(|arg| quote_arg(arg)));

    format!(
        "[Unit]\n\
         Description=dualshare FTP and HTTP file sharing\n\
         Wants=network-online.target\n\
         After=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={exec}\n\
         Restart=on-failure\n\
         RestartSec=5\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        exec = exec.join(" ")
    )
}

/// systemd splits ExecStart on whitespace unless the word is double-quoted
fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        return arg.to_string();
    }
    let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

impl Registrar for SystemdUnit {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn install(&self, command: &BootCommand) -> PlatformResult<()> {
        let path = self.unit_path();
        write_entry(&path, &render_unit(command))?;

        if self.manage {
            run_tool("systemctl", &["daemon-reload"])?;
            run_tool("systemctl", &["enable", &Self::unit_name()])?;
        }
        Ok(())
    }

    fn uninstall(&self) -> PlatformResult<()> {
        let path = self.unit_path();
        if !path.exists() {
            debug!(path = %path.display(), "No unit installed");
            return Ok(());
        }

        if self.manage {
            run_tool("systemctl", &["disable", &Self::unit_name()])?;
        }
        remove_entry(&path)?;

        if self.manage {
            run_tool("systemctl", &["daemon-reload"])?;
        }
        Ok(())
    }

    fn is_installed(&self) -> bool {
        self.unit_path().exists()
    }
}
