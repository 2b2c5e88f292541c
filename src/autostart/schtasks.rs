//! Task Scheduler registration (Windows)

use super::{run_tool, BootCommand, PlatformError, PlatformResult, Registrar};

/// Scheduled task name
pub const TASK_NAME: &str = "DualShare";

/// Registers an ONSTART task running as SYSTEM
#[derive(Debug, Clone, Default)]
pub struct TaskScheduler;

impl TaskScheduler {
    pub fn new() -> Self {
        Self
    }
}

/// Build the `/TR` value for `command`
///
/// Every element is double-quoted so paths with spaces survive.
pub fn task_run_line(command: &BootCommand) -> String {
    std::iter::once(command.program.display().to_string())
        .chain(command.args.iter().cloned())
        .map(|part| format!("\"{}\"", part.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Registrar for TaskScheduler {
    fn name(&self) -> &'static str {
        "schtasks"
    }

    fn install(&self, command: &BootCommand) -> PlatformResult<()> {
        let run_line = task_run_line(command);
        run_tool(
            "schtasks",
            &[
                "/Create", "/F", "/TN", TASK_NAME, "/SC", "ONSTART", "/RU", "SYSTEM", "/RL",
                "HIGHEST", "/TR", &run_line,
            ],
        )
    }

    fn uninstall(&self) -> PlatformResult<()> {
        if !self.is_installed() {
            return Ok(());
        }
        match run_tool("schtasks", &["/Delete", "/F", "/TN", TASK_NAME]) {
            Err(PlatformError::CommandFailed { .. }) if !self.is_installed() => Ok(()),
            other => other,
        }
    }

    fn is_installed(&self) -> bool {
        run_tool("schtasks", &["/Query", "/TN", TASK_NAME]).is_ok()
    }
}
