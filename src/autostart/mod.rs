//! Boot-time autostart registration
//!
//! Each supported platform gets a [`Registrar`] that writes (or removes) a
//! boot entry re-launching `dualshare restore`. [`Autostart`] picks the
//! registrar for the host and ties it to the saved configuration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ConfigStore;

mod launchd;
mod schtasks;
mod systemd;

pub use launchd::LaunchDaemon;
pub use schtasks::TaskScheduler;
pub use systemd::SystemdUnit;

/// Name used for boot entries on every platform
pub const SERVICE_NAME: &str = "dualshare";

/// Error types for autostart operations
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("permission denied: {detail} (run again as root or administrator)")]
    PermissionDenied { detail: String },

    #[error("autostart is not supported on {os}")]
    UnsupportedPlatform { os: &'static str },

    #[error("no saved configuration; start the servers once before enabling autostart")]
    NoConfiguration,

    #[error("{tool} failed: {detail}")]
    CommandFailed { tool: String, detail: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for autostart operations
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Map a filesystem error, singling out refused privileged writes
pub(crate) fn io_err(path: impl Into<PathBuf>, source: io::Error) -> PlatformError {
    let path = path.into();
    if source.kind() == io::ErrorKind::PermissionDenied {
        PlatformError::PermissionDenied {
            detail: format!("cannot write {}", path.display()),
        }
    } else {
        PlatformError::Io { path, source }
    }
}

/// Write a boot entry file, replacing any previous one
pub(crate) fn write_entry(path: &Path, contents: &str) -> PlatformResult<()> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
    }
    fs::write(path, contents).map_err(|e| io_err(path, e))
}

/// Remove a boot entry file; a missing file is fine
pub(crate) fn remove_entry(path: &Path) -> PlatformResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Run a service management tool and classify its failure
pub(crate) fn run_tool(tool: &str, args: &[&str]) -> PlatformResult<()> {
    debug!(tool, ?args, "Running service tool");
    let output = Command::new(tool)
        .args(args)
        .output()
        .map_err(|e| PlatformError::CommandFailed {
            tool: tool.to_string(),
            detail: e.to_string(),
        })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let detail = format!("{} {}", stdout, stderr).trim().to_string();

    if looks_like_permission_problem(&detail) {
        Err(PlatformError::PermissionDenied { detail })
    } else {
        Err(PlatformError::CommandFailed {
            tool: tool.to_string(),
            detail: format!("exit status {}: {}", output.status, detail),
        })
    }
}

fn looks_like_permission_problem(output: &str) -> bool {
    let output = output.to_lowercase();
    [
        "access is denied",
        "permission denied",
        "operation not permitted",
        "authentication is required",
        "interactive authentication required",
    ]
    .iter()
    .any(|needle| output.contains(needle))
}

/// The command a boot entry runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl BootCommand {
    /// `<program> restore --config <record>`
    pub fn restore(program: impl Into<PathBuf>, record: &Path) -> Self {
        Self {
            program: program.into(),
            args: vec![
                "restore".to_string(),
                "--config".to_string(),
                record.display().to_string(),
            ],
        }
    }
}

/// Trait for autostart mechanisms
///
/// Each platform (Task Scheduler, systemd, launchd) implements this trait to
/// provide a consistent way of installing a boot entry.
pub trait Registrar: Send + Sync {
    /// Get the name of this mechanism
    fn name(&self) -> &'static str;

    /// Write the boot entry for `command`, overwriting an existing one
    fn install(&self, command: &BootCommand) -> PlatformResult<()>;

    /// Remove the boot entry if present
    fn uninstall(&self) -> PlatformResult<()>;

    /// Whether the boot entry currently exists
    fn is_installed(&self) -> bool;
}

/// Registrar for the current operating system, if there is one
pub fn host_registrar() -> Option<Box<dyn Registrar>> {
    if cfg!(target_os = "windows") {
        Some(Box::new(TaskScheduler::new()))
    } else if cfg!(target_os = "linux") {
        Some(Box::new(SystemdUnit::new()))
    } else if cfg!(target_os = "macos") {
        Some(Box::new(LaunchDaemon::new()))
    } else {
        None
    }
}

/// Enables and disables launching the saved configuration at boot
///
/// Calls are serialized; running listeners are never affected.
pub struct Autostart {
    registrar: Option<Box<dyn Registrar>>,
    store: ConfigStore,
    program: PathBuf,
    lock: Mutex<()>,
}

impl Autostart {
    /// Create an autostart controller over an explicit registrar
    pub fn new(registrar: Option<Box<dyn Registrar>>, store: ConfigStore, program: PathBuf) -> Self {
        Self {
            registrar,
            store,
            program,
            lock: Mutex::new(()),
        }
    }

    /// Autostart for this host, re-launching the running executable
    pub fn for_host(store: ConfigStore) -> PlatformResult<Self> {
        let program = std::env::current_exe().map_err(|e| io_err("current executable", e))?;
        Ok(Self::new(host_registrar(), store, program))
    }

    fn registrar(&self) -> PlatformResult<&dyn Registrar> {
        self.registrar
            .as_deref()
            .ok_or(PlatformError::UnsupportedPlatform {
                os: std::env::consts::OS,
            })
    }

    /// Install the boot entry for the saved configuration
    ///
    /// Enabling again rewrites the entry.
    pub fn enable(&self) -> PlatformResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut record = self.store.load().ok_or(PlatformError::NoConfiguration)?;
        let registrar = self.registrar()?;

        let command = BootCommand::restore(&self.program, self.store.path());
        registrar.install(&command)?;

        if !record.auto_start {
            record.set_auto_start(true);
            if let Err(e) = self.store.save(&record) {
                warn!(error = %e, "Boot entry installed but the record was not updated");
            }
        }

        info!(mechanism = registrar.name(), "Autostart enabled");
        Ok(())
    }

    /// Remove the boot entry
    pub fn disable(&self) -> PlatformResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let registrar = self.registrar()?;
        registrar.uninstall()?;

        if let Some(mut record) = self.store.load() {
            if record.auto_start {
                record.set_auto_start(false);
                if let Err(e) = self.store.save(&record) {
                    warn!(error = %e, "Boot entry removed but the record was not updated");
                }
            }
        }

        info!(mechanism = registrar.name(), "Autostart disabled");
        Ok(())
    }

    /// Whether a boot entry is installed
    pub fn status(&self) -> PlatformResult<bool> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.registrar()?.is_installed())
    }

    /// Name of the host mechanism
    pub fn mechanism(&self) -> Option<&'static str> {
        self.registrar.as_ref().map(|r| r.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[test]
    fn test_boot_command_restore() {
        let command = BootCommand::restore("/usr/bin/dualshare", Path::new("/etc/dualshare.toml"));
        assert_eq!(command.program, PathBuf::from("/usr/bin/dualshare"));
        assert_eq!(
            command.args,
            vec!["restore", "--config", "/etc/dualshare.toml"]
        );
    }

    #[test]
    fn test_permission_output_detection() {
        assert!(looks_like_permission_problem("ERROR: Access is denied."));
        assert!(looks_like_permission_problem(
            "Failed to enable unit: Interactive authentication required."
        ));
        assert!(!looks_like_permission_problem("Unit file does not exist."));
    }

    #[test]
    fn test_io_err_maps_permission_denied() {
        let err = io_err(
            "/etc/systemd/system/dualshare.service",
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(err, PlatformError::PermissionDenied { .. }));

        let err = io_err("/x", io::Error::new(io::ErrorKind::Other, "other"));
        assert!(matches!(err, PlatformError::Io { .. }));
    }

    #[test]
    fn test_missing_tool_is_command_failure() {
        let result = run_tool("definitely_not_a_real_binary_12345", &["--help"]);
        assert!(matches!(result, Err(PlatformError::CommandFailed { .. })));
    }

    #[test]
    fn test_host_registrar_matches_os() {
        let registrar = host_registrar();
        if cfg!(target_os = "linux") {
            assert_eq!(registrar.map(|r| r.name()), Some("systemd"));
        } else if cfg!(target_os = "macos") {
            assert_eq!(registrar.map(|r| r.name()), Some("launchd"));
        } else if cfg!(target_os = "windows") {
            assert_eq!(registrar.map(|r| r.name()), Some("schtasks"));
        }
    }

    #[test]
    fn test_remove_missing_entry_is_ok() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(remove_entry(&dir.path().join("absent")).is_ok());
    }

    fn autostart_in(dir: &Path) -> Autostart {
        Autostart::new(
            Some(Box::new(SystemdUnit::with_unit_dir(dir.join("units")))),
            ConfigStore::at(dir.join("config.toml")),
            PathBuf::from("/usr/bin/dualshare"),
        )
    }

    #[test]
    fn test_enable_without_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let autostart = autostart_in(dir.path());

        assert!(matches!(
            autostart.enable(),
            Err(PlatformError::NoConfiguration)
        ));
        assert!(!autostart.status().unwrap());
    }

    #[test]
    fn test_enable_and_disable_update_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path().join("config.toml"));
        store.save(&ServerConfig::new(dir.path())).unwrap();
        let autostart = autostart_in(dir.path());

        autostart.enable().unwrap();
        assert!(autostart.status().unwrap());
        assert!(store.load().unwrap().auto_start);

        autostart.disable().unwrap();
        assert!(!autostart.status().unwrap());
        assert!(!store.load().unwrap().auto_start);
    }

    #[test]
    fn test_unsupported_platform() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path().join("config.toml"));
        store.save(&ServerConfig::new(dir.path())).unwrap();
        let autostart = Autostart::new(None, store, PathBuf::from("dualshare"));

        assert!(matches!(
            autostart.enable(),
            Err(PlatformError::UnsupportedPlatform { .. })
        ));
        assert!(matches!(
            autostart.disable(),
            Err(PlatformError::UnsupportedPlatform { .. })
        ));
        assert_eq!(autostart.mechanism(), None);
    }
}
