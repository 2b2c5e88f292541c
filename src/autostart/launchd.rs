//! launchd daemon registration (macOS)

use std::path::PathBuf;

use tracing::{debug, warn, Level};

use super::{
    remove_entry, run_tool, write_entry, BootCommand, PlatformError, PlatformResult, Registrar,
};

/// launchd label for the boot entry
pub const DAEMON_LABEL: &str = "com.dualshare.server";

const SYSTEM_DAEMON_DIR: &str = "/Library/LaunchDaemons";

/// Installs a system LaunchDaemon plist
#[derive(Debug, Clone)]
pub struct LaunchDaemon {
    daemon_dir: PathBuf,
    manage: bool,
}

impl Default for LaunchDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl LaunchDaemon {
    /// Plist in /Library/LaunchDaemons, loaded into the system domain
    pub fn new() -> Self {
        Self {
            daemon_dir: PathBuf::from(SYSTEM_DAEMON_DIR),
            manage: true,
        }
    }

    /// Plist written into `daemon_dir` without calling launchctl
    pub fn with_daemon_dir(daemon_dir: impl Into<PathBuf>) -> Self {
        Self {
            daemon_dir: daemon_dir.into(),
            manage: false,
        }
    }

    /// Path of the plist file
    pub fn plist_path(&self) -> PathBuf {
        self.daemon_dir.join(format!("{}.plist", DAEMON_LABEL))
    }
}

/// Generate the launchd plist for `command`
pub fn generate_plist(command: &BootCommand) -> String {
    let mut arguments = String::new();
    arguments.push_str(&format!(
        "    <string>{}</string>\n",
        xml_escape(&command.program.display().to_string())
    ));
    for arg in &command.args {
        arguments.push_str(&format!("    <string>{}</string>\n", xml_escape(arg)));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key>
  <string>{label}</string>
  <key>ProgramArguments</key>
  <array>
{arguments}  </array>
  <key>RunAtLoad</key>
  <true/>
  <key>KeepAlive</key>
  <dict>
    <key>SuccessfulExit</key>
    <false/>
  </dict>
</dict>
</plist>
"#,
        label = DAEMON_LABEL,
        arguments = arguments,
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Unload the daemon from the system domain
///
/// Failure is tolerated since the daemon is not loaded on first enable.
fn bootout() {
    let service = format!("system/{}", DAEMON_LABEL);
    report_bootout(&service, run_tool("launchctl", &["bootout", &service]));
}

/// Log a bootout result; a refusal is a warning, anything else debug
fn report_bootout(service: &str, result: PlatformResult<()>) -> Level {
    match result {
        Ok(()) => {
            debug!(service, "Daemon unloaded");
            Level::DEBUG
        }
        Err(e @ PlatformError::PermissionDenied { .. }) => {
            warn!(service, error = %e, "launchctl bootout was refused");
            Level::WARN
        }
        Err(e) => {
            debug!(service, error = %e, "Daemon was not loaded");
            Level::DEBUG
        }
    }
}

impl Registrar for LaunchDaemon {
    fn name(&self) -> &'static str {
        "launchd"
    }

    fn install(&self, command: &BootCommand) -> PlatformResult<()> {
        let plist = self.plist_path();
        write_entry(&plist, &generate_plist(command))?;

        if self.manage {
            bootout();
            run_tool(
                "launchctl",
                &["bootstrap", "system", &plist.display().to_string()],
            )?;
        }
        Ok(())
    }

    fn uninstall(&self) -> PlatformResult<()> {
        let plist = self.plist_path();
        if self.manage && plist.exists() {
            bootout();
        }
        remove_entry(&plist)
    }

    fn is_installed(&self) -> bool {
        self.plist_path().exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_generate_plist_is_valid() {
        let command = BootCommand::restore(
            "/usr/local/bin/dualshare",
            Path::new("/Users/alice/Library/Application Support/dualshare/config.toml"),
        );
        let xml = generate_plist(&command);

        let value = plist::Value::from_reader_xml(xml.as_bytes()).unwrap();
        let dict = value.as_dictionary().unwrap();
        assert_eq!(
            dict.get("Label").and_then(|v| v.as_string()),
            Some(DAEMON_LABEL)
        );
        assert_eq!(
            dict.get("RunAtLoad").and_then(|v| v.as_boolean()),
            Some(true)
        );

        let arguments: Vec<&str> = dict
            .get("ProgramArguments")
            .and_then(|v| v.as_array())
            .unwrap()
            .iter()
            .filter_map(|v| v.as_string())
            .collect();
        assert_eq!(
            arguments,
            vec![
                "/usr/local/bin/dualshare",
                "restore",
                "--config",
                "/Users/alice/Library/Application Support/dualshare/config.toml",
            ]
        );
    }

    #[test]
    fn test_generate_plist_escapes_xml() {
        let command = BootCommand::restore("/opt/a&b/dualshare", Path::new("/tmp/<x>.toml"));
        let xml = generate_plist(&command);

        assert!(xml.contains("/opt/a&amp;b/dualshare"));
        assert!(xml.contains("/tmp/&lt;x&gt;.toml"));
        assert!(plist::Value::from_reader_xml(xml.as_bytes()).is_ok());
    }

    #[test]
    fn test_report_bootout_warns_only_on_refusal() {
        let service = "system/com.dualshare.server";

        assert_eq!(report_bootout(service, Ok(())), Level::DEBUG);
        let not_loaded = PlatformError::CommandFailed {
            tool: "launchctl".to_string(),
            detail: "Boot-out failed: 3: No such process".to_string(),
        };
        assert_eq!(report_bootout(service, Err(not_loaded)), Level::DEBUG);

        let refused = PlatformError::PermissionDenied {
            detail: "launchctl: Operation not permitted".to_string(),
        };
        assert_eq!(report_bootout(service, Err(refused)), Level::WARN);
    }

    #[test]
    fn test_install_and_uninstall() {
        let dir = TempDir::new().unwrap();
        let daemon = LaunchDaemon::with_daemon_dir(dir.path());
        let command = BootCommand::restore("/usr/local/bin/dualshare", Path::new("/tmp/c.toml"));

        daemon.install(&command).unwrap();
        assert!(daemon.is_installed());
        assert!(daemon
            .plist_path()
            .ends_with("com.dualshare.server.plist"));

        daemon.uninstall().unwrap();
        assert!(!daemon.is_installed());
    }
}
