//! Integration tests for boot entry registration.
//!
//! Registrars write into temporary directories and never call the system
//! service tools.

use std::fs;
use std::path::PathBuf;

use dualshare::autostart::{Autostart, LaunchDaemon, PlatformError, Registrar, SystemdUnit};
use dualshare::config::{ConfigStore, ServerConfig};
use tempfile::TempDir;

const PROGRAM: &str = "/usr/local/bin/dualshare";

fn store_in(dir: &TempDir) -> ConfigStore {
    ConfigStore::at(dir.path().join("config.toml"))
}

fn systemd_autostart(dir: &TempDir) -> (Autostart, PathBuf) {
    let units = dir.path().join("units");
    let autostart = Autostart::new(
        Some(Box::new(SystemdUnit::with_unit_dir(&units))),
        store_in(dir),
        PathBuf::from(PROGRAM),
    );
    (autostart, units.join("dualshare.service"))
}

#[test]
fn test_enable_without_saved_configuration() {
    let dir = TempDir::new().unwrap();
    let (autostart, unit) = systemd_autostart(&dir);

    let result = autostart.enable();
    assert!(matches!(result, Err(PlatformError::NoConfiguration)));
    assert!(!unit.exists());
}

#[test]
fn test_enable_writes_restore_entry() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.save(&ServerConfig::new(dir.path())).unwrap();
    let (autostart, unit) = systemd_autostart(&dir);

    autostart.enable().unwrap();

    let contents = fs::read_to_string(&unit).unwrap();
    let expected = format!(
        "ExecStart={} restore --config {}",
        PROGRAM,
        store.path().display()
    );
    assert!(contents.contains(&expected), "unit was:\n{contents}");
    assert!(store.load().unwrap().auto_start);
    assert!(autostart.status().unwrap());
}

#[test]
fn test_enable_twice_overwrites() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.save(&ServerConfig::new(dir.path())).unwrap();
    let (autostart, unit) = systemd_autostart(&dir);

    autostart.enable().unwrap();
    fs::write(&unit, "stale").unwrap();
    autostart.enable().unwrap();

    let contents = fs::read_to_string(&unit).unwrap();
    assert!(contents.contains("[Service]"));
    assert_eq!(fs::read_dir(unit.parent().unwrap()).unwrap().count(), 1);
}

#[test]
fn test_disable_removes_entry_and_clears_flag() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.save(&ServerConfig::new(dir.path())).unwrap();
    let (autostart, unit) = systemd_autostart(&dir);

    autostart.enable().unwrap();
    autostart.disable().unwrap();

    assert!(!unit.exists());
    assert!(!store.load().unwrap().auto_start);
    assert!(!autostart.status().unwrap());

    // disabling again is not an error
    autostart.disable().unwrap();
}

#[test]
fn test_disable_without_record() {
    let dir = TempDir::new().unwrap();
    let (autostart, _) = systemd_autostart(&dir);

    autostart.disable().unwrap();
    assert!(store_in(&dir).load().is_none());
}

#[cfg(unix)]
#[test]
fn test_unwritable_entry_dir_is_permission_denied() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.save(&ServerConfig::new(dir.path())).unwrap();

    let locked = dir.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o500)).unwrap();

    // root ignores directory permissions
    if fs::write(locked.join("probe"), "").is_ok() {
        return;
    }

    let autostart = Autostart::new(
        Some(Box::new(SystemdUnit::with_unit_dir(&locked))),
        store.clone(),
        PathBuf::from(PROGRAM),
    );
    let result = autostart.enable();
    assert!(matches!(result, Err(PlatformError::PermissionDenied { .. })));
    assert!(!store.load().unwrap().auto_start);

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o700)).unwrap();
}

#[test]
fn test_launch_daemon_plist_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.save(&ServerConfig::new(dir.path())).unwrap();
    let daemon = LaunchDaemon::with_daemon_dir(dir.path().join("daemons"));
    let plist_path = daemon.plist_path();

    let autostart = Autostart::new(Some(Box::new(daemon)), store.clone(), PathBuf::from(PROGRAM));
    autostart.enable().unwrap();

    let value = plist::Value::from_file(&plist_path).unwrap();
    let arguments: Vec<String> = value
        .as_dictionary()
        .and_then(|dict| dict.get("ProgramArguments"))
        .and_then(|args| args.as_array())
        .unwrap()
        .iter()
        .filter_map(|arg| arg.as_string().map(str::to_string))
        .collect();
    assert_eq!(arguments[0], PROGRAM);
    assert_eq!(arguments[1], "restore");
    assert_eq!(arguments[3], store.path().display().to_string());
    assert_eq!(autostart.mechanism(), Some("launchd"));
}

#[test]
fn test_registrar_trait_objects() {
    let dir = TempDir::new().unwrap();
    let registrars: Vec<Box<dyn Registrar>> = vec![
        Box::new(SystemdUnit::with_unit_dir(dir.path())),
        Box::new(LaunchDaemon::with_daemon_dir(dir.path())),
    ];

    let names: Vec<&str> = registrars.iter().map(|r| r.name()).collect();
    assert_eq!(names, vec!["systemd", "launchd"]);
    assert!(registrars.iter().all(|r| !r.is_installed()));
}
