//! Integration tests for starting and stopping the listener pair.
//!
//! These tests drive LifecycleManager through MockListener, so every port
//! is a real socket but no protocol is spoken.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use dualshare::config::{ConfigStore, ServerConfig};
use dualshare::lifecycle::{LifecycleError, LifecycleManager, ServiceState};
use dualshare::listener::mock::{MockConfig, MockError, MockListener};
use dualshare::listener::ServiceKind;
use dualshare::preflight::{Preflight, ValidationError};
use tempfile::TempDir;

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Two distinct ports that were free a moment ago.
fn free_ports() -> (u16, u16) {
    let first = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let second = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    (
        first.local_addr().unwrap().port(),
        second.local_addr().unwrap().port(),
    )
}

fn config_for(dir: &TempDir) -> ServerConfig {
    let (ftp_port, http_port) = free_ports();
    let mut config = ServerConfig::new(dir.path());
    config.set_ports(ftp_port, http_port);
    config
}

fn manager(ftp: &MockListener, web: &MockListener) -> LifecycleManager {
    LifecycleManager::new(
        Box::new(ftp.clone()),
        Box::new(web.clone()),
        Preflight::with_address(LOOPBACK),
    )
}

fn mocks() -> (MockListener, MockListener) {
    (
        MockListener::new(ServiceKind::FileTransfer),
        MockListener::new(ServiceKind::WebBrowsing),
    )
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_foreign_listener_fails_preflight() {
    let dir = TempDir::new().unwrap();
    let (ftp, web) = mocks();
    let manager = manager(&ftp, &web);

    let foreign = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let mut config = config_for(&dir);
    config.ftp_port = foreign.local_addr().unwrap().port();

    let result = manager.start_all(config.clone()).await;
    match result {
        Err(LifecycleError::Validation(ValidationError::PortInUse { port, .. })) => {
            assert_eq!(port, config.ftp_port)
        }
        other => panic!("expected PortInUse, got {:?}", other),
    }
    assert_eq!(ftp.start_attempts(), 0);
    assert_eq!(web.start_attempts(), 0);
    assert!(manager.status().is_stopped());
}

#[tokio::test]
async fn test_privileged_port_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (ftp, web) = mocks();
    let manager = manager(&ftp, &web);

    let mut config = config_for(&dir);
    config.http_port = 80;

    let result = manager.start_all(config).await;
    assert!(matches!(
        result,
        Err(LifecycleError::Validation(ValidationError::PrivilegedPort { port: 80 }))
    ));
    assert_eq!(ftp.start_attempts(), 0);
}

#[tokio::test]
async fn test_same_port_for_both_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (ftp, web) = mocks();
    let manager = manager(&ftp, &web);

    let mut config = config_for(&dir);
    config.http_port = config.ftp_port;

    let result = manager.start_all(config).await;
    assert!(matches!(
        result,
        Err(LifecycleError::Validation(ValidationError::PortConflict { .. }))
    ));
}

// ============================================================================
// Rollback
// ============================================================================

#[tokio::test]
async fn test_web_bind_failure_releases_ftp_port() {
    let dir = TempDir::new().unwrap();
    let ftp = MockListener::new(ServiceKind::FileTransfer);
    let web = MockListener::with_config(
        ServiceKind::WebBrowsing,
        MockConfig::with_error(MockError::AddressInUse),
    );
    let manager = manager(&ftp, &web);
    let config = config_for(&dir);

    let result = manager.start_all(config.clone()).await;
    assert!(matches!(
        result,
        Err(LifecycleError::PartialStartFailure {
            kind: ServiceKind::WebBrowsing,
            ..
        })
    ));

    let status = manager.status();
    assert_eq!(status.file_transfer.state, ServiceState::Stopped);
    assert_eq!(status.web.state, ServiceState::Stopped);
    assert!(TcpListener::bind(SocketAddr::new(LOOPBACK, config.ftp_port)).is_ok());

    // a failed start leaves the manager usable
    let healthy_web = MockListener::new(ServiceKind::WebBrowsing);
    let retry = LifecycleManager::new(
        Box::new(ftp.clone()),
        Box::new(healthy_web),
        Preflight::with_address(LOOPBACK),
    );
    retry.start_all(config_for(&dir)).await.unwrap();
    retry.stop_all().await;
}

#[tokio::test]
async fn test_observer_sees_starting_then_running() {
    let dir = TempDir::new().unwrap();
    let ftp = MockListener::with_config(
        ServiceKind::FileTransfer,
        MockConfig::with_delay(Duration::from_millis(100)),
    );
    let web = MockListener::new(ServiceKind::WebBrowsing);
    let manager = Arc::new(manager(&ftp, &web));
    let mut rx = manager.subscribe();

    let starter = {
        let manager = Arc::clone(&manager);
        let config = config_for(&dir);
        tokio::spawn(async move { manager.start_all(config).await })
    };

    rx.wait_for(|status| status.file_transfer.state == ServiceState::Starting)
        .await
        .unwrap();
    rx.wait_for(|status| status.is_running()).await.unwrap();

    starter.await.unwrap().unwrap();
    manager.stop_all().await;
    assert!(manager.status().is_stopped());
}

// ============================================================================
// Stop
// ============================================================================

#[tokio::test]
async fn test_concurrent_stops_close_once() {
    let dir = TempDir::new().unwrap();
    let (ftp, web) = mocks();
    let manager = Arc::new(manager(&ftp, &web));

    let pair = manager.start_all(config_for(&dir)).await.unwrap();

    let first = Arc::clone(&manager);
    let second = Arc::clone(&manager);
    tokio::join!(first.stop_all(), second.stop_all());

    assert!(manager.status().is_stopped());
    assert!(TcpListener::bind(pair.file_transfer).is_ok());
    assert!(TcpListener::bind(pair.web).is_ok());
}

#[tokio::test]
async fn test_restart_after_stop() {
    let dir = TempDir::new().unwrap();
    let (ftp, web) = mocks();
    let manager = manager(&ftp, &web);
    let config = config_for(&dir);

    manager.start_all(config.clone()).await.unwrap();
    manager.stop_all().await;
    manager.start_all(config).await.unwrap();
    assert!(manager.status().is_running());
    manager.stop_all().await;

    assert_eq!(ftp.start_attempts(), 2);
    assert_eq!(web.start_attempts(), 2);
}

// ============================================================================
// Restore
// ============================================================================

#[tokio::test]
async fn test_restore_uses_saved_record() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::at(dir.path().join("config.toml"));
    let config = config_for(&dir);
    store.save(&config).unwrap();

    let (ftp, web) = mocks();
    let manager = manager(&ftp, &web);

    let pair = manager.restore(&store).await.unwrap();
    assert_eq!(pair.file_transfer.port(), config.ftp_port);
    assert_eq!(pair.web.port(), config.http_port);
    manager.stop_all().await;
}

#[tokio::test]
async fn test_restore_with_corrupt_record() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "ftp_port = \"not a number\"").unwrap();

    let (ftp, web) = mocks();
    let manager = manager(&ftp, &web);

    let result = manager.restore(&ConfigStore::at(path)).await;
    assert!(matches!(result, Err(LifecycleError::NoConfiguration)));
    assert_eq!(ftp.start_attempts(), 0);
}
