//! Lifecycle of the FTP/HTTP listener pair
//!
//! The [`LifecycleManager`] owns both listeners and starts and stops them as
//! one unit: preflight first, FTP before HTTP, rollback in reverse order if
//! either fails, and a persisted record once both are up.

use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigStore, ServerConfig};
use crate::listener::{
    Credential, FtpListener, HttpListener, Listener, ListenerError, ListenerHandle, ListenerSpec,
    ServiceKind,
};
use crate::preflight::{Preflight, ValidationError};

/// Errors that can occur while starting the pair
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{kind} server failed to start, nothing is left running: {source}")]
    PartialStartFailure {
        kind: ServiceKind,
        #[source]
        source: ListenerError,
    },

    #[error("the servers are already running; stop them first")]
    AlreadyRunning,

    #[error("no saved configuration to restore; start the servers interactively once")]
    NoConfiguration,

    #[error("preflight checks did not finish: {0}")]
    PreflightAborted(String),
}

/// Result type for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Lifecycle state of one listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Failed,
    Stopping,
}

impl ServiceState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_become(self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Failed, Stopped)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }
}

/// Observable record of one listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub kind: ServiceKind,
    pub state: ServiceState,
    pub bound_address: Option<SocketAddr>,
}

impl ServiceHandle {
    fn new(kind: ServiceKind) -> Self {
        Self {
            kind,
            state: ServiceState::Stopped,
            bound_address: None,
        }
    }

    fn transition(&mut self, next: ServiceState) {
        debug_assert!(
            self.state.can_become(next),
            "illegal {} transition {:?} -> {:?}",
            self.kind,
            self.state,
            next
        );
        debug!(kind = %self.kind, from = ?self.state, to = ?next, "Service state change");
        self.state = next;
        if next == ServiceState::Stopped {
            self.bound_address = None;
        }
    }
}

/// Snapshot of both listeners, published on every transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairStatus {
    pub file_transfer: ServiceHandle,
    pub web: ServiceHandle,
}

impl PairStatus {
    fn stopped() -> Self {
        Self {
            file_transfer: ServiceHandle::new(ServiceKind::FileTransfer),
            web: ServiceHandle::new(ServiceKind::WebBrowsing),
        }
    }

    /// Both listeners are up
    pub fn is_running(&self) -> bool {
        self.file_transfer.state == ServiceState::Running && self.web.state == ServiceState::Running
    }

    /// Both listeners are down
    pub fn is_stopped(&self) -> bool {
        self.file_transfer.state == ServiceState::Stopped && self.web.state == ServiceState::Stopped
    }

    fn get_mut(&mut self, kind: ServiceKind) -> &mut ServiceHandle {
        match kind {
            ServiceKind::FileTransfer => &mut self.file_transfer,
            ServiceKind::WebBrowsing => &mut self.web,
        }
    }
}

/// Where the pair ended up after a successful start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningPair {
    /// Address chosen by preflight
    pub address: IpAddr,
    /// True when address detection fell back to loopback
    pub degraded: bool,
    pub file_transfer: SocketAddr,
    pub web: SocketAddr,
}

struct Inner {
    status: PairStatus,
    /// Running listeners in start order
    running: Vec<ListenerHandle>,
}

/// Starts and stops the FTP and HTTP listeners as a pair
///
/// Only one start or stop runs at a time; concurrent callers queue on an
/// internal lock, so sockets are closed exactly once.
pub struct LifecycleManager {
    file_transfer: Box<dyn Listener>,
    web: Box<dyn Listener>,
    preflight: Preflight,
    store: Option<ConfigStore>,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<PairStatus>,
}

impl LifecycleManager {
    /// Create a manager over the given listeners
    pub fn new(file_transfer: Box<dyn Listener>, web: Box<dyn Listener>, preflight: Preflight) -> Self {
        let (status_tx, _) = watch::channel(PairStatus::stopped());
        Self {
            file_transfer,
            web,
            preflight,
            store: None,
            inner: Mutex::new(Inner {
                status: PairStatus::stopped(),
                running: Vec::new(),
            }),
            status_tx,
        }
    }

    /// Create a manager with the real FTP and HTTP listeners
    pub fn standard(preflight: Preflight, store: ConfigStore) -> Self {
        Self::new(Box::new(FtpListener::new()), Box::new(HttpListener::new()), preflight)
            .with_store(store)
    }

    /// Persist every successfully started configuration to `store`
    pub fn with_store(mut self, store: ConfigStore) -> Self {
        self.store = Some(store);
        self
    }

    /// The store used for persistence, if any
    pub fn store(&self) -> Option<&ConfigStore> {
        self.store.as_ref()
    }

    /// Latest published snapshot of both listeners
    pub fn status(&self) -> PairStatus {
        self.status_tx.borrow().clone()
    }

    /// Get notified of every state change
    pub fn subscribe(&self) -> watch::Receiver<PairStatus> {
        self.status_tx.subscribe()
    }

    fn publish(&self, inner: &Inner) {
        self.status_tx.send_replace(inner.status.clone());
    }

    fn set_state(&self, inner: &mut Inner, kind: ServiceKind, state: ServiceState) {
        inner.status.get_mut(kind).transition(state);
        self.publish(inner);
    }

    /// Validate `config` and bring up both listeners
    ///
    /// On validation failure nothing is touched. If either listener fails,
    /// whatever started is stopped again before the error is returned.
    pub async fn start_all(&self, config: ServerConfig) -> LifecycleResult<RunningPair> {
        let mut inner = self.inner.lock().await;
        if !inner.running.is_empty() {
            return Err(LifecycleError::AlreadyRunning);
        }

        // socket probes can wait out their timeout
        let preflight = self.preflight.clone();
        let checked = config.clone();
        let report = tokio::task::spawn_blocking(move || preflight.run(&checked))
            .await
            .map_err(|e| LifecycleError::PreflightAborted(e.to_string()))?
            .map_err(|e| {
                warn!(error = %e, "Preflight rejected configuration");
                e
            })?;
        if report.degraded {
            warn!(address = %report.address, "Serving on loopback only; other machines cannot connect");
        }

        let credential = Credential::new(config.username.clone(), config.password.clone());
        let ftp_address = SocketAddr::new(report.address, config.ftp_port);
        let web_address = SocketAddr::new(report.address, config.http_port);

        let file_transfer = self
            .start_one(
                &mut inner,
                self.file_transfer.as_ref(),
                ListenerSpec {
                    bind: ftp_address,
                    root: config.directory.clone(),
                    credential: credential.clone(),
                },
            )
            .await?;

        let web = self
            .start_one(
                &mut inner,
                self.web.as_ref(),
                ListenerSpec {
                    bind: web_address,
                    root: config.directory.clone(),
                    credential,
                },
            )
            .await?;

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&config) {
                warn!(path = %store.path().display(), error = %e, "Could not persist configuration");
            }
        }

        info!(ftp = %file_transfer, http = %web, directory = %config.directory.display(), "Sharing started");
        Ok(RunningPair {
            address: report.address,
            degraded: report.degraded,
            file_transfer,
            web,
        })
    }

    /// Start one listener, rolling back everything on failure
    async fn start_one(
        &self,
        inner: &mut Inner,
        listener: &dyn Listener,
        spec: ListenerSpec,
    ) -> LifecycleResult<SocketAddr> {
        let kind = listener.kind();
        self.set_state(inner, kind, ServiceState::Starting);

        match listener.start(spec).await {
            Ok(handle) => {
                let bound = handle.bound_address();
                inner.status.get_mut(kind).bound_address = Some(bound);
                inner.running.push(handle);
                self.set_state(inner, kind, ServiceState::Running);
                Ok(bound)
            }
            Err(source) => {
                error!(kind = %kind, listener = listener.name(), error = %source, "Listener failed to start");
                self.set_state(inner, kind, ServiceState::Failed);
                self.halt(inner).await;
                self.set_state(inner, kind, ServiceState::Stopped);
                Err(LifecycleError::PartialStartFailure { kind, source })
            }
        }
    }

    /// Stop both listeners
    ///
    /// Safe to call when nothing is running and from several tasks at once.
    pub async fn stop_all(&self) {
        let mut inner = self.inner.lock().await;
        if inner.running.is_empty() {
            debug!("Stop requested but nothing is running");
            return;
        }

        info!("Stopping servers");
        self.halt(&mut inner).await;
        info!("Servers stopped");
    }

    /// Stop running listeners in reverse start order
    async fn halt(&self, inner: &mut Inner) {
        while let Some(mut handle) = inner.running.pop() {
            let kind = handle.kind();
            self.set_state(inner, kind, ServiceState::Stopping);
            handle.stop().await;
            self.set_state(inner, kind, ServiceState::Stopped);
        }
    }

    /// Start from the record in `store` without asking for input
    pub async fn restore(&self, store: &ConfigStore) -> LifecycleResult<RunningPair> {
        let config = store.load().ok_or(LifecycleError::NoConfiguration)?;
        info!(path = %store.path().display(), "Restoring saved configuration");
        self.start_all(config).await
    }
}
