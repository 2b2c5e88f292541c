//! Listener services exposing the shared directory
//!
//! This module provides an abstraction over the two network services that
//! serve the shared directory: an FTP server and a browsable HTTP file
//! server. Each one is started from a [`ListenerSpec`] and yields a
//! [`ListenerHandle`] that closes its socket when stopped.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

mod ftp;
mod http;
pub mod mock;

pub use ftp::FtpListener;
pub use http::{build_router, BrowseState, HttpListener, ListingTemplates};

/// The two services managed as a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    FileTransfer,
    WebBrowsing,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::FileTransfer => write!(f, "FTP"),
            ServiceKind::WebBrowsing => write!(f, "HTTP"),
        }
    }
}

/// Error types for listener operations
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied binding {address}")]
    PermissionDenied { address: SocketAddr },

    #[error("Listener exited during startup: {0}")]
    Exited(String),

    #[error("Listener fault: {0}")]
    Fault(String),
}

impl ListenerError {
    /// Classify a bind failure
    pub fn bind(address: SocketAddr, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            Self::PermissionDenied { address }
        } else {
            Self::Bind { address, source }
        }
    }
}

/// Result type for listener operations
pub type ListenerResult<T> = Result<T, ListenerError>;

/// The single credential pair accepted by the FTP service
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Everything a listener needs to start
#[derive(Debug, Clone)]
pub struct ListenerSpec {
    /// Address and port to bind
    pub bind: SocketAddr,
    /// Directory served as the root
    pub root: PathBuf,
    /// Login accepted by services that authenticate
    pub credential: Credential,
}

/// Handle to a running listener
///
/// Stopping fires the shutdown signal and waits for the serve task to
/// release its socket. When dropped without being stopped, the signal is
/// still fired but nothing waits for the task.
pub struct ListenerHandle {
    kind: ServiceKind,
    bound: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<ListenerResult<()>>>,
}

impl ListenerHandle {
    /// Create a new listener handle
    pub fn new(
        kind: ServiceKind,
        bound: SocketAddr,
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<ListenerResult<()>>,
    ) -> Self {
        Self {
            kind,
            bound,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// Which service this handle belongs to
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Address the listener is bound to
    pub fn bound_address(&self) -> SocketAddr {
        self.bound
    }

    /// Check if the serve task is still running
    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Signal the listener to close its socket and wait for it to finish
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The receiver is gone if the task already exited
            let _ = shutdown.send(());
        }

        if let Some(task) = self.task.take() {
            match task.await {
                Ok(Ok(())) => debug!(kind = %self.kind, address = %self.bound, "Listener stopped"),
                Ok(Err(e)) => warn!(kind = %self.kind, error = %e, "Listener ended with an error"),
                Err(e) => warn!(kind = %self.kind, error = %e, "Listener task failed"),
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("kind", &self.kind)
            .field("bound", &self.bound)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Trait for listener services
///
/// The FTP and HTTP services implement this trait so the lifecycle manager
/// can start and stop them without knowing their protocols.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Which service this listener provides
    fn kind(&self) -> ServiceKind;

    /// Get the name of this listener (for logging)
    fn name(&self) -> &'static str;

    /// Bind and start serving
    ///
    /// Returns once the socket is bound and the serve loop is running, or
    /// with the error that prevented it.
    async fn start(&self, spec: ListenerSpec) -> ListenerResult<ListenerHandle>;
}
