//! Mock listener for testing.
//!
//! Binds a real socket (so port usage is observable) but speaks no protocol:
//! accepted connections are dropped straight away. Supports simulated
//! startup delays and configurable start failures.

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener as TokioTcpListener;
use tokio::sync::oneshot;

use super::{Listener, ListenerError, ListenerHandle, ListenerResult, ListenerSpec, ServiceKind};

/// Type of error to simulate during start.
#[derive(Debug, Clone)]
pub enum MockError {
    /// Simulate the port being taken.
    AddressInUse,
    /// Simulate the OS refusing the bind.
    PermissionDenied,
    /// Simulate an unexpected fault with the given message.
    Fault(String),
}

/// Configuration for mock listener behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Simulated startup delay before binding.
    pub startup_delay: Option<Duration>,
    /// If set, start() will return this error instead of a handle.
    pub error: Option<MockError>,
}

impl MockConfig {
    /// Create a config with a startup delay.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            startup_delay: Some(delay),
            ..Default::default()
        }
    }

    /// Create a config that simulates an error on start.
    pub fn with_error(error: MockError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Mock listener for testing.
///
/// Clones share the same start counter, so a test can keep one clone and
/// hand the other to the lifecycle manager.
///
/// # Examples
///
/// ```ignore
/// use dualshare::listener::mock::{MockConfig, MockError, MockListener};
/// use dualshare::listener::ServiceKind;
///
/// let ftp = MockListener::new(ServiceKind::FileTransfer);
/// let http = MockListener::with_config(
///     ServiceKind::WebBrowsing,
///     MockConfig::with_error(MockError::AddressInUse),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct MockListener {
    kind: ServiceKind,
    config: Arc<MockConfig>,
    starts: Arc<AtomicUsize>,
}

impl MockListener {
    /// Create a new mock listener that starts successfully.
    pub fn new(kind: ServiceKind) -> Self {
        Self::with_config(kind, MockConfig::default())
    }

    /// Create a mock listener with custom configuration.
    pub fn with_config(kind: ServiceKind, config: MockConfig) -> Self {
        Self {
            kind,
            config: Arc::new(config),
            starts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of times start() has been called.
    pub fn start_attempts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Listener for MockListener {
    fn kind(&self) -> ServiceKind {
        self.kind
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    async fn start(&self, spec: ListenerSpec) -> ListenerResult<ListenerHandle> {
        self.starts.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.config.startup_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(ref err) = self.config.error {
            return Err(match err {
                MockError::AddressInUse => ListenerError::bind(
                    spec.bind,
                    io::Error::new(io::ErrorKind::AddrInUse, "simulated address in use"),
                ),
                MockError::PermissionDenied => ListenerError::PermissionDenied { address: spec.bind },
                MockError::Fault(msg) => ListenerError::Fault(msg.clone()),
            });
        }

        let listener = TokioTcpListener::bind(spec.bind)
            .await
            .map_err(|e| ListenerError::bind(spec.bind, e))?;
        let bound = listener
            .local_addr()
            .map_err(|e| ListenerError::bind(spec.bind, e))?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        if let Err(e) = accepted {
                            return Err(ListenerError::Fault(e.to_string()));
                        }
                    }
                }
            }
            Ok(())
        });

        Ok(ListenerHandle::new(self.kind, bound, shutdown_tx, task))
    }
}
