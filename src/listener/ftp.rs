//! FTP listener backed by libunftp
//!
//! Serves the shared directory to a single user with full read/write access.

use async_trait::async_trait;
use libunftp::auth::{AuthenticationError, Authenticator, Credentials, DefaultUser};
use libunftp::options::Shutdown;
use std::fmt;
use std::net::TcpListener;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};
use unftp_sbe_fs::ServerExt;

use super::{
    Credential, Listener, ListenerError, ListenerHandle, ListenerResult, ListenerSpec, ServiceKind,
};

/// Passive data ports handed out to clients, 60000 through 60099
pub const DEFAULT_PASSIVE_PORTS: Range<u16> = 60000..60100;

const GREETING: &str = "dualshare FTP server ready";

/// How long connected clients get to finish once shutdown is requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// How long the server gets to fail before it is considered running.
///
/// libunftp binds inside its serve future, so early errors only show up
/// once the task has been polled.
const STARTUP_SETTLE: Duration = Duration::from_millis(250);

/// Accepts exactly one username/password pair
struct SingleUserAuthenticator {
    credential: Credential,
}

impl fmt::Debug for SingleUserAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleUserAuthenticator")
            .field("username", &self.credential.username)
            .finish()
    }
}

#[async_trait]
impl Authenticator<DefaultUser> for SingleUserAuthenticator {
    async fn authenticate(
        &self,
        username: &str,
        creds: &Credentials,
    ) -> Result<DefaultUser, AuthenticationError> {
        check_login(&self.credential, username, creds.password.as_deref())
    }
}

fn check_login(
    credential: &Credential,
    username: &str,
    password: Option<&str>,
) -> Result<DefaultUser, AuthenticationError> {
    if username != credential.username {
        debug!(username, "Rejected unknown FTP user");
        return Err(AuthenticationError::BadUser);
    }

    match password {
        Some(password) if password == credential.password => Ok(DefaultUser),
        _ => {
            debug!(username, "Rejected FTP login with wrong password");
            Err(AuthenticationError::BadPassword)
        }
    }
}

/// FTP service for the shared directory
#[derive(Debug, Clone)]
pub struct FtpListener {
    passive_ports: Range<u16>,
}

impl FtpListener {
    /// Create a new FTP listener with the default passive port range
    pub fn new() -> Self {
        Self {
            passive_ports: DEFAULT_PASSIVE_PORTS,
        }
    }

    /// Use a different passive port range
    pub fn with_passive_ports(passive_ports: Range<u16>) -> Self {
        Self { passive_ports }
    }

    /// Passive port range handed to clients
    pub fn passive_ports(&self) -> &Range<u16> {
        &self.passive_ports
    }
}

impl Default for FtpListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Listener for FtpListener {
    fn kind(&self) -> ServiceKind {
        ServiceKind::FileTransfer
    }

    fn name(&self) -> &'static str {
        "ftp"
    }

    async fn start(&self, spec: ListenerSpec) -> ListenerResult<ListenerHandle> {
        let address = spec.bind;

        // Surface bind errors right away instead of from inside the serve task
        drop(TcpListener::bind(address).map_err(|e| ListenerError::bind(address, e))?);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let authenticator = SingleUserAuthenticator {
            credential: spec.credential.clone(),
        };

        let server = libunftp::Server::with_fs(spec.root.clone())
            .greeting(GREETING)
            .passive_ports(self.passive_ports.clone())
            .authenticator(Arc::new(authenticator))
            .shutdown_indicator(async move {
                let _ = shutdown_rx.await;
                Shutdown::new().grace_period(SHUTDOWN_GRACE)
            })
            .build()
            .map_err(|e| ListenerError::Fault(e.to_string()))?;

        let mut task = tokio::spawn(async move {
            server
                .listen(address.to_string())
                .await
                .map_err(|e| ListenerError::Exited(e.to_string()))
        });

        match tokio::time::timeout(STARTUP_SETTLE, &mut task).await {
            Err(_still_running) => {}
            Ok(Ok(Ok(()))) => {
                return Err(ListenerError::Exited(
                    "FTP server stopped during startup".to_string(),
                ))
            }
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(e)) => return Err(ListenerError::Fault(e.to_string())),
        }

        info!(
            address = %address,
            root = %spec.root.display(),
            user = %spec.credential.username,
            "FTP server listening"
        );
        Ok(ListenerHandle::new(
            ServiceKind::FileTransfer,
            address,
            shutdown_tx,
            task,
        ))
    }
}
