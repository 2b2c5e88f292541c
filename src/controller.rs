//! Command interface for front ends
//!
//! A front end (the CLI, or anything else) edits a draft configuration and
//! issues [`Command`]s; the [`Controller`] turns them into lifecycle and
//! autostart calls.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use crate::autostart::{Autostart, PlatformError, PlatformResult};
use crate::config::ServerConfig;
use crate::lifecycle::{LifecycleError, LifecycleManager, PairStatus, RunningPair};

/// Everything a front end can ask for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetCredentials { username: String, password: String },
    SetDirectory(PathBuf),
    SetPorts { ftp_port: u16, http_port: u16 },
    Start,
    Stop,
    EnableAutostart,
    DisableAutostart,
}

/// Result of a successfully handled [`Command`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The draft configuration changed
    Updated,
    Started(RunningPair),
    Stopped,
    AutostartEnabled,
    AutostartDisabled,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

pub type ControllerResult<T> = Result<T, ControllerError>;

/// Holds the draft configuration and forwards commands
pub struct Controller {
    draft: ServerConfig,
    lifecycle: Arc<LifecycleManager>,
    autostart: Arc<Autostart>,
}

impl Controller {
    pub fn new(draft: ServerConfig, lifecycle: Arc<LifecycleManager>, autostart: Autostart) -> Self {
        Self {
            draft,
            lifecycle,
            autostart: Arc::new(autostart),
        }
    }

    /// The configuration the next start will use
    pub fn draft(&self) -> &ServerConfig {
        &self.draft
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn autostart(&self) -> &Autostart {
        &self.autostart
    }

    pub fn set_credentials(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.draft.set_credentials(username, password);
    }

    pub fn set_directory(&mut self, directory: impl Into<PathBuf>) {
        self.draft.set_directory(directory);
    }

    pub fn set_ports(&mut self, ftp_port: u16, http_port: u16) {
        self.draft.set_ports(ftp_port, http_port);
    }

    /// Start both servers with the draft configuration
    pub async fn start(&self) -> ControllerResult<RunningPair> {
        Ok(self.lifecycle.start_all(self.draft.clone()).await?)
    }

    /// Stop both servers; a no-op when nothing runs
    pub async fn stop(&self) {
        self.lifecycle.stop_all().await;
    }

    pub async fn enable_autostart(&self) -> ControllerResult<()> {
        self.run_autostart(Autostart::enable).await
    }

    pub async fn disable_autostart(&self) -> ControllerResult<()> {
        self.run_autostart(Autostart::disable).await
    }

    /// Registrars shell out to service tools, so keep them off the runtime
    async fn run_autostart<F>(&self, op: F) -> ControllerResult<()>
    where
        F: FnOnce(&Autostart) -> PlatformResult<()> + Send + 'static,
    {
        let autostart = Arc::clone(&self.autostart);
        tokio::task::spawn_blocking(move || op(&autostart))
            .await
            .map_err(|e| PlatformError::CommandFailed {
                tool: "autostart".to_string(),
                detail: e.to_string(),
            })??;
        Ok(())
    }

    /// Handle one command
    pub async fn dispatch(&mut self, command: Command) -> ControllerResult<Outcome> {
        debug!(?command, "Dispatching command");
        match command {
            Command::SetCredentials { username, password } => {
                self.set_credentials(username, password);
                Ok(Outcome::Updated)
            }
            Command::SetDirectory(directory) => {
                self.set_directory(directory);
                Ok(Outcome::Updated)
            }
            Command::SetPorts {
                ftp_port,
                http_port,
            } => {
                self.set_ports(ftp_port, http_port);
                Ok(Outcome::Updated)
            }
            Command::Start => self.start().await.map(Outcome::Started),
            Command::Stop => {
                self.stop().await;
                Ok(Outcome::Stopped)
            }
            Command::EnableAutostart => {
                self.enable_autostart().await?;
                Ok(Outcome::AutostartEnabled)
            }
            Command::DisableAutostart => {
                self.disable_autostart().await?;
                Ok(Outcome::AutostartDisabled)
            }
        }
    }

    /// Latest state of both servers
    pub fn status(&self) -> PairStatus {
        self.lifecycle.status()
    }

    /// Watch state changes of both servers
    pub fn subscribe(&self) -> watch::Receiver<PairStatus> {
        self.lifecycle.subscribe()
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("draft", &self.draft)
            .field("status", &self.lifecycle.status())
            .field("autostart", &self.autostart.mechanism())
            .finish()
    }
}
