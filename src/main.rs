use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::io::IsTerminal;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, warn};

use dualshare::autostart::{Autostart, PlatformError};
use dualshare::config::{format_config, ConfigStore, ServerConfig};
use dualshare::controller::{Command, Controller, ControllerError, Outcome};
use dualshare::lifecycle::{LifecycleError, LifecycleManager, RunningPair};
use dualshare::listener::ListenerError;
use dualshare::logging::{init_logging, LogConfig, Verbosity};
use dualshare::preflight::{Preflight, ValidationError};
use dualshare::prompt::prompt_config;

#[derive(Parser)]
#[command(name = "dualshare")]
#[command(version)]
#[command(about = "Share a directory over FTP and HTTP at the same time")]
#[command(
    long_about = "Starts an FTP server and a browsable HTTP server for one directory on the local network, and can register itself to start again at boot."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Location of the saved configuration
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start both servers and keep them running until Ctrl+C
    Serve(ServeArgs),
    /// Start both servers from the saved configuration without prompting
    Restore,
    /// Manage starting the servers at boot
    Autostart {
        #[command(subcommand)]
        action: AutostartAction,
    },
    /// Inspect the saved configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// FTP username
    #[arg(short, long)]
    username: Option<String>,

    /// FTP password
    #[arg(short, long)]
    password: Option<String>,

    /// Directory to share
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// FTP control port (default: 2121)
    #[arg(long)]
    ftp_port: Option<u16>,

    /// HTTP port (default: 8080)
    #[arg(long)]
    http_port: Option<u16>,

    /// Bind to this address instead of detecting the LAN address
    #[arg(short, long)]
    address: Option<IpAddr>,

    /// Register the configuration to start at boot once the servers are up
    #[arg(long)]
    autostart: bool,

    /// Use saved values and flags without asking
    #[arg(long)]
    no_prompt: bool,
}

#[derive(Subcommand)]
enum AutostartAction {
    /// Start the saved configuration at boot
    Enable,
    /// Stop starting at boot
    Disable,
    /// Show whether a boot entry is installed
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the saved configuration
    Show,
    /// Print the path of the saved configuration
    Path,
    /// Delete the saved configuration
    Reset,
}

fn open_store(path: Option<PathBuf>) -> Result<ConfigStore> {
    match path {
        Some(path) => Ok(ConfigStore::at(path)),
        None => ConfigStore::default_location().context("Failed to locate the configuration file"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = open_store(cli.config)?;

    let log_file = match (&cli.command, cli.log_file) {
        (_, Some(path)) => Some(path),
        (Commands::Restore, None) => Some(LogConfig::beside(store.path())),
        _ => None,
    };
    let _guard = init_logging(&LogConfig {
        verbosity: Verbosity::from_flags(cli.verbose, cli.quiet),
        log_file,
    });

    match cli.command {
        Commands::Serve(args) => serve(args, store).await,
        Commands::Restore => restore(store).await,
        Commands::Autostart { action } => autostart(action, store),
        Commands::Config { action } => config(action, store),
    }
}

async fn serve(args: ServeArgs, store: ConfigStore) -> Result<()> {
    let mut draft = store.load().unwrap_or_default();
    if let Some(username) = args.username {
        draft.username = username;
    }
    if let Some(password) = args.password {
        draft.password = password;
    }
    if let Some(directory) = args.directory {
        draft.set_directory(directory);
    }
    draft.set_ports(
        args.ftp_port.unwrap_or(draft.ftp_port),
        args.http_port.unwrap_or(draft.http_port),
    );

    if !args.no_prompt && std::io::stdin().is_terminal() {
        draft = prompt_config(&draft).context("Failed to read settings")?;
    }

    let preflight = match args.address {
        Some(address) => Preflight::with_address(address),
        None => Preflight::new(),
    };
    let lifecycle = Arc::new(LifecycleManager::standard(preflight, store.clone()));
    let autostart = Autostart::for_host(store).context("Failed to set up autostart")?;
    let mut controller = Controller::new(draft, lifecycle, autostart);

    let pair = match controller.dispatch(Command::Start).await {
        Ok(Outcome::Started(pair)) => pair,
        Ok(other) => anyhow::bail!("Unexpected outcome: {:?}", other),
        Err(e) => return Err(with_hint(e)),
    };
    print_running(&pair, controller.draft());

    if args.autostart {
        match controller.dispatch(Command::EnableAutostart).await {
            Ok(_) => println!("Autostart enabled"),
            Err(e) => {
                // servers keep running
                print_failure(&e);
            }
        }
    }

    println!("Press Ctrl+C to stop");
    shutdown_signal().await;

    controller.dispatch(Command::Stop).await?;
    println!("\nServers stopped");
    Ok(())
}

async fn restore(store: ConfigStore) -> Result<()> {
    let lifecycle = LifecycleManager::standard(Preflight::new(), store.clone());

    let pair = match lifecycle.restore(&store).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "Restore failed");
            return Err(e).with_context(|| {
                format!("Failed to restore from {}", store.path().display())
            });
        }
    };
    if let Some(config) = store.load() {
        print_running(&pair, &config);
    }

    shutdown_signal().await;
    lifecycle.stop_all().await;
    Ok(())
}

fn autostart(action: AutostartAction, store: ConfigStore) -> Result<()> {
    let autostart = Autostart::for_host(store).context("Failed to set up autostart")?;
    let mechanism = autostart.mechanism().unwrap_or("none");

    match action {
        AutostartAction::Enable => {
            autostart
                .enable()
                .map_err(|e| with_hint(ControllerError::Platform(e)))?;
            println!("Autostart enabled ({})", mechanism);
        }
        AutostartAction::Disable => {
            autostart
                .disable()
                .map_err(|e| with_hint(ControllerError::Platform(e)))?;
            println!("Autostart disabled ({})", mechanism);
        }
        AutostartAction::Status => {
            let enabled = autostart
                .status()
                .map_err(|e| with_hint(ControllerError::Platform(e)))?;
            println!(
                "Autostart is {} ({})",
                if enabled { "enabled" } else { "disabled" },
                mechanism
            );
        }
    }
    Ok(())
}

fn config(action: ConfigAction, store: ConfigStore) -> Result<()> {
    match action {
        ConfigAction::Show => match store.try_load() {
            Ok(Some(config)) => println!("{}", format_config(&config)),
            Ok(None) => println!("No saved configuration at {}", store.path().display()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read {}", store.path().display())
                })
            }
        },
        ConfigAction::Path => println!("{}", store.path().display()),
        ConfigAction::Reset => {
            store
                .clear()
                .with_context(|| format!("Failed to remove {}", store.path().display()))?;
            println!("Configuration reset");
        }
    }
    Ok(())
}

fn print_running(pair: &RunningPair, config: &ServerConfig) {
    println!("Sharing {}", config.directory.display());
    println!(
        "  FTP:  ftp://{}@{} (password set)",
        config.username, pair.file_transfer
    );
    println!("  HTTP: http://{}/", pair.web);
    if pair.degraded {
        println!("  Only reachable from this machine: no LAN address could be bound");
    }
}

fn print_failure(err: &ControllerError) {
    eprintln!("Error: {}", err);
    if let Some(hint) = hint(err) {
        eprintln!("  {}", hint);
    }
}

fn with_hint(err: ControllerError) -> anyhow::Error {
    match hint(&err) {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => err.into(),
    }
}

/// Suggest a fix for the failures a user can act on
fn hint(err: &ControllerError) -> Option<&'static str> {
    match err {
        ControllerError::Lifecycle(LifecycleError::Validation(v)) => match v {
            ValidationError::PrivilegedPort { .. } => Some("Pick a port of 1024 or above"),
            ValidationError::PortInUse { .. } => {
                Some("Stop the program using that port or pick another one")
            }
            ValidationError::PortConflict { .. } => {
                Some("Give the FTP and HTTP servers different ports")
            }
            ValidationError::DirectoryNotFound { .. } => {
                Some("Check the shared directory exists and is readable")
            }
            ValidationError::UnreachableAddress { .. } => {
                Some("Check the network connection or pass --address")
            }
        },
        ControllerError::Lifecycle(LifecycleError::PartialStartFailure { source, .. }) => {
            match source {
                ListenerError::PermissionDenied { .. } => {
                    Some("The system refused the port; pick another one")
                }
                ListenerError::Bind { .. } => Some("Another program grabbed the port; try again"),
                _ => None,
            }
        }
        ControllerError::Lifecycle(_) => None,
        ControllerError::Platform(PlatformError::PermissionDenied { .. }) => {
            Some("Autostart needs root or administrator rights")
        }
        ControllerError::Platform(PlatformError::NoConfiguration) => {
            Some("Run `dualshare serve` once so there is a configuration to start")
        }
        ControllerError::Platform(_) => None,
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
