//! Structured logging for dualshare.
//!
//! Logs go to stderr at the level chosen on the command line, and optionally
//! to a file. A boot-time restore has no terminal, so it logs to a file next
//! to the saved record.

use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Default log file name
pub const LOG_FILE_NAME: &str = "dualshare.log";

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only
    Quiet,
    /// Normal logging (info level)
    #[default]
    Normal,
    /// Verbose logging (debug level)
    Verbose,
    /// Very verbose logging (trace level)
    Trace,
}

impl Verbosity {
    /// Map `-q` and the number of `-v` flags to a verbosity.
    ///
    /// `-q` wins over any `-v`.
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        if quiet {
            return Verbosity::Quiet;
        }
        match verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Trace,
        }
    }

    /// Get the tracing level filter for this verbosity.
    pub fn as_level_filter(&self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::ERROR,
            Verbosity::Normal => LevelFilter::INFO,
            Verbosity::Verbose => LevelFilter::DEBUG,
            Verbosity::Trace => LevelFilter::TRACE,
        }
    }

    /// Get the tracing level for this verbosity.
    pub fn as_level(&self) -> Level {
        match self {
            Verbosity::Quiet => Level::ERROR,
            Verbosity::Normal => Level::INFO,
            Verbosity::Verbose => Level::DEBUG,
            Verbosity::Trace => Level::TRACE,
        }
    }
}

/// Configuration for the logging system.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Verbosity level for stderr output.
    pub verbosity: Verbosity,
    /// Optional path to log file.
    pub log_file: Option<PathBuf>,
}

impl LogConfig {
    /// Log file next to the saved record, used by boot-time restore
    pub fn beside(record: &Path) -> PathBuf {
        record
            .parent()
            .unwrap_or(Path::new("."))
            .join(LOG_FILE_NAME)
    }
}

/// Guard that must be kept alive for the duration of logging.
///
/// When this guard is dropped, the logging system will flush pending logs.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

impl LogGuard {
    fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            _file_guard: file_guard,
        }
    }
}

/// Initialize the logging system.
///
/// Returns a guard that must be kept alive for the duration of logging.
/// `RUST_LOG` overrides the default directive.
///
/// # Example
///
/// ```ignore
/// use dualshare::logging::{init_logging, LogConfig, Verbosity};
///
/// let config = LogConfig {
///     verbosity: Verbosity::Verbose,
///     log_file: Some("/tmp/dualshare.log".into()),
/// };
/// let _guard = init_logging(&config);
/// tracing::info!("Logging initialized");
/// ```
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.verbosity.as_level_filter().into())
        .from_env_lossy();

    let (file_layer, file_guard) = if let Some(ref path) = config.log_file {
        let parent_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(LOG_FILE_NAME);

        let file_appender = tracing_appender::rolling::never(parent_dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking)
            .with_filter(LevelFilter::DEBUG);

        (Some(file_layer), Some(guard))
    } else {
        (None, None)
    };

    let stderr_layer = fmt::layer()
        .with_ansi(true)
        .with_target(false)
        .with_timer(fmt::time::uptime())
        .with_writer(std::io::stderr)
        .with_filter(config.verbosity.as_level_filter());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    LogGuard::new(file_guard)
}
