use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::Subscriber;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self, MakeWriter, format};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("failed to make dirs '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to open file '{}': {source}", path.display())]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to install logger: {0}")]
    Init(String),
}

/// Keeps the file sink's background writer alive; drop it on shutdown to flush.
#[must_use]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Map a level name (`TRACE`, `DEBUG`, `INFO`, `WARN`, `ERROR`) to a filter.
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Ok(LevelFilter::TRACE),
        "DEBUG" => Ok(LevelFilter::DEBUG),
        "INFO" => Ok(LevelFilter::INFO),
        "WARN" | "WARNING" => Ok(LevelFilter::WARN),
        "ERROR" => Ok(LevelFilter::ERROR),
        "OFF" => Ok(LevelFilter::OFF),
        _ => Err(LoggingError::InvalidLevel(level.to_string())),
    }
}

/// Open `path` for appending, creating it and its parent directories.
pub fn open_log_file(path: &Path) -> Result<File, LoggingError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| LoggingError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::OpenFile {
            path: path.to_path_buf(),
            source,
        })
}

/// One output of the logger.
///
/// Each sink is its own layer, so a writer that fails only loses its own
/// copy of an event and reports the failure on stderr.
pub fn sink_layer<S, W>(writer: W, ansi: bool) -> fmt::Layer<S, format::DefaultFields, format::Format, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fmt::layer()
        .with_ansi(ansi)
        .with_writer(writer)
        .log_internal_errors(true)
}

/// Install the global subscriber.
///
/// Every event goes to stdout. With a log file configured the same events
/// are also written there by a second layer; the two sinks fail
/// independently and each reports its own write errors on stderr.
/// `RUST_LOG` overrides `level` when set.
pub fn init_logging(level: &str, log_file: Option<&Path>) -> Result<LogGuard, LoggingError> {
    let level = parse_level(level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("filedrop={level},tower_http={level}")));

    let (file_layer, file_guard) = match log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (Some(sink_layer(writer, false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(sink_layer(std::io::stdout, true))
        .with(file_layer)
        .try_init()
        .map_err(|err| LoggingError::Init(err.to_string()))?;

    Ok(LogGuard { _file: file_guard })
}
