//! Process-wide logging bootstrap.
//!
//! The crate itself only emits through the `log` facade, using
//! `event=<name> module=<module> status=<status>` messages. Embedders that
//! have no logger of their own can call [`init_logging`] once at startup.
//!
//! # Invariants
//! - Initialization happens at most once per process and never panics.
//! - Re-initializing with the same settings is a no-op; different settings
//!   are rejected.

use std::path::{Path, PathBuf};

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;
use once_cell::sync::OnceCell;
use thiserror::Error;

const LOG_FILE_BASENAME: &str = "contactlog";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();

struct LoggingState {
    level: &'static str,
    log_dir: Option<PathBuf>,
    _logger: LoggerHandle,
}

/// Logging bootstrap failures.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Level is not one of trace|debug|info|warn|error.
    #[error("unsupported log level `{0}`; expected trace|debug|info|warn|error")]
    UnsupportedLevel(String),
    /// File logging needs an absolute directory.
    #[error("log_dir must be an absolute path, got `{0}`")]
    RelativeDir(PathBuf),
    /// Logging is already running with other settings.
    #[error("logging already initialized with level `{level}` and dir {dir:?}")]
    AlreadyInitialized {
        /// Active level.
        level: &'static str,
        /// Active directory, `None` for stderr.
        dir: Option<PathBuf>,
    },
    /// Backend setup failed.
    #[error("failed to start logger: {0}")]
    Backend(String),
}

/// Starts logging at `level`, to rotating files under `log_dir` or to stderr.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<(), LoggingError> {
    let level = normalize_level(level)?;
    if let Some(dir) = log_dir {
        if !dir.is_absolute() {
            return Err(LoggingError::RelativeDir(dir.to_path_buf()));
        }
    }
    let log_dir = log_dir.map(Path::to_path_buf);

    let state = LOGGING_STATE.get_or_try_init(|| start_logger(level, log_dir.clone()))?;
    if state.level != level || state.log_dir != log_dir {
        return Err(LoggingError::AlreadyInitialized {
            level: state.level,
            dir: state.log_dir.clone(),
        });
    }
    Ok(())
}

/// Active `(level, log_dir)`, or `None` before [`init_logging`] succeeds.
pub fn logging_status() -> Option<(&'static str, Option<PathBuf>)> {
    LOGGING_STATE
        .get()
        .map(|state| (state.level, state.log_dir.clone()))
}

/// `debug` in debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start_logger(level: &'static str, log_dir: Option<PathBuf>) -> Result<LoggingState, LoggingError> {
    let logger =
        Logger::try_with_str(level).map_err(|err| LoggingError::Backend(err.to_string()))?;

    let logger = match &log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|err| {
                LoggingError::Backend(format!("cannot create `{}`: {err}", dir.display()))
            })?;
            logger
                .log_to_file(
                    FileSpec::default()
                        .directory(dir.as_path())
                        .basename(LOG_FILE_BASENAME),
                )
                .rotate(
                    Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(MAX_LOG_FILES),
                )
                .write_mode(WriteMode::BufferAndFlush)
                .append()
                .format_for_files(flexi_logger::detailed_format)
        }
        None => logger.log_to_stderr().format(flexi_logger::default_format),
    };

    let handle = logger
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    info!(
        "event=logging_init module=logging status=ok level={level} version={}",
        env!("CARGO_PKG_VERSION")
    );

    Ok(LoggingState {
        level,
        log_dir,
        _logger: handle,
    })
}

fn normalize_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LoggingError::UnsupportedLevel(other.to_string())),
    }
}
