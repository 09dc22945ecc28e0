//! Process-wide log backend for the engine.
//!
//! # Responsibility
//! - Start size-rotated file logging once per process.
//! - Capture panics as metadata-only log events.
//!
//! # Invariants
//! - Repeating `init_logging` with the same level and directory is a no-op.
//! - A different level or directory after start is rejected.
//! - Engine events carry ids, counts and offsets only, never note text.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "notetree";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    level: LogLevel,
    directory: PathBuf,
    _handle: LoggerHandle,
}

/// Supported verbosity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(value: &str) -> Result<Self, LoggingError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(LoggingError::UnsupportedLevel(value.trim().to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// `debug` in debug builds, `info` in release builds.
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            Self::Debug
        } else {
            Self::Info
        }
    }
}

/// Logging bootstrap failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    UnsupportedLevel(String),
    RelativeDirectory(PathBuf),
    CreateDirectory { directory: PathBuf, message: String },
    Backend(String),
    /// Logging already runs with another level or directory.
    Conflict { active: String, requested: String },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected trace|debug|info|warn|error"
            ),
            Self::RelativeDirectory(directory) => write!(
                f,
                "log directory must be absolute, got `{}`",
                directory.display()
            ),
            Self::CreateDirectory { directory, message } => write!(
                f,
                "cannot create log directory `{}`: {message}",
                directory.display()
            ),
            Self::Backend(message) => write!(f, "logger backend failed: {message}"),
            Self::Conflict { active, requested } => write!(
                f,
                "logging already active with {active}; refusing to switch to {requested}"
            ),
        }
    }
}

impl Error for LoggingError {}

/// Starts file logging under `directory`.
///
/// # Errors
/// - `UnsupportedLevel` for unknown level names.
/// - `RelativeDirectory` when `directory` is not absolute.
/// - `CreateDirectory`/`Backend` when the backend cannot start.
/// - `Conflict` when logging already runs with other settings.
pub fn init_logging(level: &str, directory: &Path) -> Result<(), LoggingError> {
    let level = LogLevel::parse(level)?;
    if !directory.is_absolute() {
        return Err(LoggingError::RelativeDirectory(directory.to_path_buf()));
    }

    let active = ACTIVE.get_or_try_init(|| start(level, directory))?;
    if active.directory != directory {
        return Err(LoggingError::Conflict {
            active: format!("directory `{}`", active.directory.display()),
            requested: format!("`{}`", directory.display()),
        });
    }
    if active.level != level {
        return Err(LoggingError::Conflict {
            active: format!("level `{}`", active.level.as_str()),
            requested: format!("`{}`", level.as_str()),
        });
    }
    Ok(())
}

fn start(level: LogLevel, directory: &Path) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(directory).map_err(|err| LoggingError::CreateDirectory {
        directory: directory.to_path_buf(),
        message: err.to_string(),
    })?;
    let handle = Logger::try_with_str(level.as_str())
        .map_err(|err| LoggingError::Backend(err.to_string()))?
        .log_to_file(
            FileSpec::default()
                .directory(directory)
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
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    install_panic_hook();
    info!(
        "event=logging_start module=core status=ok level={} version={} os={}",
        level.as_str(),
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    );
    Ok(ActiveLogger {
        level,
        directory: directory.to_path_buf(),
        _handle: handle,
    })
}

/// Level and directory of the running logger, if any.
pub fn logging_status() -> Option<(LogLevel, PathBuf)> {
    ACTIVE
        .get()
        .map(|active| (active.level, active.directory.clone()))
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|location| format!("{}:{}", location.file(), location.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(
            "event=panic module=core status=error location={location} payload={}",
            single_line(&payload, MAX_PANIC_PAYLOAD_CHARS)
        );
        previous(panic_info);
    }));
}

/// Collapses line breaks and caps the length of a log field.
fn single_line(value: &str, max_chars: usize) -> String {
    let flattened = value.replace(['\n', '\r'], " ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }
    let mut capped: String = flattened.chars().take(max_chars).collect();
    capped.push_str("...");
    capped
}
