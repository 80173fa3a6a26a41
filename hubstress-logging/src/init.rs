use chrono::Utc;
use hubstress_config::{LogFormat, LoggingConfig};
use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

// HTTP stack internals are noisy at debug level
const QUIET_TARGETS: &[&str] = &["hyper=warn", "hyper_util=warn", "h2=warn", "rustls=warn", "reqwest=info"];

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Failed to open log file {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Keeps the non-blocking file writer alive; dropping it flushes the log file
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
    file: Option<PathBuf>,
}

impl LoggingGuard {
    /// File receiving log output, if any
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}

/// Build the level filter. An explicit `override_level` (from the command
/// line) wins, then `RUST_LOG`, then the configured level.
pub fn build_filter(config: &LoggingConfig, override_level: Option<&str>) -> Result<EnvFilter, LoggingError> {
    let base = match override_level {
        Some(level) => level.to_string(),
        None => match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(directives) if !directives.trim().is_empty() => directives,
            _ => config.level.as_str().to_string(),
        },
    };

    let mut directives = base.clone();
    for quiet in QUIET_TARGETS {
        let target = quiet.split('=').next().unwrap_or_default();
        if !base.contains(target) {
            directives.push(',');
            directives.push_str(quiet);
        }
    }

    EnvFilter::try_new(&directives).map_err(|e| LoggingError::InvalidFilter {
        filter: base,
        message: e.to_string(),
    })
}

/// Timestamped log file in the system temp directory
pub fn default_log_file() -> PathBuf {
    std::env::temp_dir().join(format!("hubstress-{}.log", Utc::now().format("%Y%m%dT%H%M%S")))
}

/// Install the global subscriber. Output goes to the configured file when
/// one is set, otherwise to stderr so stdout stays free for reports.
pub fn init_logging(config: &LoggingConfig, override_level: Option<&str>) -> Result<LoggingGuard, LoggingError> {
    let filter = build_filter(config, override_level)?;

    let (writer, file_guard, ansi) = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| LoggingError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            (BoxMakeWriter::new(non_blocking), Some(guard), false)
        }
        None => (
            BoxMakeWriter::new(std::io::stderr),
            None,
            std::io::stderr().is_terminal(),
        ),
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => fmt_layer.json().boxed(),
        LogFormat::Compact => fmt_layer.compact().boxed(),
        LogFormat::Text => fmt_layer.boxed(),
    };

    // Use try_init to avoid panic if global subscriber already set
    if tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
        file: config.file.clone(),
    })
}
