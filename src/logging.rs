//! Structured JSON logging
//!
//! One JSON line per event, written to stdout and to a log file at the same
//! time. `log` macros used throughout the crate are bridged into the tracing
//! subscriber.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

pub const DEFAULT_LOG_PATH: &str = "/var/log/eks-dns-tool.log";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Debug
    }
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub level: LogLevel,
    /// Also log to this file; stdout only when `None`
    pub file_output: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Debug,
            file_output: Some(PathBuf::from(DEFAULT_LOG_PATH)),
        }
    }
}

/// Identifies one diagnosis run in logs and in the report
#[derive(Debug, Clone)]
pub struct RunContext {
    pub id: Uuid,
    started_at: Instant,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the file writer flushing; drop it only at process exit.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

pub struct StructuredLogger;

impl StructuredLogger {
    /// Install the global subscriber. `RUST_LOG` overrides `config.level`.
    /// A file that cannot be opened degrades to stdout-only logging.
    pub fn init(config: &LoggerConfig) -> LoggingGuard {
        let level = format!("{:?}", config.level).to_lowercase();
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let file = config.file_output.as_deref().and_then(|path| match open_log_file(path) {
            Ok(writer) => Some(writer),
            Err(e) => {
                eprintln!("Warning: cannot open log file {}: {}", path.display(), e);
                None
            }
        });

        let (init_result, guard) = match file {
            Some(file) => {
                let (writer, guard) = tracing_appender::non_blocking(file);
                let result = tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(std::io::stdout.and(writer))
                    .try_init();
                (result, Some(guard))
            }
            None => {
                let result = tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_file(true)
                    .with_line_number(true)
                    .try_init();
                (result, None)
            }
        };

        if let Err(e) = init_result {
            eprintln!("Warning: Tracing subscriber already initialized: {}", e);
        }

        LoggingGuard { _file: guard }
    }
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
