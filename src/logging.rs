//! Console and session-file logging
//!
//! `setup_logging` installs one `log` backend that forwards every record to
//! an `env_logger` console logger and to a background thread appending to a
//! per-session log file. File writes never block the caller.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;
use thiserror::Error;

use crate::config::APP_VERSION;

/// Entries buffered before the writer flushes without waiting
const FLUSH_BATCH: usize = 10;
/// Longest an entry sits in the buffer while the writer is idle
const FLUSH_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("could not prepare log file: {0}")]
    Io(#[from] std::io::Error),
    #[error("logging is already initialised")]
    AlreadyInitialised,
}

enum LogMessage {
    Line(String),
    Shutdown,
}

/// Appends lines to a file from a dedicated writer thread
pub struct AsyncLogger {
    path: PathBuf,
    sender: Mutex<mpsc::Sender<LogMessage>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncLogger {
    pub fn new(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        let (tx, rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("log-writer".into())
            .spawn(move || {
                let mut file = std::io::BufWriter::new(file);
                let mut pending = 0usize;
                loop {
                    match rx.recv_timeout(FLUSH_INTERVAL) {
                        Ok(LogMessage::Line(line)) => {
                            let _ = writeln!(file, "{line}");
                            pending += 1;
                            if pending >= FLUSH_BATCH {
                                let _ = file.flush();
                                pending = 0;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if pending > 0 {
                                let _ = file.flush();
                                pending = 0;
                            }
                        }
                        Ok(LogMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                            let _ = file.flush();
                            return;
                        }
                    }
                }
            })?;

        Ok(Self {
            path,
            sender: Mutex::new(tx),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a line; dropped silently once the writer has shut down
    pub fn write_line(&self, line: String) {
        if let Ok(sender) = self.sender.lock() {
            let _ = sender.send(LogMessage::Line(line));
        }
    }

    /// Flush everything queued so far and stop the writer thread
    pub fn shutdown(&self) {
        if let Ok(sender) = self.sender.lock() {
            let _ = sender.send(LogMessage::Shutdown);
        }
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

struct CompositeLogger {
    console: env_logger::Logger,
    file: Arc<AsyncLogger>,
    file_level: LevelFilter,
}

impl Log for CompositeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.file_level || self.console.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.console.matches(record) {
            self.console.log(record);
        }
        if record.level() <= self.file_level {
            self.file.write_line(format_line(record));
        }
    }

    fn flush(&self) {
        self.console.flush();
    }
}

fn format_line(record: &Record) -> String {
    format!(
        "{} - {} - {} - {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        record.target(),
        record.level(),
        record.args()
    )
}

static FILE_LOGGER: OnceCell<Arc<AsyncLogger>> = OnceCell::new();

/// `plexsubsetter_YYYYmmdd_HHMMSS.log`
pub fn session_log_name(at: chrono::DateTime<Local>) -> String {
    format!("plexsubsetter_{}.log", at.format("%Y%m%d_%H%M%S"))
}

/// Directory holding session log files
pub fn log_directory() -> std::io::Result<PathBuf> {
    let base = match xdg::BaseDirectories::new() {
        Ok(xdg_dirs) => xdg_dirs.get_cache_home(),
        Err(_) => dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "Failed to get cache directory"))?,
    };
    Ok(base.join("plexsubsetter").join("logs"))
}

/// Install console and file logging; returns the session log path
///
/// Only the first call in a process succeeds.
pub fn setup_logging(level: LevelFilter) -> Result<PathBuf, LoggingError> {
    let path = log_directory()?.join(session_log_name(Local::now()));
    setup_logging_at(level, path)
}

pub fn setup_logging_at(level: LevelFilter, path: PathBuf) -> Result<PathBuf, LoggingError> {
    if FILE_LOGGER.get().is_some() {
        return Err(LoggingError::AlreadyInitialised);
    }
    let file = Arc::new(AsyncLogger::new(path)?);
    let console = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .build();
    let max_level = level.max(console.filter());

    FILE_LOGGER
        .set(Arc::clone(&file))
        .map_err(|_| LoggingError::AlreadyInitialised)?;
    log::set_boxed_logger(Box::new(CompositeLogger {
        console,
        file: Arc::clone(&file),
        file_level: level,
    }))
    .map_err(|_| LoggingError::AlreadyInitialised)?;
    log::set_max_level(max_level);

    let rule = "=".repeat(60);
    log::info!("{rule}");
    log::info!("PlexSubSetter v{APP_VERSION} - Session Started");
    log::info!("Log file: {}", file.path().display());
    log::info!("{rule}");
    Ok(file.path().to_path_buf())
}

/// Path of this session's log file, if logging was set up
pub fn current_log_file() -> Option<PathBuf> {
    FILE_LOGGER.get().map(|logger| logger.path().to_path_buf())
}

/// Full contents of this session's log file
pub fn read_log_file() -> std::io::Result<String> {
    let path = current_log_file()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "logging is not initialised"))?;
    std::fs::read_to_string(path)
}

/// Flush and stop the file writer; console logging keeps working
pub fn shutdown_logging() {
    if let Some(logger) = FILE_LOGGER.get() {
        log::info!("PlexSubSetter session ended");
        logger.shutdown();
    }
}
