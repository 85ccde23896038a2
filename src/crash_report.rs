//! Crash reports and scoped operation tracking
//!
//! `ErrorContext` times a named operation; when it fails, the failure is
//! logged and, if a `CrashReporter` is attached, written to a timestamped
//! report file. The error is always handed back to the caller unchanged.

use std::collections::BTreeMap;
use std::backtrace::Backtrace;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::config::APP_VERSION;
use crate::error::SubsetterError;

/// Suffixes tried when reports share a millisecond
const MAX_NAME_COLLISIONS: u32 = 100;

/// Everything recorded about one failure
#[derive(Debug, Clone, Serialize)]
pub struct CrashReport {
    pub timestamp: DateTime<Local>,
    pub error_type: String,
    pub error_message: String,
    pub context: BTreeMap<String, String>,
    pub traceback_text: String,
}

impl CrashReport {
    pub fn render(&self) -> String {
        let rule = "=".repeat(80);
        let thin = "-".repeat(80);
        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "PLEXSUBSETTER CRASH REPORT");
        let _ = writeln!(out, "Timestamp: {}", self.timestamp.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "{rule}\n");
        let _ = writeln!(out, "Error Type: {}", self.error_type);
        let _ = writeln!(out, "Error Message: {}\n", self.error_message);
        if !self.context.is_empty() {
            let _ = writeln!(out, "Context Information:");
            for (key, value) in &self.context {
                let _ = writeln!(out, "  {key}: {value}");
            }
            let _ = writeln!(out);
        }
        let _ = writeln!(out, "Full Traceback:");
        let _ = writeln!(out, "{thin}");
        let _ = writeln!(out, "{}", self.traceback_text);
        let _ = writeln!(out, "{thin}\n");
        let _ = writeln!(out, "System Information:");
        let _ = writeln!(out, "  Version: {APP_VERSION}");
        let _ = writeln!(out, "  Platform: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
        if let Ok(cwd) = std::env::current_dir() {
            let _ = writeln!(out, "  Working Directory: {}", cwd.display());
        }
        out
    }
}

/// Writes crash reports into a directory
#[derive(Debug, Clone)]
pub struct CrashReporter {
    dir: PathBuf,
}

impl CrashReporter {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Reporter under the platform data directory
    pub fn default_location() -> std::io::Result<Self> {
        Self::new(default_crash_dir()?)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a report; returns the file path, or `None` if writing failed
    pub fn report(
        &self,
        error_type: &str,
        error_message: &str,
        context: BTreeMap<String, String>,
    ) -> Option<PathBuf> {
        let report = CrashReport {
            timestamp: Local::now(),
            error_type: error_type.to_string(),
            error_message: error_message.to_string(),
            context,
            traceback_text: Backtrace::force_capture().to_string(),
        };
        let stamp = report.timestamp.format("%Y%m%d_%H%M%S_%3f").to_string();
        match self.create_report_file(&stamp, &report.render()) {
            Ok(path) => {
                log::error!("Crash report saved to: {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::error!("Failed to write crash report: {e}");
                None
            }
        }
    }

    /// Never overwrites: a name already taken gets a `_N` suffix
    fn create_report_file(&self, stamp: &str, body: &str) -> std::io::Result<PathBuf> {
        for attempt in 0..MAX_NAME_COLLISIONS {
            let name = match attempt {
                0 => format!("crash_{stamp}.log"),
                n => format!("crash_{stamp}_{n}.log"),
            };
            let path = self.dir.join(name);
            match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(body.as_bytes())?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free crash report name for {stamp}"),
        ))
    }

    pub fn report_error<E: Reportable + ?Sized>(&self, error: &E, context: BTreeMap<String, String>) -> Option<PathBuf> {
        self.report(&error.error_type(), &error.to_string(), context)
    }

    /// Newest crash report files first
    pub fn recent_crashes(&self, limit: usize) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("Failed to get recent crashes: {e}");
                return Vec::new();
            }
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("crash_") && n.ends_with(".log"))
                    .unwrap_or(false)
            })
            .collect();
        // Names embed the timestamp, so lexical order is chronological
        files.sort();
        files.reverse();
        files.truncate(limit);
        files
    }
}

fn default_crash_dir() -> std::io::Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "Failed to get data directory"))?;
    Ok(base.join("plexsubsetter").join("crashes"))
}

/// Types whose failures can be written into a crash report
pub trait Reportable: std::fmt::Display {
    fn error_type(&self) -> String;
}

impl Reportable for SubsetterError {
    fn error_type(&self) -> String {
        self.kind_name().to_string()
    }
}

/// Times an operation and reports its failure
pub struct ErrorContext<'a> {
    operation: String,
    reporter: Option<&'a CrashReporter>,
    context: BTreeMap<String, String>,
}

impl<'a> ErrorContext<'a> {
    pub fn new(operation: impl Into<String>, reporter: Option<&'a CrashReporter>) -> Self {
        Self {
            operation: operation.into(),
            reporter,
            context: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Run `op`, returning its result untouched
    pub fn run<T, E: Reportable>(self, op: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        log::debug!("Starting: {}", self.operation);
        let started = Instant::now();
        let result = op();
        let duration = started.elapsed().as_secs_f64();
        match &result {
            Ok(_) => log::debug!("Completed: {} ({duration:.2}s)", self.operation),
            Err(e) => {
                log::error!("Failed: {} after {duration:.2}s - {e}", self.operation);
                if let Some(reporter) = self.reporter {
                    let mut context = self.context;
                    context.insert("operation".into(), self.operation.clone());
                    context.insert("duration_seconds".into(), format!("{duration:.3}"));
                    context.insert("error_type".into(), e.error_type());
                    reporter.report_error(e, context);
                }
            }
        }
        result
    }
}
