//! Configuration constants for the PlexSubSetter core
//!
//! This module contains application-wide configuration values including
//! queue sizes, worker limits, timeouts, retry defaults and result caps.

use std::time::Duration;

/// The current application version (keep in sync with Cargo.toml)
pub const APP_VERSION: &str = "1.0.0";

/// Maximum number of undelivered events kept in the event queue
pub const EVENT_QUEUE_CAPACITY: usize = 1000;

/// How long the event stream waits before emitting a keepalive frame
pub const EVENT_KEEPALIVE: Duration = Duration::from_secs(15);

/// Maximum number of finished task records kept for inspection
pub const MAX_RETAINED_TASKS: usize = 500;

/// Concurrent slow-pass reloads during a subtitle status batch
pub static STATUS_CHECK_WORKERS: usize = 8;

/// Maximum allowed status-check workers
pub static MAX_STATUS_CHECK_WORKERS: usize = 32;

/// Per-item deadline for a slow-pass reload
pub const STATUS_CHECK_ITEM_TIMEOUT: Duration = Duration::from_secs(120);

/// Emit a progress event every N resolved items during a batch check
pub static PROGRESS_EVENT_INTERVAL: usize = 50;

/// Retry defaults for ordinary remote calls (library listing)
pub static DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry defaults for critical remote calls (server connect)
pub static CRITICAL_RETRY_ATTEMPTS: u32 = 5;
pub const CRITICAL_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Timeout handed to the connector when opening a server connection
pub const SERVER_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay multiplier applied after each failed attempt
pub static RETRY_BACKOFF_FACTOR: f64 = 2.0;

/// Pagination size for large libraries
pub static ITEMS_PER_PAGE: usize = 50;

/// Maximum title length before truncation in log lines
pub static MAX_TITLE_LENGTH: usize = 60;

/// Search results kept per item
pub static MAX_SUBTITLE_RESULTS: usize = 10;

/// Release info is truncated to this many characters
pub static MAX_RELEASE_INFO_LENGTH: usize = 100;

/// Largest subtitle payload accepted from a provider
pub static MAX_SUBTITLE_BYTES: usize = 10 * 1024 * 1024;

/// Search timeout bounds in seconds
pub static MIN_SEARCH_TIMEOUT: u64 = 10;
pub static MAX_SEARCH_TIMEOUT: u64 = 120;
pub static DEFAULT_SEARCH_TIMEOUT: u64 = 30;

/// Default subtitle language (display name)
pub static DEFAULT_LANGUAGE: &str = "English";

/// Default provider list, comma separated
pub static DEFAULT_PROVIDERS: &str = "opensubtitles,podnapisi";

/// Subtitle providers as (display name, identifier)
pub static SUBTITLE_PROVIDERS: &[(&str, &str)] = &[
    ("OpenSubtitles", "opensubtitles"),
    ("Podnapisi", "podnapisi"),
    ("TVSubtitles", "tvsubtitles"),
    ("Addic7ed", "addic7ed"),
    ("Subscene", "subscene"),
];
