//! PlexSubSetter core library
//!
//! This library provides the background task engine, session state and
//! subtitle status cache behind a Plex subtitle manager. The media server
//! and the subtitle provider are reached through the traits in
//! [`collaborators`]; everything else lives here.

pub mod app;
pub mod collaborators;
pub mod config;
pub mod crash_report;
pub mod data_structures;
pub mod error;
pub mod helper_functions;
pub mod library;
pub mod logging;
pub mod retry;
pub mod session_state;
pub mod settings;
pub mod status_resolver;
pub mod subtitle_service;
pub mod subtitle_utils;
pub mod task_manager;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used items
pub use app::{App, SeasonCheck};
pub use collaborators::*;
pub use crash_report::{CrashReporter, ErrorContext};
pub use data_structures::*;
pub use error::{Result, SubsetterError};
pub use retry::RetryPolicy;
pub use session_state::SessionState;
pub use settings::Settings;
pub use status_resolver::{BatchReport, FastPass, SubtitleStatusResolver};
pub use subtitle_service::SearchOptions;
pub use task_manager::TaskManager;
