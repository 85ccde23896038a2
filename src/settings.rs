//! User settings and persistence
//!
//! This module handles loading, saving and validating the preferences that
//! persist between sessions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{
    DEFAULT_LANGUAGE, DEFAULT_PROVIDERS, DEFAULT_SEARCH_TIMEOUT, MAX_SEARCH_TIMEOUT, MAX_STATUS_CHECK_WORKERS,
    MIN_SEARCH_TIMEOUT, STATUS_CHECK_ITEM_TIMEOUT, STATUS_CHECK_WORKERS,
};
use crate::data_structures::SaveMethod;
use crate::error::Result;
use crate::helper_functions::{Utils, Validation};
use crate::subtitle_service::SearchOptions;

/// Settings that persist between sessions
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub default_language: String,
    /// Comma separated provider identifiers
    pub default_providers: String,
    pub search_timeout_secs: u64,
    pub status_check_workers: usize,
    pub status_check_timeout_secs: u64,
    pub prefer_sdh: bool,
    pub prefer_forced: bool,
    pub save_method: SaveMethod,
    pub crash_report_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_language: DEFAULT_LANGUAGE.to_string(),
            default_providers: DEFAULT_PROVIDERS.to_string(),
            search_timeout_secs: DEFAULT_SEARCH_TIMEOUT,
            status_check_workers: STATUS_CHECK_WORKERS,
            status_check_timeout_secs: STATUS_CHECK_ITEM_TIMEOUT.as_secs(),
            prefer_sdh: false,
            prefer_forced: false,
            save_method: SaveMethod::Plex,
            crash_report_dir: None,
        }
    }
}

impl Settings {
    /// Get the path where settings are stored
    pub fn get_path() -> std::io::Result<PathBuf> {
        let app_dir = match xdg::BaseDirectories::new() {
            Ok(xdg_dirs) => xdg_dirs.get_config_home().join("plexsubsetter"),
            Err(_) => dirs::config_dir()
                .map(|dir| dir.join("plexsubsetter"))
                .or_else(|| dirs::home_dir().map(|home| home.join(".plexsubsetter")))
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "Failed to get home directory"))?,
        };
        std::fs::create_dir_all(&app_dir)?;
        Ok(app_dir.join("settings.json"))
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::get_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                log::warn!("Failed to get settings path: {e}. Using defaults.");
                Settings::default()
            }
        }
    }

    /// Load settings from `path`; any failure yields the defaults
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Settings>(&content) {
                Ok(settings) => {
                    log::info!("Settings loaded from {}", path.display());
                    settings.validated()
                }
                Err(e) => {
                    log::warn!("Failed to parse settings file: {e}. Using defaults.");
                    Settings::default()
                }
            },
            Err(e) => {
                log::debug!("Settings file not found or unreadable: {e}. Using defaults.");
                Settings::default()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        log::debug!("Settings saved to {}", path.display());
        Ok(())
    }

    /// Copy with out-of-range values pulled back into range
    pub fn validated(mut self) -> Self {
        if !Validation::is_valid_search_timeout(self.search_timeout_secs) {
            let clamped = self.search_timeout_secs.clamp(MIN_SEARCH_TIMEOUT, MAX_SEARCH_TIMEOUT);
            log::warn!("Search timeout {}s out of range, using {clamped}s", self.search_timeout_secs);
            self.search_timeout_secs = clamped;
        }
        if !Validation::is_valid_worker_count(self.status_check_workers) {
            let clamped = self.status_check_workers.clamp(1, MAX_STATUS_CHECK_WORKERS);
            log::warn!("Status check workers {} out of range, using {clamped}", self.status_check_workers);
            self.status_check_workers = clamped;
        }
        if self.status_check_timeout_secs == 0 {
            self.status_check_timeout_secs = STATUS_CHECK_ITEM_TIMEOUT.as_secs();
        }
        let (known, unknown): (Vec<String>, Vec<String>) = Utils::split_providers(&self.default_providers)
            .into_iter()
            .partition(|p| Validation::is_known_provider(p));
        if !unknown.is_empty() {
            log::warn!("Ignoring unknown subtitle providers: {}", unknown.join(", "));
        }
        self.default_providers = if known.is_empty() {
            DEFAULT_PROVIDERS.to_string()
        } else {
            known.join(",")
        };
        if self.default_language.trim().is_empty() {
            self.default_language = DEFAULT_LANGUAGE.to_string();
        }
        self
    }

    pub fn status_check_timeout(&self) -> Duration {
        Duration::from_secs(self.status_check_timeout_secs)
    }

    /// Search options built from the saved defaults
    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            language: self.default_language.clone(),
            providers: Utils::split_providers(&self.default_providers),
            timeout: Duration::from_secs(self.search_timeout_secs),
            prefer_sdh: self.prefer_sdh,
            prefer_forced: self.prefer_forced,
            save_method: self.save_method,
        }
    }
}
