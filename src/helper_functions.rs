//! Common utility functions and validation helpers
//!
//! This module provides string formatting, progress math and settings
//! validation used throughout the crate.

use crate::config::{MAX_SEARCH_TIMEOUT, MAX_STATUS_CHECK_WORKERS, MIN_SEARCH_TIMEOUT, SUBTITLE_PROVIDERS};

/// Common utility functions used throughout the crate
pub struct Utils;

impl Utils {
    /// Truncate a string to a maximum number of characters, adding ellipsis if needed
    pub fn truncate_string(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let keep = max_len.saturating_sub(3);
            let head: String = s.chars().take(keep).collect();
            format!("{}...", head)
        }
    }

    /// Whole-number completion percentage
    pub fn percent(current: usize, total: usize) -> usize {
        if total == 0 {
            0
        } else {
            (current.min(total) * 100) / total
        }
    }

    /// Create a progress percentage string
    pub fn format_progress(current: usize, total: usize) -> String {
        format!("{}%", Self::percent(current, total))
    }

    /// Split a comma-separated provider list, dropping blanks
    pub fn split_providers(providers: &str) -> Vec<String> {
        providers
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Input validation utilities
pub struct Validation;

impl Validation {
    /// Validate the slow-pass worker count setting
    pub fn is_valid_worker_count(value: usize) -> bool {
        value > 0 && value <= MAX_STATUS_CHECK_WORKERS
    }

    /// Validate the provider search timeout setting, in seconds
    pub fn is_valid_search_timeout(value: u64) -> bool {
        (MIN_SEARCH_TIMEOUT..=MAX_SEARCH_TIMEOUT).contains(&value)
    }

    pub fn is_known_provider(id: &str) -> bool {
        SUBTITLE_PROVIDERS.iter().any(|(_, known)| *known == id)
    }
}
