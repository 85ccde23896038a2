//! Subtitle stream inspection and language code helpers
//!
//! Everything here works on data already in memory; nothing in this module
//! talks to the server or a provider.

use crate::data_structures::{CandidateSubtitle, MediaItem};

/// Languages offered for subtitle search as (display name, ISO 639-1 code)
pub static SEARCH_LANGUAGES: &[(&str, &str)] = &[
    ("English", "en"),
    ("Spanish", "es"),
    ("French", "fr"),
    ("German", "de"),
    ("Italian", "it"),
    ("Portuguese", "pt"),
    ("Japanese", "ja"),
    ("Korean", "ko"),
    ("Chinese", "zh"),
    ("Russian", "ru"),
    ("Arabic", "ar"),
    ("Dutch", "nl"),
    ("Polish", "pl"),
    ("Swedish", "sv"),
    ("Danish", "da"),
    ("Finnish", "fi"),
    ("Norwegian", "no"),
];

/// Utilities for working with subtitle streams and language codes
pub struct SubtitleUtils;

impl SubtitleUtils {
    /// Code for a display name; unknown names fall back to English
    pub fn language_code(name: &str) -> &'static str {
        SEARCH_LANGUAGES
            .iter()
            .find(|(n, code)| n.eq_ignore_ascii_case(name) || code.eq_ignore_ascii_case(name))
            .map(|(_, code)| *code)
            .unwrap_or("en")
    }

    /// Convert a language code to a human-readable name
    pub fn language_code_to_name(code: &str) -> &str {
        SEARCH_LANGUAGES
            .iter()
            .find(|(_, c)| c.eq_ignore_ascii_case(code))
            .map(|(name, _)| *name)
            .unwrap_or(code)
    }

    /// Whether resident part data shows at least one subtitle stream
    pub fn has_any_subtitle(item: &MediaItem) -> bool {
        item.resident_streams().next().is_some()
    }

    /// Whether resident part data holds a stream in `code`
    ///
    /// Accepts both 2-letter and 3-letter stream codes (`en` matches `eng`).
    pub fn has_subtitle_for_language(item: &MediaItem, code: &str) -> bool {
        let wanted = code.to_lowercase();
        item.resident_streams().any(|stream| {
            stream
                .language_code
                .as_deref()
                .map(|lang| {
                    let lang = lang.to_lowercase();
                    lang == wanted || lang.starts_with(&wanted)
                })
                .unwrap_or(false)
        })
    }

    /// Order candidates so those matching the SDH/forced preferences come
    /// first, then by provider score; ties keep provider order.
    pub fn rank_candidates(candidates: &mut [CandidateSubtitle], prefer_sdh: bool, prefer_forced: bool) {
        candidates.sort_by_key(|c| {
            let misses = u8::from(c.hearing_impaired != prefer_sdh) + u8::from(c.forced != prefer_forced);
            (misses, std::cmp::Reverse(c.score))
        });
    }
}
