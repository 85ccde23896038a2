//! Subtitle search, download, preview and removal
//!
//! Every operation runs item by item and keeps going when one item fails;
//! failures end up in the returned report and in `log` events. Each
//! operation that talks to a provider opens a single session for the whole
//! batch and closes it when the batch ends.

use std::collections::BTreeMap;
use std::time::Duration;

use log::Level;
use serde::{Deserialize, Serialize};

use crate::collaborators::{ProviderConfig, ScopedSession, ServerHandle, SubtitleProvider};
use crate::config::{
    DEFAULT_LANGUAGE, DEFAULT_PROVIDERS, DEFAULT_SEARCH_TIMEOUT, MAX_RELEASE_INFO_LENGTH, MAX_SUBTITLE_BYTES,
    MAX_SUBTITLE_RESULTS, MAX_TITLE_LENGTH,
};
use crate::data_structures::{
    DryRunEntry, DryRunReport, FailedItem, ItemStreams, MediaItem, MutationReport, RatingKey, SaveMethod,
    SearchResult, SearchResults, WorkDescriptor,
};
use crate::error::{Result, SubsetterError};
use crate::helper_functions::Utils;
use crate::library::item_title;
use crate::session_state::SessionState;
use crate::subtitle_utils::SubtitleUtils;
use crate::task_manager::TaskManager;

/// Candidate index meaning "leave this item alone"
pub const SKIP_SELECTION: i64 = -1;

/// What to search for and where
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Display name or ISO 639-1 code
    pub language: String,
    pub providers: Vec<String>,
    pub timeout: Duration,
    pub prefer_sdh: bool,
    pub prefer_forced: bool,
    #[serde(default)]
    pub save_method: SaveMethod,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            providers: Utils::split_providers(DEFAULT_PROVIDERS),
            timeout: Duration::from_secs(DEFAULT_SEARCH_TIMEOUT),
            prefer_sdh: false,
            prefer_forced: false,
            save_method: SaveMethod::default(),
        }
    }
}

impl SearchOptions {
    pub fn language_code(&self) -> &'static str {
        SubtitleUtils::language_code(&self.language)
    }

    fn open_session(&self, provider: &dyn SubtitleProvider) -> Result<ScopedSession> {
        ScopedSession::open(provider, &self.providers, &ProviderConfig { timeout: self.timeout })
    }
}

fn note(events: Option<&TaskManager>, level: Level, message: &str) {
    match events {
        Some(events) => events.emit_log(level, message),
        None => log::log!(level, "{message}"),
    }
}

fn progress(events: Option<&TaskManager>, operation: &str, current: usize, total: usize, title: &str) {
    if let Some(events) = events {
        let title = Utils::truncate_string(title, MAX_TITLE_LENGTH);
        events.emit_progress(operation, current, total, Some(&title));
    }
}

fn failed(item: &MediaItem, error: impl ToString) -> FailedItem {
    FailedItem {
        rating_key: item.rating_key,
        title: item_title(item),
        error: error.to_string(),
    }
}

fn check_content_size(content: &[u8]) -> Result<()> {
    if content.len() > MAX_SUBTITLE_BYTES {
        return Err(SubsetterError::Provider(format!(
            "Subtitle content exceeds maximum size: {} bytes (max {MAX_SUBTITLE_BYTES})",
            content.len()
        )));
    }
    Ok(())
}

/// Put downloaded content on the item the way `method` asks
///
/// A failed file save falls back to uploading through the server.
fn store_subtitle(
    server: &ServerHandle,
    item: &MediaItem,
    language_code: &str,
    content: &[u8],
    method: SaveMethod,
    events: Option<&TaskManager>,
) -> Result<()> {
    if method == SaveMethod::File {
        match server.save_subtitle_file(item, language_code, content) {
            Ok(path) => {
                note(events, Level::Info, &format!("Saved subtitle to: {}", path.display()));
                return Ok(());
            }
            Err(e) => note(
                events,
                Level::Warn,
                &format!("File save failed for {}: {e}, falling back to Plex upload", item_title(item)),
            ),
        }
    }
    server.add_subtitle(item, language_code, content)
}

/// Search every item and store the results in the session
///
/// Items without candidates are left out of the results. Fails only if
/// the provider session cannot be opened.
pub fn search(
    items: &[MediaItem],
    options: &SearchOptions,
    provider: &dyn SubtitleProvider,
    session: &SessionState,
    events: Option<&TaskManager>,
) -> Result<SearchResults> {
    let language_code = options.language_code();
    let generation = session.generation();
    let mut provider_session = options.open_session(provider)?;
    let mut results = SearchResults::new();
    let total = items.len();

    for (index, item) in items.iter().enumerate() {
        let title = item_title(item);
        progress(events, "search", index + 1, total, &title);
        note(events, Level::Info, &format!("Searching subtitles for: {title}"));

        match provider_session.search(&WorkDescriptor::from_item(item), language_code) {
            Ok(mut candidates) if !candidates.is_empty() => {
                let total_found = candidates.len();
                SubtitleUtils::rank_candidates(&mut candidates, options.prefer_sdh, options.prefer_forced);
                candidates.truncate(MAX_SUBTITLE_RESULTS);
                for candidate in &mut candidates {
                    candidate.release_info = Utils::truncate_string(&candidate.release_info, MAX_RELEASE_INFO_LENGTH);
                }
                note(events, Level::Info, &format!("Found {total_found} subtitle(s) for: {title}"));
                results.insert(
                    item.rating_key,
                    SearchResult {
                        title,
                        item: item.clone(),
                        subtitles: candidates,
                        total_found,
                    },
                );
            }
            Ok(_) => note(events, Level::Warn, &format!("No subtitles found for: {title}")),
            Err(e) => note(events, Level::Error, &format!("Error searching for {title}: {e}")),
        }
    }

    log::info!("Search finished: {} of {total} items have candidates", results.len());
    if !session.set_search_results_in(generation, results.clone()) {
        log::info!("Session was reset during the search, results not stored");
    }
    Ok(results)
}

/// Download the chosen candidate for each selection and add it to the item
///
/// `selections` maps rating keys to an index into that item's search
/// results; `SKIP_SELECTION` skips the item.
pub fn download(
    selections: &BTreeMap<RatingKey, i64>,
    options: &SearchOptions,
    provider: &dyn SubtitleProvider,
    server: &ServerHandle,
    session: &SessionState,
    events: Option<&TaskManager>,
) -> Result<MutationReport> {
    let language_code = options.language_code();
    let generation = session.generation();
    let search_results = session.search_results();
    let mut report = MutationReport {
        total_count: selections.len(),
        ..MutationReport::default()
    };
    let mut succeeded_items = Vec::new();

    if selections.values().any(|index| *index != SKIP_SELECTION) {
        let mut provider_session = options.open_session(provider)?;
        let total = selections.len();

        for (position, (key, index)) in selections.iter().enumerate() {
            let Some(result) = search_results.get(key) else {
                if *index != SKIP_SELECTION {
                    report.failed.push(FailedItem {
                        rating_key: *key,
                        title: key.to_string(),
                        error: "no search results for item".into(),
                    });
                } else {
                    report.skipped.push(*key);
                }
                continue;
            };
            if *index == SKIP_SELECTION {
                note(events, Level::Info, &format!("Skipped: {}", result.title));
                report.skipped.push(*key);
                continue;
            }
            progress(events, "download", position + 1, total, &result.title);

            let Some(candidate) = usize::try_from(*index).ok().and_then(|i| result.subtitles.get(i)) else {
                report.failed.push(failed(&result.item, format!("no candidate at index {index}")));
                continue;
            };

            let outcome = provider_session
                .fetch_content(candidate)
                .and_then(|content| {
                    check_content_size(&content)?;
                    store_subtitle(server, &result.item, language_code, &content, options.save_method, events)
                });
            match outcome {
                Ok(()) => {
                    note(events, Level::Info, &format!("Successfully downloaded subtitle for: {}", result.title));
                    report.success_count += 1;
                    report.successful_keys.push(*key);
                    succeeded_items.push(result.item.clone());
                }
                Err(e) => {
                    note(events, Level::Error, &format!("Error downloading for {}: {e}", result.title));
                    report.failed.push(failed(&result.item, e));
                }
            }
        }
    } else {
        report.skipped.extend(selections.keys().copied());
    }

    refresh_mutated(server, session, &succeeded_items);
    session.finish_download_in(generation, report.clone(), report.success_count > 0);
    log::info!(
        "Download finished: {}/{} succeeded, {} failed, {} skipped",
        report.success_count,
        report.total_count,
        report.failed.len(),
        report.skipped.len()
    );
    Ok(report)
}

/// Reload mutated items (best effort) and drop their cached status
fn refresh_mutated(server: &ServerHandle, session: &SessionState, items: &[MediaItem]) {
    for item in items {
        if let Err(e) = server.reload(item) {
            log::debug!("Could not reload {} after change: {e}", item_title(item));
        }
    }
    let keys: Vec<RatingKey> = items.iter().map(|item| item.rating_key).collect();
    session.clear_subtitle_cache(Some(&keys));
}

/// Preview what a download would find, without changing anything
///
/// Items already holding a resident stream in the language are not
/// searched. Fails only if the provider session cannot be opened.
pub fn dry_run(
    items: &[MediaItem],
    options: &SearchOptions,
    provider: &dyn SubtitleProvider,
    events: Option<&TaskManager>,
) -> Result<DryRunReport> {
    let language_code = options.language_code();
    let mut report = DryRunReport::default();
    let mut provider_session = None;
    let total = items.len();

    for (index, item) in items.iter().enumerate() {
        let title = item_title(item);
        progress(events, "dry_run", index + 1, total, &title);

        if SubtitleUtils::has_subtitle_for_language(item, language_code) {
            let count = item
                .resident_streams()
                .filter(|s| {
                    s.language_code
                        .as_deref()
                        .is_some_and(|code| code.to_lowercase().starts_with(language_code))
                })
                .count();
            report.already_have.push(DryRunEntry {
                rating_key: item.rating_key,
                title,
                count,
            });
            continue;
        }

        if provider_session.is_none() {
            provider_session = Some(options.open_session(provider)?);
        }
        let Some(open) = provider_session.as_mut() else {
            continue;
        };
        match open.search(&WorkDescriptor::from_item(item), language_code) {
            Ok(candidates) => {
                let count = candidates.len();
                note(events, Level::Info, &format!("{title}: {count} subtitle(s) available"));
                let entry = DryRunEntry {
                    rating_key: item.rating_key,
                    title,
                    count,
                };
                if count > 0 {
                    report.available.push(entry);
                } else {
                    report.not_available.push(entry);
                }
            }
            Err(e) => {
                note(events, Level::Error, &format!("Error checking {title}: {e}"));
                report.errors.push(failed(item, e));
            }
        }
    }

    log::info!(
        "Dry run: {} already have, {} available, {} not available, {} errors",
        report.already_have.len(),
        report.available.len(),
        report.not_available.len(),
        report.errors.len()
    );
    Ok(report)
}

/// Current subtitle streams per item; items without streams are omitted
pub fn list_current(server: &ServerHandle, items: &[MediaItem]) -> Vec<ItemStreams> {
    items
        .iter()
        .filter_map(|item| match server.list_subtitle_streams(item) {
            Ok(streams) if !streams.is_empty() => Some(ItemStreams {
                rating_key: item.rating_key,
                title: item_title(item),
                streams,
            }),
            Ok(_) => None,
            Err(e) => {
                log::debug!("Error reading subtitle streams for {}: {e}", item_title(item));
                None
            }
        })
        .collect()
}

/// Remove every subtitle stream from each item
pub fn delete(
    server: &ServerHandle,
    items: &[MediaItem],
    session: &SessionState,
    events: Option<&TaskManager>,
) -> MutationReport {
    let mut report = MutationReport {
        total_count: items.len(),
        ..MutationReport::default()
    };
    let mut changed = Vec::new();

    for (index, item) in items.iter().enumerate() {
        let title = item_title(item);
        progress(events, "delete", index + 1, items.len(), &title);

        let outcome = server.list_subtitle_streams(item).and_then(|streams| {
            let mut deleted = 0;
            for stream in &streams {
                server.remove_subtitle(item, stream)?;
                deleted += 1;
            }
            Ok(deleted)
        });
        match outcome {
            Ok(0) => {
                note(events, Level::Warn, &format!("No subtitles to delete for: {title}"));
                report.skipped.push(item.rating_key);
            }
            Ok(deleted) => {
                note(events, Level::Info, &format!("Deleted {deleted} subtitle stream(s) from: {title}"));
                report.success_count += 1;
                report.successful_keys.push(item.rating_key);
                changed.push(item.clone());
            }
            Err(e) => {
                note(events, Level::Error, &format!("Error deleting from {title}: {e}"));
                // A partial delete still changed the item
                changed.push(item.clone());
                report.failed.push(failed(item, e));
            }
        }
    }

    refresh_mutated(server, session, &changed);
    report
}
