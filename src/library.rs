//! Server connection and library browsing

use serde::Serialize;

use crate::collaborators::{ServerConnector, ServerHandle};
use crate::config::SERVER_CONNECT_TIMEOUT;
use crate::crash_report::{CrashReporter, ErrorContext};
use crate::data_structures::{LibraryInfo, MediaItem, MediaKind, RatingKey, SeasonInfo, ShowInfo};
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::session_state::SessionState;

/// Subtitle status filter for a page of items
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum StatusFilter {
    #[default]
    All,
    Missing,
    Has,
}

impl StatusFilter {
    /// Items with an unknown status always pass
    fn admits(self, status: Option<bool>) -> bool {
        match (self, status) {
            (StatusFilter::All, _) | (_, None) => true,
            (StatusFilter::Missing, Some(has)) => !has,
            (StatusFilter::Has, Some(has)) => has,
        }
    }
}

/// One page of a filtered item list
#[derive(Debug, Clone, Serialize)]
pub struct ItemsPage {
    pub items: Vec<MediaItem>,
    /// 1-based, clamped to `1..=total_pages`
    pub page: usize,
    pub total_pages: usize,
    /// Items left after filtering
    pub total_items: usize,
    /// 1-based position of the first item on the page
    pub start: usize,
    pub end: usize,
    pub unfiltered_count: usize,
}

/// Connect with the critical retry policy and make it the active connection
pub fn connect(
    connector: &dyn ServerConnector,
    session: &SessionState,
    server_name: &str,
    uri: &str,
    reporter: Option<&CrashReporter>,
) -> Result<ServerHandle> {
    connect_with(&RetryPolicy::critical(), connector, session, server_name, uri, reporter)
}

pub fn connect_with(
    policy: &RetryPolicy,
    connector: &dyn ServerConnector,
    session: &SessionState,
    server_name: &str,
    uri: &str,
    reporter: Option<&CrashReporter>,
) -> Result<ServerHandle> {
    let operation = format!("server connection to {server_name}");
    let handle = ErrorContext::new("server connection", reporter)
        .with("server", server_name)
        .run(|| policy.run(&operation, || connector.connect(uri, SERVER_CONNECT_TIMEOUT)))?;
    log::info!("Connected to server {server_name}");
    session.set_connection(handle.clone());
    Ok(handle)
}

/// List library sections, retrying transient failures
pub fn get_libraries(server: &ServerHandle) -> Result<Vec<LibraryInfo>> {
    get_libraries_with(&RetryPolicy::standard(), server)
}

pub fn get_libraries_with(policy: &RetryPolicy, server: &ServerHandle) -> Result<Vec<LibraryInfo>> {
    let libraries = policy.run("list libraries", || server.list_libraries())?;
    log::debug!("Found {} libraries on {}", libraries.len(), server.name());
    Ok(libraries)
}

/// Items of a library, fetched once and then served from the session cache
///
/// `reload` drops the cached entry first.
pub fn get_library_items(
    session: &SessionState,
    server: &ServerHandle,
    library_name: &str,
    reload: bool,
) -> Result<Vec<MediaItem>> {
    if reload {
        session.invalidate_library_items(Some(library_name));
    } else if let Some(items) = session.cached_library_items(library_name) {
        return Ok(items);
    }
    let generation = session.generation();
    let items = server.list_items(library_name)?;
    log::info!("Loaded {} items from library {library_name}", items.len());
    session.cache_library_items_in(generation, library_name, items.clone());
    Ok(items)
}

/// Shows of a TV library
pub fn get_shows(server: &ServerHandle, library_name: &str) -> Result<Vec<ShowInfo>> {
    RetryPolicy::standard().run("list shows", || server.list_shows(library_name))
}

/// Seasons of a show in season order
pub fn get_seasons(server: &ServerHandle, show: &ShowInfo) -> Result<Vec<SeasonInfo>> {
    let mut seasons = RetryPolicy::standard().run("list seasons", || server.list_seasons(show))?;
    seasons.sort_by_key(|season| season.index);
    Ok(seasons)
}

/// Episodes of one season in episode order
///
/// Episodes come back without part data, ready for a status check.
pub fn season_episodes(server: &ServerHandle, season: &SeasonInfo) -> Result<Vec<MediaItem>> {
    let mut episodes = RetryPolicy::standard().run("list episodes", || server.list_episodes(season))?;
    episodes.sort_by_key(|episode| episode.episode_number.unwrap_or(0));
    log::debug!(
        "Loaded {} episodes of {} season {}",
        episodes.len(),
        season.show_title,
        season.index
    );
    Ok(episodes)
}

/// Search, filter by cached subtitle status, then slice one page out
pub fn items_page(
    items: &[MediaItem],
    page: usize,
    per_page: usize,
    search: &str,
    filter: StatusFilter,
    session: &SessionState,
) -> ItemsPage {
    let per_page = per_page.max(1);
    let needle = search.trim().to_lowercase();
    let filtered: Vec<&MediaItem> = items
        .iter()
        .filter(|item| needle.is_empty() || item.title.to_lowercase().contains(&needle))
        .filter(|item| filter.admits(session.get_subtitle_status(item.rating_key)))
        .collect();

    let total_items = filtered.len();
    let total_pages = total_items.div_ceil(per_page).max(1);
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * per_page;
    let end = (start + per_page).min(total_items);

    ItemsPage {
        items: filtered[start..end].iter().map(|item| (*item).clone()).collect(),
        page,
        total_pages,
        total_items,
        start: start + 1,
        end,
        unfiltered_count: items.len(),
    }
}

/// Display title: `Title (Year)` or `Show S01E02 - Title`
pub fn item_title(item: &MediaItem) -> String {
    match item.kind {
        MediaKind::Movie => match item.year {
            Some(year) => format!("{} ({year})", item.title),
            None => item.title.clone(),
        },
        MediaKind::Episode => format!(
            "{} S{:02}E{:02} - {}",
            item.show_title.as_deref().unwrap_or_default(),
            item.season_number.unwrap_or(0),
            item.episode_number.unwrap_or(0),
            item.title
        ),
    }
}

/// Replace the selection with every item; returns the selection size
pub fn select_all(session: &SessionState, items: &[MediaItem]) -> usize {
    let keys: Vec<RatingKey> = items.iter().map(|item| item.rating_key).collect();
    session.set_selection_by_keys(&keys, items);
    session.selection_len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::LibraryKind;
    use crate::error::SubsetterError;
    use crate::test_support::{FakeConnector, FakeServer};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn quick_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1)).retry_if(SubsetterError::is_retryable)
    }

    fn movies(count: u64) -> Vec<MediaItem> {
        (1..=count)
            .map(|key| MediaItem::movie(key, format!("Movie {key:03}"), Some(2000 + key as u32)))
            .collect()
    }

    #[test]
    fn connect_retries_then_stores_connection() {
        let server = Arc::new(FakeServer::new());
        let connector = FakeConnector::new(server, 2);
        let session = SessionState::new();

        let handle = connect_with(&quick_policy(5), &connector, &session, "home", "http://plex:32400", None).unwrap();

        assert_eq!(handle.name(), "fake");
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        assert!(session.connection().is_some());
    }

    #[test]
    fn auth_failure_is_reported_and_not_retried() {
        let dir = TempDir::new().unwrap();
        let reporter = CrashReporter::new(dir.path()).unwrap();
        let mut connector = FakeConnector::new(Arc::new(FakeServer::new()), 0);
        connector.auth_failure = true;
        let session = SessionState::new();

        let result = connect_with(&quick_policy(5), &connector, &session, "home", "uri", Some(&reporter));

        assert!(matches!(result, Err(SubsetterError::Authentication(_))));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert!(session.connection().is_none());
        assert_eq!(reporter.recent_crashes(5).len(), 1);
    }

    #[test]
    fn libraries_survive_a_transient_failure() {
        let fake = Arc::new(FakeServer::new());
        fake.put_library("Movies", LibraryKind::Movie, movies(2));
        fake.fail_next_listings(1);
        let server: ServerHandle = fake;

        let libraries = get_libraries_with(&quick_policy(3), &server).unwrap();

        assert_eq!(libraries.len(), 1);
        assert_eq!(libraries[0].name, "Movies");
    }

    #[test]
    fn library_items_are_cached_until_reload() {
        let fake = Arc::new(FakeServer::new());
        fake.put_library("Movies", LibraryKind::Movie, movies(3));
        let server: ServerHandle = fake.clone();
        let session = SessionState::new();

        assert_eq!(get_library_items(&session, &server, "Movies", false).unwrap().len(), 3);

        session.cache_library_items_in(session.generation(), "Movies", Vec::new());
        assert!(get_library_items(&session, &server, "Movies", false).unwrap().is_empty());
        assert_eq!(get_library_items(&session, &server, "Movies", true).unwrap().len(), 3);
        assert!(get_library_items(&session, &server, "Missing", false).is_err());
        assert!(session.cached_library_items("Movies").is_some());
    }

    fn wire(fake: &FakeServer) -> ShowInfo {
        let show = ShowInfo {
            rating_key: 500,
            title: "The Wire".into(),
            year: Some(2002),
        };
        let season = |key: RatingKey, index: u32| SeasonInfo {
            rating_key: key,
            show_title: "The Wire".into(),
            index,
            title: format!("Season {index}"),
        };
        fake.put_show(
            "TV Shows",
            show.clone(),
            vec![
                (
                    season(502, 2),
                    vec![MediaItem::episode(21, "The Wire", 2, 1, "Ebb Tide")],
                ),
                (
                    season(501, 1),
                    vec![
                        MediaItem::episode(12, "The Wire", 1, 2, "The Detail"),
                        MediaItem::episode(11, "The Wire", 1, 1, "The Target"),
                    ],
                ),
            ],
        );
        show
    }

    #[test]
    fn show_expands_into_ordered_seasons_and_episodes() {
        let fake = Arc::new(FakeServer::new());
        let show = wire(&fake);
        let server: ServerHandle = fake;

        assert_eq!(get_shows(&server, "TV Shows").unwrap(), vec![show.clone()]);
        let seasons = get_seasons(&server, &show).unwrap();
        let indexes: Vec<_> = seasons.iter().map(|s| s.index).collect();
        assert_eq!(indexes, vec![1, 2]);

        let episodes = season_episodes(&server, &seasons[0]).unwrap();
        let keys: Vec<_> = episodes.iter().map(|e| e.rating_key).collect();
        assert_eq!(keys, vec![11, 12]);
        assert!(episodes.iter().all(|e| e.media.is_none()));
    }

    #[test]
    fn unknown_season_is_not_found() {
        let server: ServerHandle = Arc::new(FakeServer::new());
        let season = SeasonInfo {
            rating_key: 9,
            show_title: "Nothing".into(),
            index: 1,
            title: "Season 1".into(),
        };
        assert!(matches!(
            season_episodes(&server, &season),
            Err(SubsetterError::NotFound { what: "Season", .. })
        ));
    }

    #[test]
    fn page_is_clamped_and_one_based() {
        let session = SessionState::new();
        let items = movies(120);

        let page = items_page(&items, 99, 50, "", StatusFilter::All, &session);
        assert_eq!(page.page, 3);
        assert_eq!(page.total_pages, 3);
        assert_eq!((page.start, page.end), (101, 120));
        assert_eq!(page.items.len(), 20);

        let first = items_page(&items, 0, 50, "", StatusFilter::All, &session);
        assert_eq!(first.page, 1);
        assert_eq!(first.items[0].rating_key, 1);
    }

    #[test]
    fn empty_result_still_has_one_page() {
        let session = SessionState::new();
        let page = items_page(&movies(4), 1, 50, "nothing matches", StatusFilter::All, &session);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.total_items, 0);
        assert_eq!(page.unfiltered_count, 4);
        assert!(page.items.is_empty());
    }

    #[test]
    fn status_filter_keeps_unknown_items() {
        let session = SessionState::new();
        let items = movies(3);
        session.cache_subtitle_status(1, true);
        session.cache_subtitle_status(2, false);

        let missing = items_page(&items, 1, 50, "", StatusFilter::Missing, &session);
        let keys: Vec<_> = missing.items.iter().map(|i| i.rating_key).collect();
        assert_eq!(keys, vec![2, 3]);

        let has = items_page(&items, 1, 50, "movie 00", StatusFilter::Has, &session);
        let keys: Vec<_> = has.items.iter().map(|i| i.rating_key).collect();
        assert_eq!(keys, vec![1, 3]);
        assert_eq!(has.unfiltered_count, 3);
    }

    #[test]
    fn display_titles() {
        assert_eq!(item_title(&MediaItem::movie(1, "Heat", Some(1995))), "Heat (1995)");
        assert_eq!(item_title(&MediaItem::movie(2, "Heat", None)), "Heat");
        assert_eq!(
            item_title(&MediaItem::episode(3, "The Wire", 1, 2, "The Detail")),
            "The Wire S01E02 - The Detail"
        );
    }

    #[test]
    fn select_all_replaces_selection() {
        let session = SessionState::new();
        session.add_selection(MediaItem::movie(99, "Other", None));
        let items = movies(4);

        assert_eq!(select_all(&session, &items), 4);
        assert_eq!(session.get_selected_keys(), vec![1, 2, 3, 4]);
    }
}
