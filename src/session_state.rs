//! In-memory session state
//!
//! Holds the active server connection, the item selection and the caches
//! for one application session. Every access takes the lock for O(1) work
//! (or a copy) and never across network I/O, so the interactive thread and
//! any number of workers can share one `Arc<SessionState>`.
//!
//! `clear_auth` starts a new generation. Workers capture `generation()`
//! when they start and write through the `*_in` methods, which drop writes
//! from an older generation so a logout is never undone by a batch that
//! was still running.

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::collaborators::ServerHandle;
use crate::data_structures::{MediaItem, MutationReport, RatingKey, SearchResults};

#[derive(Default)]
struct Inner {
    generation: u64,
    connection: Option<ServerHandle>,
    selection: Vec<MediaItem>,
    subtitle_status_cache: HashMap<RatingKey, bool>,
    library_items_cache: HashMap<String, Vec<MediaItem>>,
    search_results: SearchResults,
    last_download_result: Option<MutationReport>,
}

/// Thread-safe store for all mutable session data
#[derive(Default)]
pub struct SessionState {
    inner: Mutex<Inner>,
    // Keys whose status is being resolved right now, by any batch
    in_flight: Mutex<HashSet<RatingKey>>,
    in_flight_done: Condvar,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SessionState")
            .field("connected", &inner.connection.is_some())
            .field("selected", &inner.selection.len())
            .field("cached_statuses", &inner.subtitle_status_cache.len())
            .finish()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The inner state, if it still belongs to `generation`
    fn lock_current(&self, generation: u64) -> Option<MutexGuard<'_, Inner>> {
        let inner = self.lock();
        if inner.generation == generation {
            Some(inner)
        } else {
            log::debug!("Dropping write from session generation {generation}, now {}", inner.generation);
            None
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<RatingKey>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ----- connection -----

    /// Replace the active server connection wholesale
    pub fn set_connection(&self, handle: ServerHandle) {
        self.lock().connection = Some(handle);
    }

    pub fn connection(&self) -> Option<ServerHandle> {
        self.lock().connection.clone()
    }

    /// Forget the connection, the selection and every cache
    pub fn clear_auth(&self) {
        let mut inner = self.lock();
        let generation = inner.generation + 1;
        *inner = Inner {
            generation,
            ..Inner::default()
        };
    }

    /// Bumped by every `clear_auth`
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    // ----- selection -----

    pub fn add_selection(&self, item: MediaItem) {
        let mut inner = self.lock();
        if !inner.selection.iter().any(|i| i.rating_key == item.rating_key) {
            inner.selection.push(item);
        }
    }

    pub fn remove_selection(&self, item: &MediaItem) {
        self.lock().selection.retain(|i| i.rating_key != item.rating_key);
    }

    pub fn clear_selection(&self) {
        self.lock().selection.clear();
    }

    /// Replace the selection with the known items among `keys`
    pub fn set_selection_by_keys(&self, keys: &[RatingKey], items: &[MediaItem]) {
        let by_key: HashMap<RatingKey, &MediaItem> = items.iter().map(|i| (i.rating_key, i)).collect();
        let mut selection: Vec<MediaItem> = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(item) = by_key.get(key) {
                if !selection.iter().any(|i| i.rating_key == *key) {
                    selection.push((*item).clone());
                }
            }
        }
        self.lock().selection = selection;
    }

    pub fn get_selected_keys(&self) -> Vec<RatingKey> {
        self.lock().selection.iter().map(|i| i.rating_key).collect()
    }

    pub fn selected_items(&self) -> Vec<MediaItem> {
        self.lock().selection.clone()
    }

    pub fn selection_len(&self) -> usize {
        self.lock().selection.len()
    }

    // ----- subtitle status cache -----

    pub fn cache_subtitle_status(&self, rating_key: RatingKey, has_subtitles: bool) {
        self.lock().subtitle_status_cache.insert(rating_key, has_subtitles);
    }

    pub fn get_subtitle_status(&self, rating_key: RatingKey) -> Option<bool> {
        self.lock().subtitle_status_cache.get(&rating_key).copied()
    }

    /// `cache_subtitle_status` unless the session moved past `generation`
    pub fn cache_subtitle_status_in(&self, generation: u64, rating_key: RatingKey, has_subtitles: bool) -> bool {
        match self.lock_current(generation) {
            Some(mut inner) => {
                inner.subtitle_status_cache.insert(rating_key, has_subtitles);
                true
            }
            None => false,
        }
    }

    /// Cache a resolved status without ever downgrading `true` to `false`
    ///
    /// Returns the value left in the cache, or `None` if the session moved
    /// past `generation`.
    pub fn record_subtitle_status_in(&self, generation: u64, rating_key: RatingKey, has_subtitles: bool) -> Option<bool> {
        let mut inner = self.lock_current(generation)?;
        let entry = inner.subtitle_status_cache.entry(rating_key).or_insert(has_subtitles);
        *entry |= has_subtitles;
        Some(*entry)
    }

    /// Clear the named keys, or the whole cache when `keys` is `None`
    pub fn clear_subtitle_cache(&self, keys: Option<&[RatingKey]>) {
        let mut inner = self.lock();
        match keys {
            Some(keys) => {
                for key in keys {
                    inner.subtitle_status_cache.remove(key);
                }
            }
            None => inner.subtitle_status_cache.clear(),
        }
    }

    pub fn subtitle_cache_snapshot(&self) -> HashMap<RatingKey, bool> {
        self.lock().subtitle_status_cache.clone()
    }

    // ----- library items cache -----

    pub fn cached_library_items(&self, library_name: &str) -> Option<Vec<MediaItem>> {
        self.lock().library_items_cache.get(library_name).cloned()
    }

    pub fn cache_library_items_in(&self, generation: u64, library_name: &str, items: Vec<MediaItem>) -> bool {
        match self.lock_current(generation) {
            Some(mut inner) => {
                inner.library_items_cache.insert(library_name.to_string(), items);
                true
            }
            None => false,
        }
    }

    /// Drop one library's items, or every library when `None`
    pub fn invalidate_library_items(&self, library_name: Option<&str>) {
        let mut inner = self.lock();
        match library_name {
            Some(name) => {
                inner.library_items_cache.remove(name);
            }
            None => inner.library_items_cache.clear(),
        }
    }

    /// Map of rating key to item across every cached library
    pub fn items_map(&self) -> HashMap<RatingKey, MediaItem> {
        self.lock()
            .library_items_cache
            .values()
            .flatten()
            .map(|item| (item.rating_key, item.clone()))
            .collect()
    }

    // ----- search / download results -----

    pub fn set_search_results_in(&self, generation: u64, results: SearchResults) -> bool {
        match self.lock_current(generation) {
            Some(mut inner) => {
                inner.search_results = results;
                true
            }
            None => false,
        }
    }

    pub fn search_results(&self) -> SearchResults {
        self.lock().search_results.clone()
    }

    /// Record a finished download batch, clearing the search results it
    /// consumed when `consumed` is set
    pub fn finish_download_in(&self, generation: u64, report: MutationReport, consumed: bool) -> bool {
        match self.lock_current(generation) {
            Some(mut inner) => {
                if consumed {
                    inner.search_results.clear();
                }
                inner.last_download_result = Some(report);
                true
            }
            None => false,
        }
    }

    pub fn last_download_result(&self) -> Option<MutationReport> {
        self.lock().last_download_result.clone()
    }

    // ----- in-flight status checks -----

    /// Claim a key for status resolution; `false` if another check holds it
    pub fn begin_status_check(&self, rating_key: RatingKey) -> bool {
        self.lock_in_flight().insert(rating_key)
    }

    /// Release a claim and wake anyone waiting on it
    pub fn finish_status_check(&self, rating_key: RatingKey) {
        self.lock_in_flight().remove(&rating_key);
        self.in_flight_done.notify_all();
    }

    pub fn is_status_check_in_flight(&self, rating_key: RatingKey) -> bool {
        self.lock_in_flight().contains(&rating_key)
    }

    /// Wait until no check holds `rating_key`, then read the cache
    ///
    /// Returns `None` if the deadline passes first or the other check left
    /// the key uncached.
    pub fn wait_for_status_check(&self, rating_key: RatingKey, timeout: Duration) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        let mut in_flight = self.lock_in_flight();
        while in_flight.contains(&rating_key) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            in_flight = match self.in_flight_done.wait_timeout(in_flight, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        drop(in_flight);
        self.get_subtitle_status(rating_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeServer;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    fn movie(key: RatingKey) -> MediaItem {
        MediaItem::movie(key, format!("Movie {key}"), Some(2000))
    }

    #[test]
    fn add_selection_is_idempotent() {
        let state = SessionState::new();
        state.add_selection(movie(1));
        state.add_selection(movie(1));
        assert_eq!(state.get_selected_keys(), vec![1]);
    }

    #[test]
    fn remove_absent_selection_is_noop() {
        let state = SessionState::new();
        state.add_selection(movie(1));
        state.remove_selection(&movie(2));
        assert_eq!(state.get_selected_keys(), vec![1]);
        state.remove_selection(&movie(1));
        state.remove_selection(&movie(1));
        assert!(state.get_selected_keys().is_empty());
    }

    #[test]
    fn selection_keeps_insertion_order() {
        let state = SessionState::new();
        for key in [5, 3, 9] {
            state.add_selection(movie(key));
        }
        assert_eq!(state.get_selected_keys(), vec![5, 3, 9]);
    }

    #[test]
    fn set_selection_by_keys_skips_unknown_keys() {
        let state = SessionState::new();
        let items = vec![movie(1), movie(2)];
        state.set_selection_by_keys(&[2, 7, 1, 2], &items);
        assert_eq!(state.get_selected_keys(), vec![2, 1]);
    }

    #[test]
    fn clear_auth_resets_everything() {
        let state = SessionState::new();
        state.set_connection(Arc::new(FakeServer::new()));
        state.add_selection(movie(1));
        state.cache_subtitle_status(1, true);
        state.cache_library_items_in(0, "Movies", vec![movie(1)]);

        state.clear_auth();

        assert!(state.connection().is_none());
        assert_eq!(state.selection_len(), 0);
        assert_eq!(state.get_subtitle_status(1), None);
        assert!(state.cached_library_items("Movies").is_none());
    }

    #[test]
    fn writes_from_before_clear_auth_are_dropped() {
        let state = SessionState::new();
        let before = state.generation();
        assert!(state.cache_subtitle_status_in(before, 1, false));

        state.clear_auth();
        let after = state.generation();
        assert_ne!(before, after);

        assert_eq!(state.record_subtitle_status_in(before, 2, true), None);
        assert!(!state.cache_subtitle_status_in(before, 3, true));
        assert!(!state.cache_library_items_in(before, "Movies", vec![movie(1)]));
        assert!(!state.set_search_results_in(before, SearchResults::new()));
        assert!(!state.finish_download_in(before, MutationReport::default(), true));
        assert!(state.subtitle_cache_snapshot().is_empty());
        assert!(state.cached_library_items("Movies").is_none());
        assert!(state.last_download_result().is_none());

        assert_eq!(state.record_subtitle_status_in(after, 2, true), Some(true));
        assert!(state.cache_library_items_in(after, "Movies", vec![movie(1)]));
    }

    #[test]
    fn clear_subtitle_cache_by_key_or_all() {
        let state = SessionState::new();
        state.cache_subtitle_status(1, true);
        state.cache_subtitle_status(2, false);
        state.cache_subtitle_status(3, true);

        state.clear_subtitle_cache(Some(&[1, 42]));
        assert_eq!(state.get_subtitle_status(1), None);
        assert_eq!(state.get_subtitle_status(2), Some(false));

        state.clear_subtitle_cache(Some(&[]));
        assert_eq!(state.subtitle_cache_snapshot().len(), 2);

        state.clear_subtitle_cache(None);
        assert!(state.subtitle_cache_snapshot().is_empty());
    }

    #[test]
    fn record_status_never_downgrades() {
        let state = SessionState::new();
        assert_eq!(state.record_subtitle_status_in(0, 1, false), Some(false));
        assert_eq!(state.record_subtitle_status_in(0, 1, true), Some(true));
        assert_eq!(state.record_subtitle_status_in(0, 1, false), Some(true));
        assert_eq!(state.get_subtitle_status(1), Some(true));
    }

    #[test]
    fn waiter_sees_result_of_claim_holder() {
        let state = Arc::new(SessionState::new());
        assert!(state.begin_status_check(7));
        assert!(!state.begin_status_check(7));

        let holder = Arc::clone(&state);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            holder.record_subtitle_status_in(0, 7, true);
            holder.finish_status_check(7);
        });

        assert_eq!(state.wait_for_status_check(7, Duration::from_secs(5)), Some(true));
        handle.join().unwrap();
        assert!(!state.is_status_check_in_flight(7));
    }

    #[test]
    fn waiter_gives_up_at_deadline() {
        let state = SessionState::new();
        assert!(state.begin_status_check(3));
        assert_eq!(state.wait_for_status_check(3, Duration::from_millis(20)), None);
    }

    #[test]
    fn concurrent_writers_do_not_lose_entries() {
        let state = Arc::new(SessionState::new());
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    for i in 0..100u64 {
                        state.cache_subtitle_status(t * 1000 + i, i % 2 == 0);
                        state.add_selection(movie(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(state.subtitle_cache_snapshot().len(), 800);
        assert_eq!(state.selection_len(), 100);
    }

    proptest! {
        #[test]
        fn true_survives_any_sequence_of_recorded_results(
            results in proptest::collection::vec(any::<bool>(), 0..50)
        ) {
            let state = SessionState::new();
            state.cache_subtitle_status(1, true);
            for has in results {
                state.record_subtitle_status_in(0, 1, has);
            }
            prop_assert_eq!(state.get_subtitle_status(1), Some(true));
        }

        #[test]
        fn selection_never_holds_duplicates(
            keys in proptest::collection::vec(0u64..20, 0..100)
        ) {
            let state = SessionState::new();
            for key in &keys {
                state.add_selection(movie(*key));
            }
            let selected = state.get_selected_keys();
            let unique: HashSet<_> = keys.iter().copied().collect();
            prop_assert_eq!(selected.len(), unique.len());
        }
    }
}
