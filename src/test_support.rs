//! In-memory collaborators for unit tests

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::collaborators::{
    MediaServer, ProviderConfig, ProviderSession, ServerConnector, ServerHandle, SubtitleProvider,
};
use crate::data_structures::{
    CandidateSubtitle, LibraryInfo, LibraryKind, MediaItem, MediaPart, RatingKey, SeasonInfo, ShowInfo,
    StreamInfo, WorkDescriptor,
};
use crate::error::{Result, SubsetterError};

pub fn stream(id: u64, code: &str) -> StreamInfo {
    StreamInfo {
        id,
        language: Some(code.to_uppercase()),
        language_code: Some(code.to_string()),
        codec: Some("srt".into()),
        forced: false,
        hearing_impaired: false,
        selected: false,
    }
}

pub fn part_with(streams: Vec<StreamInfo>) -> MediaPart {
    MediaPart {
        file: Some("/media/file.mkv".into()),
        subtitle_streams: streams,
    }
}

/// Server whose `reload` returns the stored truth for each item
#[derive(Default)]
pub struct FakeServer {
    truth: Mutex<HashMap<RatingKey, MediaItem>>,
    libraries: Mutex<Vec<(LibraryInfo, Vec<RatingKey>)>>,
    reload_counts: Mutex<HashMap<RatingKey, usize>>,
    reload_delay: Mutex<HashMap<RatingKey, Duration>>,
    failing: Mutex<HashSet<RatingKey>>,
    broken_libraries: Mutex<HashMap<String, String>>,
    shows: Mutex<Vec<(String, ShowInfo)>>,
    seasons: Mutex<HashMap<RatingKey, Vec<SeasonInfo>>>,
    episodes: Mutex<HashMap<RatingKey, Vec<RatingKey>>>,
    failing_file_saves: Mutex<HashSet<RatingKey>>,
    saved_files: Mutex<Vec<PathBuf>>,
    uploads: AtomicUsize,
    list_failures_left: AtomicUsize,
    next_stream_id: AtomicUsize,
    active_reloads: AtomicUsize,
    max_active_reloads: AtomicUsize,
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            next_stream_id: AtomicUsize::new(1000),
            ..Self::default()
        }
    }

    /// Store the server-side truth for an item
    pub fn put(&self, item: MediaItem) {
        let mut item = item;
        if item.media.is_none() {
            item.media = Some(vec![part_with(Vec::new())]);
        }
        self.truth.lock().unwrap().insert(item.rating_key, item);
    }

    pub fn put_library(&self, name: &str, kind: LibraryKind, items: Vec<MediaItem>) {
        let keys = items.iter().map(|i| i.rating_key).collect();
        for item in items {
            self.put(item);
        }
        self.libraries.lock().unwrap().push((
            LibraryInfo {
                name: name.to_string(),
                kind,
            },
            keys,
        ));
    }

    /// Register a show with its seasons and their episodes
    pub fn put_show(&self, library_name: &str, show: ShowInfo, seasons: Vec<(SeasonInfo, Vec<MediaItem>)>) {
        {
            let mut libraries = self.libraries.lock().unwrap();
            if !libraries.iter().any(|(info, _)| info.name == library_name) {
                libraries.push((
                    LibraryInfo {
                        name: library_name.to_string(),
                        kind: LibraryKind::Show,
                    },
                    Vec::new(),
                ));
            }
        }
        let mut season_infos = Vec::new();
        for (season, episodes) in seasons {
            let keys = episodes.iter().map(|e| e.rating_key).collect();
            for episode in episodes {
                self.put(episode);
            }
            self.episodes.lock().unwrap().insert(season.rating_key, keys);
            season_infos.push(season);
        }
        self.seasons.lock().unwrap().insert(show.rating_key, season_infos);
        self.shows.lock().unwrap().push((library_name.to_string(), show));
    }

    /// Make `list_items` for this library fail with an unexpected error
    pub fn break_library(&self, library_name: &str, message: &str) {
        self.broken_libraries
            .lock()
            .unwrap()
            .insert(library_name.to_string(), message.to_string());
    }

    pub fn fail_file_save(&self, key: RatingKey) {
        self.failing_file_saves.lock().unwrap().insert(key);
    }

    pub fn saved_files(&self) -> Vec<PathBuf> {
        self.saved_files.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn attach_stream(&self, item: &MediaItem, language_code: &str) -> Result<()> {
        let id = self.next_stream_id.fetch_add(1, Ordering::SeqCst) as u64;
        let mut truth = self.truth.lock().unwrap();
        let stored = truth
            .get_mut(&item.rating_key)
            .ok_or_else(|| SubsetterError::not_found("Item", item.rating_key.to_string()))?;
        let parts = stored.media.get_or_insert_with(Vec::new);
        if parts.is_empty() {
            parts.push(part_with(Vec::new()));
        }
        parts[0].subtitle_streams.push(stream(id, language_code));
        Ok(())
    }

    pub fn reloads(&self, key: RatingKey) -> usize {
        self.reload_counts.lock().unwrap().get(&key).copied().unwrap_or(0)
    }

    pub fn total_reloads(&self) -> usize {
        self.reload_counts.lock().unwrap().values().sum()
    }

    pub fn max_concurrent_reloads(&self) -> usize {
        self.max_active_reloads.load(Ordering::SeqCst)
    }

    pub fn delay_reload(&self, key: RatingKey, delay: Duration) {
        self.reload_delay.lock().unwrap().insert(key, delay);
    }

    pub fn fail_reload(&self, key: RatingKey) {
        self.failing.lock().unwrap().insert(key);
    }

    pub fn fail_next_listings(&self, count: usize) {
        self.list_failures_left.store(count, Ordering::SeqCst);
    }

    pub fn stream_count(&self, key: RatingKey) -> usize {
        self.truth
            .lock()
            .unwrap()
            .get(&key)
            .map(|i| i.resident_streams().count())
            .unwrap_or(0)
    }
}

impl MediaServer for FakeServer {
    fn name(&self) -> String {
        "fake".into()
    }

    fn list_libraries(&self) -> Result<Vec<LibraryInfo>> {
        let left = self.list_failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.list_failures_left.store(left - 1, Ordering::SeqCst);
            return Err(SubsetterError::connectivity("fake", "connection reset"));
        }
        Ok(self
            .libraries
            .lock()
            .unwrap()
            .iter()
            .map(|(info, _)| info.clone())
            .collect())
    }

    fn list_items(&self, library_name: &str) -> Result<Vec<MediaItem>> {
        if let Some(message) = self.broken_libraries.lock().unwrap().get(library_name) {
            return Err(SubsetterError::Unexpected(message.clone()));
        }
        let libraries = self.libraries.lock().unwrap();
        let (_, keys) = libraries
            .iter()
            .find(|(info, _)| info.name == library_name)
            .ok_or_else(|| SubsetterError::not_found("Library", library_name))?;
        let truth = self.truth.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|k| truth.get(k))
            .map(|item| MediaItem {
                media: None,
                ..item.clone()
            })
            .collect())
    }

    fn list_shows(&self, library_name: &str) -> Result<Vec<ShowInfo>> {
        Ok(self
            .shows
            .lock()
            .unwrap()
            .iter()
            .filter(|(library, _)| library == library_name)
            .map(|(_, show)| show.clone())
            .collect())
    }

    fn list_seasons(&self, show: &ShowInfo) -> Result<Vec<SeasonInfo>> {
        self.seasons
            .lock()
            .unwrap()
            .get(&show.rating_key)
            .cloned()
            .ok_or_else(|| SubsetterError::not_found("Show", show.title.clone()))
    }

    fn list_episodes(&self, season: &SeasonInfo) -> Result<Vec<MediaItem>> {
        let episodes = self.episodes.lock().unwrap();
        let keys = episodes
            .get(&season.rating_key)
            .ok_or_else(|| SubsetterError::not_found("Season", season.title.clone()))?;
        let truth = self.truth.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|k| truth.get(k))
            .map(|item| MediaItem {
                media: None,
                ..item.clone()
            })
            .collect())
    }

    fn reload(&self, item: &MediaItem) -> Result<MediaItem> {
        *self
            .reload_counts
            .lock()
            .unwrap()
            .entry(item.rating_key)
            .or_insert(0) += 1;
        let active = self.active_reloads.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_reloads.fetch_max(active, Ordering::SeqCst);
        let delay = self.reload_delay.lock().unwrap().get(&item.rating_key).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.active_reloads.fetch_sub(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&item.rating_key) {
            return Err(SubsetterError::connectivity("fake", "connection reset"));
        }
        self.truth
            .lock()
            .unwrap()
            .get(&item.rating_key)
            .cloned()
            .ok_or_else(|| SubsetterError::not_found("Item", item.rating_key.to_string()))
    }

    fn list_subtitle_streams(&self, item: &MediaItem) -> Result<Vec<StreamInfo>> {
        let truth = self.truth.lock().unwrap();
        let stored = truth
            .get(&item.rating_key)
            .ok_or_else(|| SubsetterError::not_found("Item", item.rating_key.to_string()))?;
        Ok(stored.resident_streams().cloned().collect())
    }

    fn add_subtitle(&self, item: &MediaItem, language_code: &str, _content: &[u8]) -> Result<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.attach_stream(item, language_code)
    }

    fn save_subtitle_file(&self, item: &MediaItem, language_code: &str, _content: &[u8]) -> Result<PathBuf> {
        if self.failing_file_saves.lock().unwrap().contains(&item.rating_key) {
            return Err(SubsetterError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "media folder is read-only",
            )));
        }
        let path = PathBuf::from(format!("/media/{}.{language_code}.srt", item.rating_key));
        self.attach_stream(item, language_code)?;
        self.saved_files.lock().unwrap().push(path.clone());
        Ok(path)
    }

    fn remove_subtitle(&self, item: &MediaItem, stream: &StreamInfo) -> Result<()> {
        let mut truth = self.truth.lock().unwrap();
        let stored = truth
            .get_mut(&item.rating_key)
            .ok_or_else(|| SubsetterError::not_found("Item", item.rating_key.to_string()))?;
        for part in stored.media.iter_mut().flatten() {
            part.subtitle_streams.retain(|s| s.id != stream.id);
        }
        Ok(())
    }
}

/// Connector that fails a fixed number of times before handing out a server
pub struct FakeConnector {
    pub server: Arc<FakeServer>,
    pub failures_left: AtomicUsize,
    pub attempts: AtomicUsize,
    pub auth_failure: bool,
}

impl FakeConnector {
    pub fn new(server: Arc<FakeServer>, failures: usize) -> Self {
        Self {
            server,
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
            auth_failure: false,
        }
    }
}

impl ServerConnector for FakeConnector {
    fn connect(&self, _uri: &str, _timeout: Duration) -> Result<ServerHandle> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.auth_failure {
            return Err(SubsetterError::Authentication("401 Unauthorized".into()));
        }
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(SubsetterError::connectivity("fake", "connection refused"));
        }
        Ok(self.server.clone())
    }
}

/// Provider with canned candidates per title
#[derive(Default)]
pub struct FakeProvider {
    candidates: Mutex<HashMap<String, Vec<CandidateSubtitle>>>,
    failing_titles: Mutex<HashSet<String>>,
    oversized_titles: Mutex<HashSet<String>>,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    pub searches: Arc<AtomicUsize>,
    pub fetches: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&self, title: &str, count: usize) {
        let candidates = (0..count)
            .map(|i| CandidateSubtitle {
                id: format!("{title}-{i}"),
                provider: "opensubtitles".into(),
                release_info: format!("{title}.Release.{i}"),
                language_code: "en".into(),
                hearing_impaired: i % 2 == 1,
                forced: false,
                score: 100 - i as u32,
            })
            .collect();
        self.candidates.lock().unwrap().insert(title.to_string(), candidates);
    }

    pub fn fail_search(&self, title: &str) {
        self.failing_titles.lock().unwrap().insert(title.to_string());
    }

    /// Serve content larger than the accepted maximum for this title
    pub fn oversize(&self, title: &str) {
        self.oversized_titles.lock().unwrap().insert(title.to_string());
    }
}

struct FakeSession {
    candidates: HashMap<String, Vec<CandidateSubtitle>>,
    failing: HashSet<String>,
    oversized: HashSet<String>,
    closed: Arc<AtomicUsize>,
    searches: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
}

fn work_title(work: &WorkDescriptor) -> &str {
    match work {
        WorkDescriptor::Movie { title, .. } => title,
        WorkDescriptor::Episode { title, .. } => title,
    }
}

impl ProviderSession for FakeSession {
    fn search(&mut self, work: &WorkDescriptor, _language_code: &str) -> Result<Vec<CandidateSubtitle>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let title = work_title(work);
        if self.failing.contains(title) {
            return Err(SubsetterError::Provider(format!("search failed for {title}")));
        }
        Ok(self.candidates.get(title).cloned().unwrap_or_default())
    }

    fn fetch_content(&mut self, candidate: &CandidateSubtitle) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.oversized.iter().any(|title| candidate.id.starts_with(title.as_str())) {
            return Ok(vec![b'x'; crate::config::MAX_SUBTITLE_BYTES + 1]);
        }
        Ok(format!("1\n00:00:01,000 --> 00:00:02,000\n{}\n", candidate.id).into_bytes())
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl SubtitleProvider for FakeProvider {
    fn open_session(
        &self,
        _provider_names: &[String],
        _config: &ProviderConfig,
    ) -> Result<Box<dyn ProviderSession>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            candidates: self.candidates.lock().unwrap().clone(),
            failing: self.failing_titles.lock().unwrap().clone(),
            oversized: self.oversized_titles.lock().unwrap().clone(),
            closed: Arc::clone(&self.closed),
            searches: Arc::clone(&self.searches),
            fetches: Arc::clone(&self.fetches),
        }))
    }
}
