//! Interfaces to the media server and the subtitle provider backend
//!
//! The core never talks HTTP itself. Whatever client library sits outside
//! implements these traits; every call is blocking and may only be made
//! from a worker thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::data_structures::{
    CandidateSubtitle, LibraryInfo, MediaItem, SeasonInfo, ShowInfo, StreamInfo, WorkDescriptor,
};
use crate::error::Result;

/// A connected Plex server
pub trait MediaServer: Send + Sync {
    fn name(&self) -> String;

    fn list_libraries(&self) -> Result<Vec<LibraryInfo>>;

    fn list_items(&self, library_name: &str) -> Result<Vec<MediaItem>>;

    fn list_shows(&self, library_name: &str) -> Result<Vec<ShowInfo>>;

    fn list_seasons(&self, show: &ShowInfo) -> Result<Vec<SeasonInfo>>;

    fn list_episodes(&self, season: &SeasonInfo) -> Result<Vec<MediaItem>>;

    /// Refresh media, part and subtitle-stream data for an item
    fn reload(&self, item: &MediaItem) -> Result<MediaItem>;

    fn list_subtitle_streams(&self, item: &MediaItem) -> Result<Vec<StreamInfo>>;

    fn add_subtitle(&self, item: &MediaItem, language_code: &str, content: &[u8]) -> Result<()>;

    /// Write the subtitle beside the item's video file and queue a rescan
    ///
    /// Returns the written path.
    fn save_subtitle_file(&self, item: &MediaItem, language_code: &str, content: &[u8]) -> Result<PathBuf>;

    fn remove_subtitle(&self, item: &MediaItem, stream: &StreamInfo) -> Result<()>;
}

/// Shared handle to the active server connection
pub type ServerHandle = Arc<dyn MediaServer>;

/// Opens connections to a server by URI
pub trait ServerConnector: Send + Sync {
    fn connect(&self, uri: &str, timeout: Duration) -> Result<ServerHandle>;
}

/// Options passed to the provider when a session is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub timeout: Duration,
}

/// Subtitle search/download backend
pub trait SubtitleProvider: Send + Sync {
    fn open_session(
        &self,
        provider_names: &[String],
        config: &ProviderConfig,
    ) -> Result<Box<dyn ProviderSession>>;
}

/// An authenticated provider session, used from one thread at a time
pub trait ProviderSession: Send {
    fn search(&mut self, work: &WorkDescriptor, language_code: &str) -> Result<Vec<CandidateSubtitle>>;

    fn fetch_content(&mut self, candidate: &CandidateSubtitle) -> Result<Vec<u8>>;

    fn close(&mut self);
}

/// Closes the wrapped session exactly once when the batch scope ends
pub struct ScopedSession {
    inner: Box<dyn ProviderSession>,
}

impl ScopedSession {
    pub fn open(
        provider: &dyn SubtitleProvider,
        provider_names: &[String],
        config: &ProviderConfig,
    ) -> Result<Self> {
        let inner = provider.open_session(provider_names, config)?;
        log::debug!("Opened provider session for {:?}", provider_names);
        Ok(Self { inner })
    }

    pub fn search(&mut self, work: &WorkDescriptor, language_code: &str) -> Result<Vec<CandidateSubtitle>> {
        self.inner.search(work, language_code)
    }

    pub fn fetch_content(&mut self, candidate: &CandidateSubtitle) -> Result<Vec<u8>> {
        self.inner.fetch_content(candidate)
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        self.inner.close();
        log::debug!("Closed provider session");
    }
}
