//! Data structures shared across the PlexSubSetter core
//!
//! This module contains the media item model as seen by the core, task
//! and event records, and the report types returned by subtitle operations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a media item on the Plex server
pub type RatingKey = u64;

/// Opaque token identifying a submitted task
pub type TaskId = String;

/// Kind of playable media item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    Episode,
}

/// A single subtitle stream attached to a media part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub id: u64,
    pub language: Option<String>,
    pub language_code: Option<String>,
    pub codec: Option<String>,
    pub forced: bool,
    pub hearing_impaired: bool,
    pub selected: bool,
}

/// One file backing a media item, with whatever stream data is loaded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPart {
    pub file: Option<String>,
    pub subtitle_streams: Vec<StreamInfo>,
}

/// A movie or episode as handed to the core by the media server
///
/// `media` is `None` when the part data has not been loaded yet; only a
/// reload through the server can populate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub rating_key: RatingKey,
    pub title: String,
    pub kind: MediaKind,
    pub year: Option<u32>,
    pub show_title: Option<String>,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    pub media: Option<Vec<MediaPart>>,
}

impl MediaItem {
    pub fn movie(rating_key: RatingKey, title: impl Into<String>, year: Option<u32>) -> Self {
        Self {
            rating_key,
            title: title.into(),
            kind: MediaKind::Movie,
            year,
            show_title: None,
            season_number: None,
            episode_number: None,
            media: None,
        }
    }

    pub fn episode(
        rating_key: RatingKey,
        show_title: impl Into<String>,
        season: u32,
        episode: u32,
        title: impl Into<String>,
    ) -> Self {
        Self {
            rating_key,
            title: title.into(),
            kind: MediaKind::Episode,
            year: None,
            show_title: Some(show_title.into()),
            season_number: Some(season),
            episode_number: Some(episode),
            media: None,
        }
    }

    pub fn with_media(mut self, parts: Vec<MediaPart>) -> Self {
        self.media = Some(parts);
        self
    }

    /// All subtitle streams in the resident part data
    pub fn resident_streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.media
            .iter()
            .flatten()
            .flat_map(|part| part.subtitle_streams.iter())
    }
}

/// Library section kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryKind {
    Movie,
    Show,
    Other,
}

/// A library section on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryInfo {
    pub name: String,
    pub kind: LibraryKind,
}

/// A TV show in a show library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowInfo {
    pub rating_key: RatingKey,
    pub title: String,
    pub year: Option<u32>,
}

/// One season of a show
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonInfo {
    pub rating_key: RatingKey,
    pub show_title: String,
    /// Season number, 0 for specials
    pub index: u32,
    pub title: String,
}

/// Where a downloaded subtitle ends up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMethod {
    /// Uploaded to the Plex server
    #[default]
    Plex,
    /// Written next to the video file, with upload as the fallback
    File,
}

/// What a subtitle provider is asked to find subtitles for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkDescriptor {
    Movie {
        title: String,
        year: Option<u32>,
    },
    Episode {
        series: String,
        season: u32,
        episode: u32,
        title: String,
        year: Option<u32>,
    },
}

impl WorkDescriptor {
    pub fn from_item(item: &MediaItem) -> Self {
        match item.kind {
            MediaKind::Movie => WorkDescriptor::Movie {
                title: item.title.clone(),
                year: item.year,
            },
            MediaKind::Episode => WorkDescriptor::Episode {
                series: item.show_title.clone().unwrap_or_default(),
                season: item.season_number.unwrap_or(0),
                episode: item.episode_number.unwrap_or(0),
                title: item.title.clone(),
                year: item.year,
            },
        }
    }
}

/// A subtitle found by a provider search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSubtitle {
    pub id: String,
    pub provider: String,
    pub release_info: String,
    pub language_code: String,
    pub hearing_impaired: bool,
    pub forced: bool,
    /// Provider match score, higher is better
    pub score: u32,
}

/// Status of a background task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl TaskStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Error)
    }
}

/// Point-in-time copy of a task record
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub task_type: String,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Kind tag of an event pushed to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Progress,
    Status,
    Log,
    TaskComplete,
    SubtitleStatus,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Progress => "progress",
            EventKind::Status => "status",
            EventKind::Log => "log",
            EventKind::TaskComplete => "task_complete",
            EventKind::SubtitleStatus => "subtitle_status",
        }
    }
}

/// A timestamped notification produced by an in-flight task
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub data: serde_json::Value,
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-item results of a subtitle search
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub item: MediaItem,
    pub subtitles: Vec<CandidateSubtitle>,
    /// Number of candidates before capping
    pub total_found: usize,
}

/// Search results keyed by rating key
pub type SearchResults = HashMap<RatingKey, SearchResult>;

/// An item that failed inside a batch operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub rating_key: RatingKey,
    pub title: String,
    pub error: String,
}

/// Outcome of a download or delete batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct MutationReport {
    pub success_count: usize,
    pub total_count: usize,
    pub successful_keys: Vec<RatingKey>,
    pub failed: Vec<FailedItem>,
    pub skipped: Vec<RatingKey>,
}

/// One line of a dry-run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DryRunEntry {
    pub rating_key: RatingKey,
    pub title: String,
    pub count: usize,
}

/// Categorised availability preview
#[derive(Debug, Clone, Default, Serialize)]
pub struct DryRunReport {
    pub already_have: Vec<DryRunEntry>,
    pub available: Vec<DryRunEntry>,
    pub not_available: Vec<DryRunEntry>,
    pub errors: Vec<FailedItem>,
}

impl DryRunReport {
    pub fn total(&self) -> usize {
        self.already_have.len() + self.available.len() + self.not_available.len() + self.errors.len()
    }
}

/// Subtitle streams currently on one item
#[derive(Debug, Clone, Serialize)]
pub struct ItemStreams {
    pub rating_key: RatingKey,
    pub title: String,
    pub streams: Vec<StreamInfo>,
}
