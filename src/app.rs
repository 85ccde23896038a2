//! Application facade for the PlexSubSetter core
//!
//! `App` wires the session state, the task manager and the status resolver
//! to the server connector and subtitle provider it is given. A UI layer
//! calls the `start_*` methods, keeps the returned task id, and follows the
//! event stream for progress.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::collaborators::{ServerConnector, ServerHandle, SubtitleProvider};
use crate::config::ITEMS_PER_PAGE;
use crate::crash_report::CrashReporter;
use crate::data_structures::{
    ItemStreams, LibraryInfo, MediaItem, RatingKey, SeasonInfo, ShowInfo, TaskId, TaskSnapshot,
};
use crate::error::{Result, SubsetterError};
use crate::library::{self, ItemsPage, StatusFilter};
use crate::session_state::SessionState;
use crate::settings::Settings;
use crate::status_resolver::{BatchReport, SubtitleStatusResolver};
use crate::subtitle_service::{self, SearchOptions};
use crate::task_manager::{EventStream, TaskManager};

/// Episodes of one season with their freshly checked status
#[derive(Debug, Clone, Serialize)]
pub struct SeasonCheck {
    pub episodes: Vec<MediaItem>,
    pub report: BatchReport,
}

/// Text stored on a failed task: message, suggestion and raw error, plus
/// the crash report path for failures with no known cause
fn failure_message(error: SubsetterError, operation: &str, reporter: Option<&CrashReporter>) -> String {
    let error = error.refined(operation);
    let mut message = error.user_message();
    if error.is_unexpected() {
        let context = BTreeMap::from([("operation".to_string(), operation.to_string())]);
        if let Some(path) = reporter.and_then(|reporter| reporter.report_error(&error, context)) {
            message.push_str(&format!("\n\nCrash report: {}", path.display()));
        }
    }
    message
}

pub struct App {
    session: Arc<SessionState>,
    tasks: Arc<TaskManager>,
    resolver: Arc<SubtitleStatusResolver>,
    settings: Settings,
    connector: Arc<dyn ServerConnector>,
    provider: Arc<dyn SubtitleProvider>,
    reporter: Option<CrashReporter>,
}

impl App {
    pub fn new(settings: Settings, connector: Arc<dyn ServerConnector>, provider: Arc<dyn SubtitleProvider>) -> Self {
        let settings = settings.validated();
        let reporter = match &settings.crash_report_dir {
            Some(dir) => CrashReporter::new(dir),
            None => CrashReporter::default_location(),
        };
        let reporter = match reporter {
            Ok(reporter) => Some(reporter),
            Err(e) => {
                log::warn!("Crash reports disabled: {e}");
                None
            }
        };

        let session = Arc::new(SessionState::new());
        let resolver = Arc::new(SubtitleStatusResolver::with_limits(
            Arc::clone(&session),
            settings.status_check_workers,
            settings.status_check_timeout(),
        ));
        log::info!(
            "Core initialised: language={}, providers={}, status workers={}",
            settings.default_language,
            settings.default_providers,
            settings.status_check_workers
        );

        Self {
            session,
            tasks: Arc::new(TaskManager::new()),
            resolver,
            settings,
            connector,
            provider,
            reporter,
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn crash_reporter(&self) -> Option<&CrashReporter> {
        self.reporter.as_ref()
    }

    fn server(&self) -> Result<ServerHandle> {
        self.session
            .connection()
            .ok_or_else(|| SubsetterError::Authentication("not connected to a server".into()))
    }

    fn options(&self, options: Option<SearchOptions>) -> SearchOptions {
        options.unwrap_or_else(|| self.settings.search_options())
    }

    /// Submit `work`, turning its error into a user-facing message
    fn submit<F, T>(&self, task_type: &str, work: F) -> TaskId
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Serialize + 'static,
    {
        let reporter = self.reporter.clone();
        let operation = task_type.to_string();
        self.tasks.submit(task_type, move || {
            work().map_err(|e| failure_message(e, &operation, reporter.as_ref()))
        })
    }

    // ----- connection -----

    /// Connect and make the server active; blocks through retries
    pub fn login(&self, server_name: &str, uri: &str) -> Result<ServerHandle> {
        library::connect(self.connector.as_ref(), &self.session, server_name, uri, self.reporter.as_ref())
    }

    /// `login` on a worker thread
    pub fn start_login(&self, server_name: &str, uri: &str) -> TaskId {
        let connector = Arc::clone(&self.connector);
        let session = Arc::clone(&self.session);
        let reporter = self.reporter.clone();
        let (server_name, uri) = (server_name.to_string(), uri.to_string());
        self.tasks.submit("login", move || {
            // connect reports its own failures
            library::connect(connector.as_ref(), &session, &server_name, &uri, reporter.as_ref())
                .map(|server| server.name())
                .map_err(|e| failure_message(e, "login", None))
        })
    }

    pub fn logout(&self) {
        self.session.clear_auth();
        log::info!("Logged out, session state cleared");
    }

    // ----- browsing -----

    pub fn libraries(&self) -> Result<Vec<LibraryInfo>> {
        library::get_libraries(&self.server()?)
    }

    pub fn library_items(&self, library_name: &str, reload: bool) -> Result<Vec<MediaItem>> {
        library::get_library_items(&self.session, &self.server()?, library_name, reload)
    }

    pub fn items_page(&self, items: &[MediaItem], page: usize, search: &str, filter: StatusFilter) -> ItemsPage {
        library::items_page(items, page, ITEMS_PER_PAGE, search, filter, &self.session)
    }

    pub fn shows(&self, library_name: &str) -> Result<Vec<ShowInfo>> {
        library::get_shows(&self.server()?, library_name)
    }

    pub fn seasons(&self, show: &ShowInfo) -> Result<Vec<SeasonInfo>> {
        library::get_seasons(&self.server()?, show)
    }

    pub fn season_episodes(&self, season: &SeasonInfo) -> Result<Vec<MediaItem>> {
        library::season_episodes(&self.server()?, season)
    }

    /// Load a season's episodes and resolve their status on this thread
    pub fn check_season_now(&self, season: &SeasonInfo) -> Result<SeasonCheck> {
        let server = self.server()?;
        let episodes = library::season_episodes(&server, season)?;
        let report = self.resolver.check_batch(&server, &episodes, Some(&self.tasks));
        Ok(SeasonCheck { episodes, report })
    }

    /// Load a library (from cache when possible) and select all of it
    pub fn start_select_all(&self, library_name: &str) -> Result<TaskId> {
        let server = self.server()?;
        let session = Arc::clone(&self.session);
        let library_name = library_name.to_string();
        Ok(self.submit("select_all", move || {
            let items = library::get_library_items(&session, &server, &library_name, false)?;
            Ok(library::select_all(&session, &items))
        }))
    }

    /// Select the given keys among every loaded library's items
    ///
    /// Keys of items not loaded yet are ignored. Returns the selection size.
    pub fn select_keys(&self, keys: &[RatingKey]) -> usize {
        let known: Vec<MediaItem> = self.session.items_map().into_values().collect();
        self.session.set_selection_by_keys(keys, &known);
        self.session.selection_len()
    }

    // ----- subtitle status -----

    pub fn start_status_check(&self, items: Vec<MediaItem>) -> Result<TaskId> {
        Ok(self.resolver.submit_batch(&self.tasks, self.server()?, items))
    }

    /// Resolve `items` on the calling thread, e.g. before filtering a page
    pub fn check_status_now(&self, items: &[MediaItem]) -> Result<BatchReport> {
        Ok(self.resolver.check_batch(&self.server()?, items, Some(&self.tasks)))
    }

    // ----- subtitle operations on the selection -----

    pub fn start_search(&self, options: Option<SearchOptions>) -> TaskId {
        let items = self.session.selected_items();
        let options = self.options(options);
        let provider = Arc::clone(&self.provider);
        let session = Arc::clone(&self.session);
        let tasks = Arc::clone(&self.tasks);
        self.submit("search", move || {
            subtitle_service::search(&items, &options, provider.as_ref(), &session, Some(&tasks))
        })
    }

    pub fn start_download(
        &self,
        selections: BTreeMap<RatingKey, i64>,
        options: Option<SearchOptions>,
    ) -> Result<TaskId> {
        let server = self.server()?;
        let options = self.options(options);
        let provider = Arc::clone(&self.provider);
        let session = Arc::clone(&self.session);
        let tasks = Arc::clone(&self.tasks);
        Ok(self.submit("download", move || {
            subtitle_service::download(&selections, &options, provider.as_ref(), &server, &session, Some(&tasks))
        }))
    }

    pub fn start_dry_run(&self, options: Option<SearchOptions>) -> TaskId {
        let items = self.session.selected_items();
        let options = self.options(options);
        let provider = Arc::clone(&self.provider);
        let tasks = Arc::clone(&self.tasks);
        self.submit("dry_run", move || {
            subtitle_service::dry_run(&items, &options, provider.as_ref(), Some(&tasks))
        })
    }

    pub fn start_delete(&self) -> Result<TaskId> {
        let server = self.server()?;
        let items = self.session.selected_items();
        let session = Arc::clone(&self.session);
        let tasks = Arc::clone(&self.tasks);
        Ok(self.submit("delete", move || {
            Ok(subtitle_service::delete(&server, &items, &session, Some(&tasks)))
        }))
    }

    /// Subtitle streams on the selected items
    pub fn list_current(&self) -> Result<Vec<ItemStreams>> {
        Ok(subtitle_service::list_current(&self.server()?, &self.session.selected_items()))
    }

    // ----- observation -----

    pub fn task(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.tasks.get_task(task_id)
    }

    /// Result of the most recent successful dry run
    pub fn last_dry_run(&self) -> Option<serde_json::Value> {
        self.tasks.latest_result("dry_run")
    }

    pub fn events(&self) -> EventStream<'_> {
        self.tasks.events()
    }
}
