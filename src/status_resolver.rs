//! Two-phase subtitle status resolution
//!
//! The fast pass looks at part data already in memory and trusts only a
//! positive answer. Everything else goes to the slow pass, which reloads
//! the item from the server on a bounded set of worker threads. Each
//! slow-pass item has its own deadline; an item that misses it is left
//! uncached and the batch moves on.
//!
//! Keys are claimed in `SessionState` before they are checked, so two
//! overlapping batches never reload the same item twice. The second batch
//! waits for the first one's answer instead.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;

use crate::collaborators::ServerHandle;
use crate::config::{PROGRESS_EVENT_INTERVAL, STATUS_CHECK_ITEM_TIMEOUT, STATUS_CHECK_WORKERS};
use crate::data_structures::{EventKind, FailedItem, MediaItem, RatingKey, TaskId};
use crate::error::{Result, SubsetterError};
use crate::library::item_title;
use crate::session_state::SessionState;
use crate::subtitle_utils::SubtitleUtils;
use crate::task_manager::TaskManager;

/// Outcome of inspecting resident part data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPass {
    /// At least one stream is resident
    Positive,
    /// Parts are resident but show no streams
    Inconclusive,
    /// No part data in memory
    NotResident,
}

/// Summary of one batch check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub already_cached: usize,
    pub fast_positive: usize,
    pub slow_checked: usize,
    /// Keys resolved by another batch while this one waited
    pub awaited: usize,
    pub timed_out: Vec<RatingKey>,
    pub failed: Vec<FailedItem>,
    /// Keys another batch held that ended up without a status
    pub unresolved: Vec<RatingKey>,
}

impl BatchReport {
    /// Items that have a cached status at the end of the batch
    pub fn resolved(&self) -> usize {
        self.already_cached + self.fast_positive + self.slow_checked + self.awaited
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    /// Never downgrade a cached `true`
    Merge,
    /// Overwrite whatever is cached
    Replace,
}

struct Progress<'a> {
    events: Option<&'a TaskManager>,
    done: usize,
    total: usize,
}

/// Where and how one batch writes its results
#[derive(Clone, Copy)]
struct Target {
    mode: WriteMode,
    /// Session generation the batch started in
    generation: u64,
}

impl Progress<'_> {
    fn tick(&mut self, title: &str) {
        self.done += 1;
        if let Some(events) = self.events {
            if self.done % PROGRESS_EVENT_INTERVAL == 0 || self.done == self.total {
                events.emit_progress("Checking subtitles", self.done, self.total, Some(title));
            }
        }
    }
}

/// Resolves has-subtitle status for batches of items
#[derive(Debug)]
pub struct SubtitleStatusResolver {
    session: Arc<SessionState>,
    workers: usize,
    item_timeout: Duration,
}

impl SubtitleStatusResolver {
    pub fn new(session: Arc<SessionState>) -> Self {
        Self::with_limits(session, STATUS_CHECK_WORKERS, STATUS_CHECK_ITEM_TIMEOUT)
    }

    pub fn with_limits(session: Arc<SessionState>, workers: usize, item_timeout: Duration) -> Self {
        Self {
            session,
            workers: workers.max(1),
            item_timeout,
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// Inspect resident part data without touching the network
    pub fn fast_check(item: &MediaItem) -> FastPass {
        match &item.media {
            None => FastPass::NotResident,
            Some(_) if SubtitleUtils::has_any_subtitle(item) => FastPass::Positive,
            Some(_) => FastPass::Inconclusive,
        }
    }

    /// Resolve every uncached item, blocking until the batch is done
    ///
    /// Cached items are skipped. Events go to `events` when given.
    pub fn check_batch(
        &self,
        server: &ServerHandle,
        items: &[MediaItem],
        events: Option<&TaskManager>,
    ) -> BatchReport {
        let generation = self.session.generation();
        let items = dedupe(items);
        let mut report = BatchReport {
            total: items.len(),
            ..BatchReport::default()
        };
        let mut progress = Progress {
            events,
            done: 0,
            total: items.len(),
        };
        let mut slow_queue = Vec::new();
        let mut held_elsewhere = Vec::new();

        for item in items {
            let key = item.rating_key;
            if self.session.get_subtitle_status(key).is_some() {
                report.already_cached += 1;
                progress.tick(&item.title);
                continue;
            }
            if !self.session.begin_status_check(key) {
                held_elsewhere.push(item);
                continue;
            }
            // Another batch may have finished this key between the two reads
            if self.session.get_subtitle_status(key).is_some() {
                self.session.finish_status_check(key);
                report.already_cached += 1;
                progress.tick(&item.title);
                continue;
            }
            match Self::fast_check(&item) {
                FastPass::Positive => {
                    let value = self.session.record_subtitle_status_in(generation, key, true);
                    self.session.finish_status_check(key);
                    if let Some(value) = value {
                        announce(events, key, value);
                    }
                    report.fast_positive += 1;
                    progress.tick(&item.title);
                }
                FastPass::Inconclusive | FastPass::NotResident => slow_queue.push(item),
            }
        }

        debug!(
            "Fast pass: {} cached, {} positive, {} queued for reload, {} held by another check",
            report.already_cached,
            report.fast_positive,
            slow_queue.len(),
            held_elsewhere.len()
        );

        let target = Target {
            mode: WriteMode::Merge,
            generation,
        };
        self.slow_pass(server, slow_queue, target, &mut report, &mut progress);

        for item in held_elsewhere {
            match self.session.wait_for_status_check(item.rating_key, self.item_timeout) {
                Some(_) => report.awaited += 1,
                None => {
                    warn!("No status for {} after waiting on another check", item_title(&item));
                    report.unresolved.push(item.rating_key);
                }
            }
            progress.tick(&item.title);
        }

        info!(
            "Subtitle status check complete: {}/{} resolved, {} timed out, {} failed",
            report.resolved(),
            report.total,
            report.timed_out.len(),
            report.failed.len()
        );
        report
    }

    /// Drop cached statuses for `items` and reload every one of them
    ///
    /// Results replace whatever was cached, including a `true`. Used after
    /// subtitles were added or removed.
    pub fn force_refresh(
        &self,
        server: &ServerHandle,
        items: &[MediaItem],
        events: Option<&TaskManager>,
    ) -> BatchReport {
        let generation = self.session.generation();
        let items = dedupe(items);
        let keys: Vec<RatingKey> = items.iter().map(|i| i.rating_key).collect();
        let mut report = BatchReport {
            total: items.len(),
            ..BatchReport::default()
        };
        let mut progress = Progress {
            events,
            done: 0,
            total: items.len(),
        };

        let mut queue = Vec::with_capacity(items.len());
        for item in items {
            let key = item.rating_key;
            // A check started before the mutation may still be running; let
            // it finish so its stale answer cannot land after ours
            let mut claimed = self.session.begin_status_check(key);
            while !claimed {
                self.session.wait_for_status_check(key, self.item_timeout);
                if self.session.is_status_check_in_flight(key) {
                    break;
                }
                claimed = self.session.begin_status_check(key);
            }
            if claimed {
                queue.push(item);
            } else {
                warn!("Another status check is stuck on {}, not refreshing it", item_title(&item));
                report.unresolved.push(key);
                progress.tick(&item.title);
            }
        }
        self.session.clear_subtitle_cache(Some(&keys));

        info!("Force refreshing subtitle status for {} items", queue.len());
        let target = Target {
            mode: WriteMode::Replace,
            generation,
        };
        self.slow_pass(server, queue, target, &mut report, &mut progress);
        report
    }

    /// Run `check_batch` as a background task
    pub fn submit_batch(
        self: &Arc<Self>,
        tasks: &Arc<TaskManager>,
        server: ServerHandle,
        items: Vec<MediaItem>,
    ) -> TaskId {
        let resolver = Arc::clone(self);
        let events = Arc::clone(tasks);
        tasks.submit("subtitle_status", move || -> Result<BatchReport> {
            Ok(resolver.check_batch(&server, &items, Some(&events)))
        })
    }

    fn slow_pass(
        &self,
        server: &ServerHandle,
        queue: Vec<MediaItem>,
        target: Target,
        report: &mut BatchReport,
        progress: &mut Progress<'_>,
    ) {
        if queue.is_empty() {
            return;
        }
        let (tx, rx) = mpsc::channel::<(RatingKey, Result<bool>)>();
        let mut pending: VecDeque<MediaItem> = queue.into();
        // key -> (started, display title)
        let mut running: HashMap<RatingKey, (Instant, String)> = HashMap::new();

        while !pending.is_empty() || !running.is_empty() {
            while running.len() < self.workers {
                let Some(item) = pending.pop_front() else { break };
                let key = item.rating_key;
                let title = item_title(&item);
                let tx = tx.clone();
                let server = Arc::clone(server);
                let spawned = thread::Builder::new()
                    .name(format!("status-check-{key}"))
                    .spawn(move || {
                        let result = server
                            .reload(&item)
                            .map(|fresh| SubtitleUtils::has_any_subtitle(&fresh));
                        // The batch may have given up on us already
                        let _ = tx.send((key, result));
                    });
                match spawned {
                    Ok(_) => {
                        running.insert(key, (Instant::now(), title));
                    }
                    Err(e) => {
                        let error = SubsetterError::Unexpected(format!("failed to spawn status check: {e}"));
                        self.settle(key, &title, Err(error), target, report, progress);
                    }
                }
            }
            if running.is_empty() {
                continue;
            }

            let next_deadline = running
                .values()
                .map(|(started, _)| *started + self.item_timeout)
                .min()
                .unwrap_or_else(Instant::now);
            match rx.recv_timeout(next_deadline.saturating_duration_since(Instant::now())) {
                Ok((key, result)) => {
                    // Late answers for keys that already timed out are dropped
                    if let Some((_, title)) = running.remove(&key) {
                        self.settle(key, &title, result, target, report, progress);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            let overdue: Vec<RatingKey> = running
                .iter()
                .filter(|(_, (started, _))| now.duration_since(*started) >= self.item_timeout)
                .map(|(key, _)| *key)
                .collect();
            for key in overdue {
                if let Some((_, title)) = running.remove(&key) {
                    warn!(
                        "Status check for {title} timed out after {:.1}s, leaving it unchecked",
                        self.item_timeout.as_secs_f64()
                    );
                    self.session.finish_status_check(key);
                    report.timed_out.push(key);
                    progress.tick(&title);
                }
            }
        }
    }

    fn settle(
        &self,
        key: RatingKey,
        title: &str,
        result: Result<bool>,
        target: Target,
        report: &mut BatchReport,
        progress: &mut Progress<'_>,
    ) {
        match result {
            Ok(has_subtitles) => {
                let value = match target.mode {
                    WriteMode::Merge => self.session.record_subtitle_status_in(target.generation, key, has_subtitles),
                    WriteMode::Replace => self
                        .session
                        .cache_subtitle_status_in(target.generation, key, has_subtitles)
                        .then_some(has_subtitles),
                };
                self.session.finish_status_check(key);
                if let Some(value) = value {
                    announce(progress.events, key, value);
                }
                report.slow_checked += 1;
            }
            Err(e) => {
                warn!("Could not check subtitles for {title}: {e}");
                self.session.finish_status_check(key);
                report.failed.push(FailedItem {
                    rating_key: key,
                    title: title.to_string(),
                    error: e.to_string(),
                });
            }
        }
        progress.tick(title);
    }
}

fn announce(events: Option<&TaskManager>, key: RatingKey, has_subtitles: bool) {
    if let Some(events) = events {
        events.emit(
            EventKind::SubtitleStatus,
            json!({ "rating_key": key, "has_subtitles": has_subtitles }),
        );
    }
}

fn dedupe(items: &[MediaItem]) -> Vec<MediaItem> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.rating_key))
        .cloned()
        .collect()
}
