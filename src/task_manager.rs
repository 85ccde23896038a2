//! Background task manager and event bus
//!
//! Long operations are handed to `TaskManager::submit`, which runs them on
//! their own worker thread and tracks their status. Progress, log and
//! completion notifications go into a bounded FIFO queue that a single
//! long-lived reader drains through `TaskManager::events`, formatted as
//! server-sent-event frames.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::config::{EVENT_KEEPALIVE, EVENT_QUEUE_CAPACITY, MAX_RETAINED_TASKS};
use crate::data_structures::{Event, EventKind, TaskId, TaskSnapshot, TaskStatus};

/// Frame sent when no event arrived within the keepalive window
pub const KEEPALIVE_FRAME: &str = ": keepalive\n\n";

struct TaskRecord {
    task_type: String,
    status: TaskStatus,
    result: Option<serde_json::Value>,
    error: Option<String>,
}

#[derive(Default)]
struct TaskTable {
    records: HashMap<TaskId, TaskRecord>,
    // Finished task ids, oldest first
    finished: VecDeque<TaskId>,
}

/// Fixed-capacity FIFO that evicts the oldest event when full
struct EventQueue {
    queue: Mutex<VecDeque<Event>>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl EventQueue {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, event: Event) {
        let mut queue = self.lock();
        while queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
        drop(queue);
        self.available.notify_one();
    }

    fn pop(&self, timeout: Duration) -> Option<Event> {
        let queue = self.lock();
        let (mut queue, _) = match self
            .available
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
        {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.pop_front()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Runs submitted work off the interactive thread and reports on it
pub struct TaskManager {
    tasks: Mutex<TaskTable>,
    events: EventQueue,
    keepalive: Duration,
    max_retained: usize,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("tasks", &self.lock_tasks().records.len())
            .field("queued_events", &self.events.len())
            .finish()
    }
}

fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Format one event as a server-sent-event frame
pub fn format_frame(event: &Event) -> String {
    format!(
        "event: {}\ndata: {}\nid: {}\n\n",
        event.kind.as_str(),
        event.data,
        event.id
    )
}

impl TaskManager {
    pub fn new() -> Self {
        Self::with_limits(EVENT_QUEUE_CAPACITY, EVENT_KEEPALIVE, MAX_RETAINED_TASKS)
    }

    pub fn with_limits(event_capacity: usize, keepalive: Duration, max_retained: usize) -> Self {
        Self {
            tasks: Mutex::new(TaskTable::default()),
            events: EventQueue::new(event_capacity),
            keepalive,
            max_retained,
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, TaskTable> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `work` on a new worker thread and return its task id
    ///
    /// The task is visible to `get_task` before this returns. Errors and
    /// panics escaping `work` are captured into the task record and a
    /// `task_complete` event; they never reach the caller.
    pub fn submit<F, T, E>(self: &Arc<Self>, task_type: &str, work: F) -> TaskId
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Serialize + 'static,
        E: Display + 'static,
    {
        let task_id = short_id();
        self.lock_tasks().records.insert(
            task_id.clone(),
            TaskRecord {
                task_type: task_type.to_string(),
                status: TaskStatus::Pending,
                result: None,
                error: None,
            },
        );

        let manager = Arc::clone(self);
        let id = task_id.clone();
        let kind = task_type.to_string();
        let spawned = thread::Builder::new()
            .name(format!("task-{task_type}"))
            .spawn(move || {
                manager.mark_running(&id);
                let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
                    Ok(Ok(value)) => serde_json::to_value(value)
                        .map_err(|e| format!("failed to serialize task result: {e}")),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(payload) => Err(format!("task panicked: {}", panic_message(payload.as_ref()))),
                };
                manager.finish(&id, &kind, outcome);
            });

        match spawned {
            Ok(_) => self.mark_running(&task_id),
            Err(e) => {
                log::error!("Failed to spawn worker for task {task_id} ({task_type}): {e}");
                self.finish(&task_id, task_type, Err(format!("failed to start task: {e}")));
            }
        }
        log::debug!("Submitted task {task_id} ({task_type})");
        task_id
    }

    fn mark_running(&self, task_id: &str) {
        if let Some(record) = self.lock_tasks().records.get_mut(task_id) {
            if record.status == TaskStatus::Pending {
                record.status = TaskStatus::Running;
            }
        }
    }

    fn finish(&self, task_id: &str, task_type: &str, outcome: Result<serde_json::Value, String>) {
        let outcome = outcome.map_err(|message| {
            if message.trim().is_empty() {
                format!("task {task_type} failed")
            } else {
                message
            }
        });
        {
            let mut table = self.lock_tasks();
            let Some(record) = table.records.get_mut(task_id) else {
                return;
            };
            if record.status.is_finished() {
                return;
            }
            match &outcome {
                Ok(value) => {
                    record.status = TaskStatus::Complete;
                    record.result = Some(value.clone());
                }
                Err(message) => {
                    record.status = TaskStatus::Error;
                    record.error = Some(message.clone());
                }
            }
            table.finished.push_back(task_id.to_string());
            while table.finished.len() > self.max_retained {
                if let Some(old) = table.finished.pop_front() {
                    table.records.remove(&old);
                }
            }
        }

        match outcome {
            Ok(_) => {
                log::info!("Task {task_id} ({task_type}) complete");
                self.emit(
                    EventKind::TaskComplete,
                    json!({ "task_id": task_id, "task_type": task_type, "success": true }),
                );
            }
            Err(message) => {
                log::error!("Task {task_id} ({task_type}) failed: {message}");
                self.emit(
                    EventKind::TaskComplete,
                    json!({
                        "task_id": task_id,
                        "task_type": task_type,
                        "success": false,
                        "error": message,
                    }),
                );
            }
        }
    }

    /// Point-in-time copy of a task, `None` for unknown ids
    pub fn get_task(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.lock_tasks().records.get(task_id).map(|record| TaskSnapshot {
            id: task_id.to_string(),
            task_type: record.task_type.clone(),
            status: record.status,
            result: record.result.clone(),
            error: record.error.clone(),
        })
    }

    /// Result of the newest successfully completed task of a type
    pub fn latest_result(&self, task_type: &str) -> Option<serde_json::Value> {
        let table = self.lock_tasks();
        table
            .finished
            .iter()
            .rev()
            .filter_map(|id| table.records.get(id))
            .find(|r| r.task_type == task_type && r.status == TaskStatus::Complete)
            .and_then(|r| r.result.clone())
    }

    pub fn task_count(&self) -> usize {
        self.lock_tasks().records.len()
    }

    /// Queue an event, evicting the oldest one when the queue is full
    pub fn emit(&self, kind: EventKind, data: serde_json::Value) {
        self.events.push(Event {
            kind,
            data,
            id: short_id(),
            timestamp: Utc::now(),
        });
    }

    /// Log a message and mirror it to observers as a `log` event
    pub fn emit_log(&self, level: log::Level, message: &str) {
        log::log!(level, "{message}");
        let level_name = match level {
            log::Level::Error => "error",
            log::Level::Warn => "warning",
            _ => "info",
        };
        self.emit(EventKind::Log, json!({ "message": message, "level": level_name }));
    }

    pub fn emit_progress(&self, operation: &str, current: usize, total: usize, item: Option<&str>) {
        let mut data = json!({
            "type": operation,
            "current": current,
            "total": total,
            "percent": crate::helper_functions::Utils::percent(current, total),
        });
        if let Some(item) = item {
            data["item"] = json!(item);
        }
        self.emit(EventKind::Progress, data);
    }

    /// Wait up to `timeout` for the next queued event
    pub fn next_event(&self, timeout: Duration) -> Option<Event> {
        self.events.pop(timeout)
    }

    /// Number of events evicted because the queue was full
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped.load(Ordering::Relaxed)
    }

    pub fn queued_events(&self) -> usize {
        self.events.len()
    }

    /// Endless stream of event frames, with keepalives while idle
    pub fn events(&self) -> EventStream<'_> {
        EventStream { manager: self }
    }
}

/// Iterator over formatted event frames; never returns `None`
pub struct EventStream<'a> {
    manager: &'a TaskManager,
}

impl Iterator for EventStream<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        Some(match self.manager.next_event(self.manager.keepalive) {
            Some(event) => format_frame(&event),
            None => KEEPALIVE_FRAME.to_string(),
        })
    }
}
