// Tue Jan 13 2026 - Alex

use crate::engine::cancel::CancellationToken;
use crate::engine::context::{ProgressReporter, TaskContext};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{EventBus, TaskEvent};
use crate::engine::metrics::{EngineMetrics, TaskStatistics};
use crate::engine::result::{ProgressInfo, TaskRecord};
use crate::engine::task::{Job, TaskId, TaskOutput, TaskStatus};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant, SystemTime};

pub(crate) const CANCELLED_BEFORE_START: &str = "Task was cancelled before it started";
pub(crate) const CANCELLED_WHILE_RUNNING: &str = "Task was cancelled while running";
pub(crate) const CANCELLED_ON_SHUTDOWN: &str = "Task was cancelled by engine shutdown";

pub(crate) enum Outcome {
    Completed(TaskOutput),
    Failed(String),
    Cancelled(String),
}

impl Outcome {
    fn status(&self) -> TaskStatus {
        match self {
            Outcome::Completed(_) => TaskStatus::Completed,
            Outcome::Failed(_) => TaskStatus::Failed,
            Outcome::Cancelled(_) => TaskStatus::Cancelled,
        }
    }
}

pub(crate) enum Dispatch {
    Skip,
    Cancelled,
    Run { job: Job, context: TaskContext },
}

struct TaskEntry {
    record: TaskRecord,
    token: CancellationToken,
    reporter: ProgressReporter,
    job: Option<Job>,
}

struct StoreState {
    entries: HashMap<TaskId, TaskEntry>,
    metrics: Option<EngineMetrics>,
    events: EventBus,
}

/// Every record, token and counter lives behind the one mutex in here. All
/// reads copy out under the lock.
pub(crate) struct StatusStore {
    state: Mutex<StoreState>,
    finished: Condvar,
}

impl StatusStore {
    pub fn new(enable_metrics: bool) -> Self {
        Self {
            state: Mutex::new(StoreState {
                entries: HashMap::new(),
                metrics: enable_metrics.then(EngineMetrics::new),
                events: EventBus::default(),
            }),
            finished: Condvar::new(),
        }
    }

    pub fn insert(&self, record: TaskRecord, token: CancellationToken, reporter: ProgressReporter, job: Job) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(metrics) = state.metrics.as_mut() {
            metrics.record_submitted();
        }
        state
            .events
            .publish(TaskEvent::new(record.id, &record.name, None, TaskStatus::Pending));
        state.entries.insert(
            record.id,
            TaskEntry {
                record,
                token,
                reporter,
                job: Some(job),
            },
        );
    }

    pub fn snapshot(&self, id: TaskId) -> Option<TaskRecord> {
        self.state.lock().entries.get(&id).map(|entry| entry.record.clone())
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.state.lock().entries.contains_key(&id)
    }

    /// Pending tasks are cancelled on the spot; running tasks only get their
    /// token set and finish when the worker observes it.
    pub fn request_cancel(&self, id: TaskId) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let (status, token) = match state.entries.get(&id) {
            Some(entry) => (entry.record.status, entry.token.clone()),
            None => return false,
        };

        match status {
            TaskStatus::Pending => {
                token.cancel();
                move_to(state, id, TaskStatus::Cancelled, |record| {
                    record.error = Some(CANCELLED_BEFORE_START.to_string());
                });
                drop(guard);
                self.finished.notify_all();
                true
            }
            TaskStatus::Running => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn begin(&self, id: TaskId) -> Dispatch {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let entry = match state.entries.get_mut(&id) {
            Some(entry) if entry.record.status == TaskStatus::Pending => entry,
            _ => return Dispatch::Skip,
        };

        if entry.token.is_cancelled() {
            move_to(state, id, TaskStatus::Cancelled, |record| {
                record.error = Some(CANCELLED_BEFORE_START.to_string());
            });
            drop(guard);
            self.finished.notify_all();
            return Dispatch::Cancelled;
        }

        let job = match entry.job.take() {
            Some(job) => job,
            None => return Dispatch::Skip,
        };
        let context = TaskContext::new(
            id,
            entry.record.name.clone(),
            entry.token.clone(),
            entry.reporter.clone(),
        );

        move_to(state, id, TaskStatus::Running, |_| {});
        Dispatch::Run { job, context }
    }

    /// Records the terminal state of a running task. Returns `false` when the
    /// task is unknown or has already finished.
    pub fn finish(&self, id: TaskId, outcome: Outcome) -> bool {
        let to = outcome.status();
        let mut guard = self.state.lock();

        let moved = move_to(&mut guard, id, to, |record| match outcome {
            Outcome::Completed(value) => record.result = Some(value),
            Outcome::Failed(message) | Outcome::Cancelled(message) => record.error = Some(message),
        });

        drop(guard);
        if moved {
            self.finished.notify_all();
        }
        moved
    }

    pub fn update_progress(&self, id: TaskId, progress: ProgressInfo) -> bool {
        let mut guard = self.state.lock();
        match guard.entries.get_mut(&id) {
            Some(entry) if !entry.record.is_terminal() => {
                entry.record.progress = Some(progress);
                true
            }
            _ => false,
        }
    }

    /// Blocks until the task is terminal. The lock is released while
    /// sleeping; each sleep is capped at `poll` so a missed wake-up costs at
    /// most one interval. A timeout too large to represent waits forever.
    pub fn wait_terminal(&self, id: TaskId, timeout: Option<Duration>, poll: Duration) -> EngineResult<TaskRecord> {
        let started = Instant::now();
        let deadline = timeout.and_then(|timeout| started.checked_add(timeout));
        let mut guard = self.state.lock();

        loop {
            match guard.entries.get(&id) {
                None => return Err(EngineError::NotFound(id)),
                Some(entry) if entry.record.is_terminal() => return Ok(entry.record.clone()),
                Some(_) => {}
            }

            let mut nap = poll;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(EngineError::Timeout {
                        id,
                        waited: started.elapsed(),
                    });
                }
                nap = nap.min(deadline - now);
            }

            self.finished.wait_for(&mut guard, nap);
        }
    }

    pub fn records(&self) -> Vec<TaskRecord> {
        let guard = self.state.lock();
        let mut records: Vec<TaskRecord> = guard.entries.values().map(|entry| entry.record.clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    pub fn active_ids(&self) -> Vec<TaskId> {
        let guard = self.state.lock();
        let mut active: Vec<&TaskRecord> = guard
            .entries
            .values()
            .map(|entry| &entry.record)
            .filter(|record| record.status.is_active())
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        active.into_iter().map(|record| record.id).collect()
    }

    pub fn remove(&self, id: TaskId) -> Option<TaskRecord> {
        let mut guard = self.state.lock();
        let terminal = guard
            .entries
            .get(&id)
            .map(|entry| entry.record.is_terminal())
            .unwrap_or(false);
        if !terminal {
            return None;
        }
        guard.entries.remove(&id).map(|entry| entry.record)
    }

    pub fn cleanup_finished(&self, older_than: Duration) -> usize {
        let now = SystemTime::now();
        let mut guard = self.state.lock();
        let before = guard.entries.len();

        guard.entries.retain(|_, entry| {
            let expired = entry
                .record
                .completed_at
                .and_then(|completed| now.duration_since(completed).ok())
                .map(|age| age >= older_than)
                .unwrap_or(false);
            !(entry.record.is_terminal() && expired)
        });

        before - guard.entries.len()
    }

    pub fn statistics(&self) -> TaskStatistics {
        let guard = self.state.lock();
        let mut stats = TaskStatistics::default();

        for entry in guard.entries.values() {
            match entry.record.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }

        stats
    }

    pub fn metrics(&self) -> Option<EngineMetrics> {
        self.state.lock().metrics
    }

    pub fn subscribe(&self) -> Receiver<TaskEvent> {
        self.state.lock().events.subscribe()
    }

    pub fn cancel_all_pending(&self, reason: &str) -> usize {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let pending: Vec<TaskId> = state
            .entries
            .values()
            .filter(|entry| entry.record.status == TaskStatus::Pending)
            .map(|entry| entry.record.id)
            .collect();

        for id in &pending {
            if let Some(entry) = state.entries.get(id) {
                entry.token.cancel();
            }
            move_to(state, *id, TaskStatus::Cancelled, |record| {
                record.error = Some(reason.to_string());
            });
        }

        drop(guard);
        if !pending.is_empty() {
            self.finished.notify_all();
        }
        pending.len()
    }

    pub fn cancel_running(&self) -> usize {
        let guard = self.state.lock();
        guard
            .entries
            .values()
            .filter(|entry| entry.record.status == TaskStatus::Running)
            .filter(|entry| entry.token.cancel())
            .count()
    }
}

/// Applies one validated transition, stamping timestamps, counting it in the
/// metrics and announcing it to subscribers.
fn move_to<F>(state: &mut StoreState, id: TaskId, to: TaskStatus, update: F) -> bool
where
    F: FnOnce(&mut TaskRecord),
{
    let entry = match state.entries.get_mut(&id) {
        Some(entry) => entry,
        None => return false,
    };

    let from = entry.record.status;
    if !from.can_transition_to(to) {
        log::debug!("Ignoring transition {} -> {} for task {}", from, to, id);
        return false;
    }

    let now = SystemTime::now();
    entry.record.status = to;
    match to {
        TaskStatus::Running => entry.record.started_at = Some(now),
        status if status.is_terminal() => {
            entry.record.completed_at = Some(now);
            entry.job = None;
        }
        _ => {}
    }
    update(&mut entry.record);

    let event = TaskEvent::new(id, &entry.record.name, Some(from), to);

    if let Some(metrics) = state.metrics.as_mut() {
        match to {
            TaskStatus::Running => metrics.record_started(),
            TaskStatus::Completed => metrics.record_completed(),
            TaskStatus::Failed => metrics.record_failed(),
            TaskStatus::Cancelled => metrics.record_cancelled(from == TaskStatus::Running),
            TaskStatus::Pending => {}
        }
    }

    state.events.publish(event);
    true
}
