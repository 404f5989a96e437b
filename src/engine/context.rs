// Tue Jan 13 2026 - Alex

use crate::engine::cancel::{Cancelled, CancellationToken};
use crate::engine::result::ProgressInfo;
use crate::engine::store::StatusStore;
use crate::engine::task::TaskId;
use std::sync::Weak;
use std::thread;
use std::time::{Duration, Instant};

const SLEEP_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Publishes progress for one task. Holds a weak handle so an outstanding
/// reporter never keeps a dropped engine alive; updates after that are lost.
#[derive(Clone)]
pub struct ProgressReporter {
    id: TaskId,
    store: Weak<StatusStore>,
}

impl ProgressReporter {
    pub(crate) fn new(id: TaskId, store: Weak<StatusStore>) -> Self {
        Self { id, store }
    }

    pub fn update(&self, current: i64, total: i64, message: impl Into<String>, eta_seconds: Option<f64>) -> bool {
        let progress = ProgressInfo::new(current, total, message, eta_seconds);
        log::trace!(
            "Task {} progress: {:.1}% ({}/{}) {}",
            self.id,
            progress.percentage,
            progress.current,
            progress.total,
            progress.message
        );

        match self.store.upgrade() {
            Some(store) => store.update_progress(self.id, progress),
            None => false,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.id
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter").field("id", &self.id).finish()
    }
}

/// Handed to every task body. Cancellation is cooperative: a body that never
/// checks the token runs to completion.
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: TaskId,
    name: String,
    token: CancellationToken,
    progress: ProgressReporter,
    started: Instant,
}

impl TaskContext {
    pub(crate) fn new(id: TaskId, name: String, token: CancellationToken, progress: ProgressReporter) -> Self {
        Self {
            id,
            name,
            token,
            progress,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<(), Cancelled> {
        self.token.check_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    pub fn report_progress(&self, current: i64, total: i64, message: impl Into<String>) -> bool {
        self.progress.update(current, total, message, None)
    }

    /// Like [`report_progress`](Self::report_progress), with an ETA
    /// extrapolated from the time spent so far.
    pub fn report_progress_with_eta(&self, current: i64, total: i64, message: impl Into<String>) -> bool {
        let eta = if current > 0 && total > current {
            let elapsed = self.started.elapsed().as_secs_f64();
            Some(elapsed / current as f64 * (total - current) as f64)
        } else {
            None
        };
        self.progress.update(current, total, message, eta)
    }

    /// Sleeps for `duration`, waking early with `Cancelled` once the token is
    /// set. A duration past the clock's range sleeps until cancelled.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let deadline = Instant::now().checked_add(duration);
        loop {
            self.check_cancelled()?;
            let nap = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(());
                    }
                    SLEEP_CHECK_INTERVAL.min(deadline - now)
                }
                None => SLEEP_CHECK_INTERVAL,
            };
            thread::sleep(nap);
        }
    }
}
