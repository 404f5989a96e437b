// Tue Jan 13 2026 - Alex

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    pub active_tasks: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&mut self) {
        self.total_tasks += 1;
    }

    pub fn record_started(&mut self) {
        self.active_tasks += 1;
    }

    pub fn record_completed(&mut self) {
        self.completed_tasks += 1;
        self.active_tasks = self.active_tasks.saturating_sub(1);
    }

    pub fn record_failed(&mut self) {
        self.failed_tasks += 1;
        self.active_tasks = self.active_tasks.saturating_sub(1);
    }

    /// Tasks cancelled before they started were never counted as active.
    pub fn record_cancelled(&mut self, was_running: bool) {
        self.cancelled_tasks += 1;
        if was_running {
            self.active_tasks = self.active_tasks.saturating_sub(1);
        }
    }

    pub fn finished_tasks(&self) -> u64 {
        self.completed_tasks + self.failed_tasks + self.cancelled_tasks
    }

    pub fn success_rate(&self) -> f64 {
        let finished = self.finished_tasks();
        if finished == 0 {
            0.0
        } else {
            self.completed_tasks as f64 / finished as f64
        }
    }
}

/// Per-status breakdown of the records currently held by an engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub queued: usize,
}

impl TaskStatistics {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }

    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}
