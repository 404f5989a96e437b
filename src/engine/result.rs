// Tue Jan 13 2026 - Alex

use crate::engine::error::EngineError;
use crate::engine::task::{TaskId, TaskOutput, TaskPriority, TaskStatus};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    pub current: i64,
    pub total: i64,
    pub message: String,
    pub percentage: f64,
    pub eta_seconds: Option<f64>,
}

impl ProgressInfo {
    pub fn new(current: i64, total: i64, message: impl Into<String>, eta_seconds: Option<f64>) -> Self {
        let percentage = if total > 0 {
            current as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Self {
            current,
            total,
            message: message.into(),
            percentage,
            eta_seconds,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }
}

/// Snapshot of one submission. The engine hands out clones; mutating a
/// snapshot has no effect on the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub result: Option<TaskOutput>,
    pub error: Option<String>,
    pub progress: Option<ProgressInfo>,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
}

impl TaskRecord {
    pub fn new(id: TaskId, name: String, priority: TaskPriority) -> Self {
        Self {
            id,
            name,
            priority,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            progress: None,
            created_at: SystemTime::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => completed.duration_since(started).ok(),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Converts a terminal record into the task's output, or the error that
    /// ended it.
    pub fn into_result(self) -> Result<TaskOutput, EngineError> {
        match self.status {
            TaskStatus::Completed => Ok(self.result.unwrap_or(TaskOutput::Null)),
            TaskStatus::Failed => Err(EngineError::ExecutionFailure {
                id: self.id,
                message: self.error.unwrap_or_default(),
            }),
            TaskStatus::Cancelled => Err(EngineError::Cancelled(self.id)),
            TaskStatus::Pending | TaskStatus::Running => Err(EngineError::InvalidArgument(
                format!("Task {} has not finished (status: {})", self.id, self.status),
            )),
        }
    }
}
