// Tue Jan 13 2026 - Alex

use crate::config::ConfigError;
use crate::engine::task::TaskId;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Task not found: {0}")]
    NotFound(TaskId),
    #[error("Timed out after {waited:?} waiting for task {id}")]
    Timeout { id: TaskId, waited: Duration },
    #[error("Task {0} was cancelled")]
    Cancelled(TaskId),
    #[error("Task {id} failed: {message}")]
    ExecutionFailure { id: TaskId, message: String },
    #[error("Pending queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },
    #[error("Engine has been shut down")]
    ShutDown,
    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type EngineResult<T> = Result<T, EngineError>;
