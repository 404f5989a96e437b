// Tue Jan 15 2026 - Alex

pub mod config;
pub mod engine;
pub mod utils;

pub use config::{ConfigError, EngineConfig};
pub use engine::core::Engine;
pub use engine::{
    CancellationToken, Cancelled, EngineError, EngineMetrics, EngineResult, ProgressInfo, TaskContext, TaskEvent,
    TaskId, TaskOptions, TaskOutput, TaskPriority, TaskRecord, TaskStatistics, TaskStatus,
};
