// Tue Jan 13 2026 - Alex

pub mod cancel;
pub mod context;
pub mod core;
pub mod error;
pub mod events;
pub mod metrics;
pub mod result;
pub mod scheduler;
mod store;
pub mod task;
pub mod worker;

pub use self::core::Engine;
pub use cancel::{CancellationToken, Cancelled};
pub use context::{ProgressReporter, TaskContext};
pub use error::{EngineError, EngineResult};
pub use events::{TaskEvent, SUBSCRIBER_BUFFER};
pub use metrics::{EngineMetrics, TaskStatistics};
pub use result::{ProgressInfo, TaskRecord};
pub use scheduler::{Dispatcher, PendingEntry, PendingQueue};
pub use task::{callable_name, TaskId, TaskOptions, TaskOutput, TaskPriority, TaskStatus};
pub use worker::ExecutionPool;
