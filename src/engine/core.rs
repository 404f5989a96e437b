// Tue Jan 13 2026 - Alex

use crate::config::EngineConfig;
use crate::engine::cancel::CancellationToken;
use crate::engine::context::{ProgressReporter, TaskContext};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::TaskEvent;
use crate::engine::metrics::{EngineMetrics, TaskStatistics};
use crate::engine::result::TaskRecord;
use crate::engine::scheduler::{Dispatcher, PendingQueue};
use crate::engine::store::{StatusStore, CANCELLED_ON_SHUTDOWN};
use crate::engine::task::{callable_name, Job, TaskId, TaskOptions};
use crate::engine::worker::ExecutionPool;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

struct Runtime {
    dispatcher: Dispatcher,
    pool: ExecutionPool,
}

/// Priority-scheduled task engine. Submissions return immediately; a single
/// dispatcher thread hands queued tasks to a fixed pool of workers, and the
/// status of every task can be read or awaited from any thread.
pub struct Engine {
    config: EngineConfig,
    store: Arc<StatusStore>,
    queue: Arc<PendingQueue>,
    runtime: Mutex<Option<Runtime>>,
    shut_down: AtomicBool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        let store = Arc::new(StatusStore::new(config.enable_metrics));
        let queue = Arc::new(PendingQueue::new(config.queue_capacity));
        let pool = ExecutionPool::new(config.worker_count, &config.thread_name_prefix, store.clone())?;
        let handle = pool.handle().ok_or(EngineError::ShutDown)?;
        let dispatcher = Dispatcher::spawn(
            format!("{}-dispatcher", config.thread_name_prefix),
            queue.clone(),
            store.clone(),
            handle,
            config.dispatch_wait(),
        )?;

        log::info!(
            "Task engine started with {} worker(s), queue capacity {}",
            config.worker_count,
            config.queue_capacity
        );

        Ok(Self {
            config,
            store,
            queue,
            runtime: Mutex::new(Some(Runtime { dispatcher, pool })),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn with_defaults() -> EngineResult<Self> {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Queues `task` at normal priority, named after the function that
    /// defines it.
    pub fn submit<F, R>(&self, task: F) -> EngineResult<TaskId>
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<R> + Send + 'static,
        R: Serialize,
    {
        self.submit_with(TaskOptions::default(), task)
    }

    pub fn submit_with<F, R>(&self, options: TaskOptions, task: F) -> EngineResult<TaskId>
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<R> + Send + 'static,
        R: Serialize,
    {
        let name = match options.name {
            Some(name) if name.trim().is_empty() => {
                return Err(EngineError::InvalidArgument("task name must not be empty".to_string()));
            }
            Some(name) => name,
            None => callable_name::<F>(),
        };

        if self.is_shut_down() {
            return Err(EngineError::ShutDown);
        }

        let id = TaskId::new();
        let priority = options.priority;
        let token = CancellationToken::new();
        let reporter = ProgressReporter::new(id, Arc::downgrade(&self.store));
        let job: Job = Box::new(move |ctx: &TaskContext| -> anyhow::Result<serde_json::Value> {
            let value = task(ctx)?;
            Ok(serde_json::to_value(value)?)
        });

        log::debug!("Submitting task {} ({}) at priority {}", id, name, priority);
        let record = TaskRecord::new(id, name, priority);
        let store = &self.store;
        self.queue
            .push_with(priority, id, move || store.insert(record, token, reporter, job))?;

        Ok(id)
    }

    /// Requests cancellation. A pending task is cancelled immediately; a
    /// running task only observes its token, so the body decides when to
    /// stop. Returns `false` for unknown or finished tasks.
    pub fn cancel(&self, id: TaskId) -> bool {
        let accepted = self.store.request_cancel(id);
        if accepted {
            if self.queue.remove(id) {
                log::debug!("Dropped queue entry for cancelled task {}", id);
            }
            log::info!("Cancellation requested for task {}", id);
        }
        accepted
    }

    pub fn get_status(&self, id: TaskId) -> Option<TaskRecord> {
        self.store.snapshot(id)
    }

    /// Blocks until the task reaches a terminal state. `None` waits forever.
    pub fn wait(&self, id: TaskId, timeout: Option<Duration>) -> EngineResult<TaskRecord> {
        self.store.wait_terminal(id, timeout, self.config.poll_interval())
    }

    /// Submits, waits for the outcome and drops the record afterwards.
    pub fn run<F, R>(&self, options: TaskOptions, task: F) -> EngineResult<TaskRecord>
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<R> + Send + 'static,
        R: Serialize,
    {
        let id = self.submit_with(options, task)?;
        let record = self.wait(id, None)?;
        self.store.remove(id);
        Ok(record)
    }

    pub fn metrics(&self) -> Option<EngineMetrics> {
        self.store.metrics()
    }

    pub fn statistics(&self) -> TaskStatistics {
        let mut stats = self.store.statistics();
        stats.queued = self.queue.len();
        stats
    }

    pub fn list_active(&self) -> Vec<TaskId> {
        self.store.active_ids()
    }

    pub fn list_tasks(&self) -> Vec<TaskRecord> {
        self.store.records()
    }

    pub fn remove(&self, id: TaskId) -> Option<TaskRecord> {
        self.store.remove(id)
    }

    pub fn cleanup_finished(&self, older_than: Duration) -> usize {
        let removed = self.store.cleanup_finished(older_than);
        if removed > 0 {
            log::debug!("Cleaned up {} finished task(s)", removed);
        }
        removed
    }

    /// Applies the configured retention period.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_finished(self.config.retention())
    }

    /// Streams every status transition from now on. Each receiver buffers up
    /// to `SUBSCRIBER_BUFFER` events; while it is full, newer events are
    /// dropped for that receiver only and the engine never blocks on it.
    pub fn subscribe(&self) -> Receiver<TaskEvent> {
        self.store.subscribe()
    }

    /// Stops dispatch and cancels everything still pending. With `wait`, the
    /// workers drain in-flight tasks for up to `timeout` (forever on `None`);
    /// tasks still running after that have their tokens set. Without `wait`,
    /// running tokens are set and the call returns at once. Later calls do
    /// nothing.
    pub fn shutdown(&self, wait: bool, timeout: Option<Duration>) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            log::debug!("Task engine already shut down");
            return;
        }

        log::info!("Shutting down task engine (wait={})", wait);

        let drained = self.queue.close();
        log::debug!("Closed pending queue, {} queued entries dropped", drained.len());

        let runtime = self.runtime.lock().take();
        let Runtime { mut dispatcher, mut pool } = match runtime {
            Some(runtime) => runtime,
            None => return,
        };

        dispatcher.stop();

        let cancelled = self.store.cancel_all_pending(CANCELLED_ON_SHUTDOWN);
        if cancelled > 0 {
            log::info!("Cancelled {} pending task(s)", cancelled);
        }

        if wait {
            if !pool.shutdown(timeout) {
                let signalled = self.store.cancel_running();
                log::warn!(
                    "Shutdown timed out after {:?}, signalled {} running task(s)",
                    timeout.unwrap_or_default(),
                    signalled
                );
                pool.detach();
            }
        } else {
            let signalled = self.store.cancel_running();
            if signalled > 0 {
                log::info!("Signalled {} running task(s) to stop", signalled);
            }
            pool.detach();
        }

        log::info!("Task engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown(true, Some(self.config.shutdown_timeout()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::task::{TaskPriority, TaskStatus};
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::mpsc::{channel, Sender};
    use std::thread;
    use std::time::Instant;

    fn test_engine(workers: usize) -> Engine {
        Engine::new(
            EngineConfig::new()
                .with_worker_count(workers)
                .with_thread_name_prefix("test")
                .with_dispatch_wait(Duration::from_millis(20))
                .with_poll_interval(Duration::from_millis(10)),
        )
        .unwrap()
    }

    fn wait_for(engine: &Engine, id: TaskId) -> TaskRecord {
        engine.wait(id, Some(Duration::from_secs(10))).unwrap()
    }

    fn wait_until_running(engine: &Engine, id: TaskId) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.get_status(id).map(|r| r.status) != Some(TaskStatus::Running) {
            assert!(Instant::now() < deadline, "task {} never started", id);
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Occupies a worker until the returned sender is used or dropped.
    fn block_worker(engine: &Engine) -> (TaskId, Sender<()>) {
        let (release, gate) = channel::<()>();
        let id = engine
            .submit_with(TaskOptions::named("gate").with_priority(TaskPriority::Critical), move |_ctx| {
                let _ = gate.recv();
                Ok(())
            })
            .unwrap();
        wait_until_running(engine, id);
        (id, release)
    }

    fn import_catalog(_ctx: &TaskContext) -> anyhow::Result<u32> {
        Ok(42)
    }

    #[test]
    fn test_submit_and_wait() {
        let engine = test_engine(2);
        let id = engine.submit(import_catalog).unwrap();

        let record = wait_for(&engine, id);
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.name, "import_catalog");
        assert_eq!(record.result, Some(json!(42)));
        assert!(record.error.is_none());
        assert!(record.started_at.is_some() && record.completed_at.is_some());
    }

    #[test]
    fn test_priority_order_on_single_worker() {
        let engine = test_engine(1);
        let (gate, release) = block_worker(&engine);
        let order = Arc::new(Mutex::new(Vec::new()));

        let submit = |label: &'static str, priority: TaskPriority| {
            let order = order.clone();
            engine
                .submit_with(TaskOptions::named(label).with_priority(priority), move |_ctx| {
                    order.lock().push(label);
                    Ok(())
                })
                .unwrap()
        };
        let task1 = submit("task1", TaskPriority::High);
        let task2 = submit("task2", TaskPriority::Low);
        let task3 = submit("task3", TaskPriority::High);

        release.send(()).unwrap();
        wait_for(&engine, gate);
        for id in [task1, task2, task3] {
            assert_eq!(wait_for(&engine, id).status, TaskStatus::Completed);
        }

        assert_eq!(*order.lock(), vec!["task1", "task3", "task2"]);
    }

    #[test]
    fn test_cancel_running_task() {
        let engine = test_engine(1);
        let id = engine
            .submit(|ctx| {
                for _ in 0..50 {
                    ctx.check_cancelled()?;
                    thread::sleep(Duration::from_millis(100));
                }
                Ok("finished")
            })
            .unwrap();

        wait_until_running(&engine, id);
        thread::sleep(Duration::from_millis(200));
        assert!(engine.cancel(id));

        let record = wait_for(&engine, id);
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.result.is_none());
        assert!(!record.error_message().unwrap_or_default().is_empty());
        assert!(record.duration().unwrap() < Duration::from_secs(1));
        assert!(!engine.cancel(id));
    }

    #[test]
    fn test_cancel_pending_task_never_runs() {
        let engine = test_engine(1);
        let (_gate, release) = block_worker(&engine);
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        let id = engine
            .submit(move |_ctx| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert!(engine.cancel(id));
        assert_eq!(engine.get_status(id).unwrap().status, TaskStatus::Cancelled);

        drop(release);
        let after = engine.submit(|_ctx| Ok(1)).unwrap();
        wait_for(&engine, after);

        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(wait_for(&engine, id).started_at, None);
    }

    #[test]
    fn test_failure_records_message() {
        let engine = test_engine(1);
        let id = engine
            .submit(|_ctx: &TaskContext| -> anyhow::Result<()> { Err(anyhow!("boom")) })
            .unwrap();

        let record = wait_for(&engine, id);
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error_message(), Some("boom"));
        assert!(record.result.is_none());
        assert!(matches!(
            record.into_result(),
            Err(EngineError::ExecutionFailure { message, .. }) if message == "boom"
        ));
    }

    #[test]
    fn test_panic_is_contained() {
        let engine = test_engine(1);
        let id = engine
            .submit(|_ctx: &TaskContext| -> anyhow::Result<()> { panic!("index out of range") })
            .unwrap();

        let record = wait_for(&engine, id);
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error_message().unwrap().contains("index out of range"));

        let next = engine.submit(|_ctx| Ok("still alive")).unwrap();
        assert_eq!(wait_for(&engine, next).result, Some(json!("still alive")));
    }

    #[test]
    fn test_wait_timeout_leaves_task_alone() {
        let engine = test_engine(1);
        let (gate, release) = block_worker(&engine);

        let started = Instant::now();
        let result = engine.wait(gate, Some(Duration::from_millis(100)));
        assert!(matches!(result, Err(EngineError::Timeout { id, .. }) if id == gate));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(engine.get_status(gate).unwrap().status, TaskStatus::Running);

        release.send(()).unwrap();
        assert_eq!(wait_for(&engine, gate).status, TaskStatus::Completed);
        assert!(matches!(engine.wait(TaskId::new(), None), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_progress_visible_while_running() {
        let engine = test_engine(1);
        let (release, gate) = channel::<()>();
        let id = engine
            .submit(move |ctx| {
                ctx.report_progress(30, 100, "halfway");
                let _ = gate.recv();
                Ok(())
            })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let progress = loop {
            if let Some(progress) = engine.get_status(id).and_then(|r| r.progress) {
                break progress;
            }
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(progress.percentage, 30.0);
        assert_eq!(progress.message, "halfway");

        release.send(()).unwrap();
        wait_for(&engine, id);
    }

    #[test]
    fn test_concurrent_submitters() {
        let engine = Arc::new(test_engine(4));
        let mut handles = Vec::new();

        for worker in 0..4 {
            let engine = engine.clone();
            handles.push(thread::spawn(move || {
                (0..25)
                    .map(|n| engine.submit(move |_ctx| Ok(worker * 100 + n)).unwrap())
                    .collect::<Vec<_>>()
            }));
        }

        let ids: Vec<TaskId> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        for id in &ids {
            assert_eq!(wait_for(&engine, *id).status, TaskStatus::Completed);
        }

        let metrics = engine.metrics().unwrap();
        assert_eq!(metrics.total_tasks, 100);
        assert_eq!(metrics.completed_tasks, 100);
        assert_eq!(metrics.active_tasks, 0);
        assert!(engine.list_active().is_empty());
    }

    #[test]
    fn test_queue_capacity() {
        let engine = Engine::new(
            EngineConfig::new()
                .with_worker_count(1)
                .with_queue_capacity(1)
                .with_dispatch_wait(Duration::from_millis(20)),
        )
        .unwrap();
        let (_gate, release) = block_worker(&engine);

        let queued = engine.submit(|_ctx| Ok(())).unwrap();
        let rejected = engine.submit(|_ctx| Ok(()));
        assert!(matches!(rejected, Err(EngineError::QueueFull { capacity: 1 })));
        assert_eq!(engine.statistics().queued, 1);
        assert_eq!(engine.list_tasks().len(), 2);

        drop(release);
        wait_for(&engine, queued);
    }

    #[test]
    fn test_cancelled_pending_tasks_free_queue_capacity() {
        let engine = Engine::new(
            EngineConfig::new()
                .with_worker_count(1)
                .with_queue_capacity(2)
                .with_dispatch_wait(Duration::from_millis(20)),
        )
        .unwrap();
        let (_gate, release) = block_worker(&engine);

        let first = engine.submit(|_ctx| Ok(())).unwrap();
        let second = engine.submit(|_ctx| Ok(())).unwrap();
        assert!(engine.cancel(first));
        assert!(engine.cancel(second));

        let stats = engine.statistics();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.queued, 0);

        let third = engine.submit(|_ctx| Ok(())).unwrap();
        let fourth = engine.submit(|_ctx| Ok(())).unwrap();
        assert_eq!(engine.statistics().queued, 2);

        drop(release);
        assert_eq!(wait_for(&engine, third).status, TaskStatus::Completed);
        assert_eq!(wait_for(&engine, fourth).status, TaskStatus::Completed);
        assert_eq!(engine.get_status(first).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_wait_on_finished_task_returns_at_once() {
        let engine = Engine::new(
            EngineConfig::new()
                .with_worker_count(1)
                .with_poll_interval(Duration::from_secs(1)),
        )
        .unwrap();
        let id = engine.submit(import_catalog).unwrap();
        let first = engine.wait(id, Some(Duration::from_secs(10))).unwrap();
        assert_eq!(first.status, TaskStatus::Completed);

        let started = Instant::now();
        let again = engine.wait(id, Some(Duration::from_secs(10))).unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(Some(again.clone()), engine.get_status(id));
        assert_eq!(again, first);
    }

    #[test]
    fn test_unbounded_timeouts_are_accepted() {
        let engine = test_engine(1);
        let id = engine.submit(import_catalog).unwrap();
        let record = engine.wait(id, Some(Duration::MAX)).unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result, Some(json!(42)));

        engine.shutdown(true, Some(Duration::MAX));
        assert!(engine.is_shut_down());
    }

    #[test]
    fn test_invalid_name() {
        let engine = test_engine(1);
        let result = engine.submit_with(TaskOptions::named("  "), |_ctx| Ok(()));
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
        assert!(engine.list_tasks().is_empty());
    }

    #[test]
    fn test_run_evicts_record() {
        let engine = test_engine(1);
        let record = engine
            .run(TaskOptions::named("checksum"), |_ctx| Ok(vec![1, 2, 3]))
            .unwrap();

        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result, Some(json!([1, 2, 3])));
        assert!(engine.get_status(record.id).is_none());
    }

    #[test]
    fn test_statistics_remove_and_cleanup() {
        let engine = test_engine(1);
        let (gate, release) = block_worker(&engine);
        let pending = engine.submit(|_ctx| Ok(())).unwrap();
        let doomed = engine.submit(|_ctx| Ok(())).unwrap();
        engine.cancel(doomed);

        let stats = engine.statistics();
        assert_eq!(stats.running, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(engine.list_active(), vec![gate, pending]);

        assert!(engine.remove(pending).is_none());
        assert_eq!(engine.remove(doomed).unwrap().status, TaskStatus::Cancelled);

        drop(release);
        wait_for(&engine, pending);
        assert_eq!(engine.cleanup_expired(), 0);
        assert_eq!(engine.cleanup_finished(Duration::ZERO), 2);
        assert!(engine.list_tasks().is_empty());
    }

    #[test]
    fn test_metrics_disabled() {
        let engine = Engine::new(EngineConfig::new().with_worker_count(1).with_metrics(false)).unwrap();
        let id = engine.submit(|_ctx| Ok(())).unwrap();
        wait_for(&engine, id);
        assert!(engine.metrics().is_none());
    }

    #[test]
    fn test_events_stream() {
        let engine = test_engine(1);
        let events = engine.subscribe();
        let id = engine.submit(|_ctx| Ok(())).unwrap();
        wait_for(&engine, id);

        let seen: Vec<TaskStatus> = events.try_iter().filter(|e| e.id == id).map(|e| e.to).collect();
        assert_eq!(seen, vec![TaskStatus::Pending, TaskStatus::Running, TaskStatus::Completed]);
    }

    #[test]
    fn test_shutdown_waits_for_running_and_cancels_pending() {
        let engine = test_engine(1);
        let running = engine
            .submit(|ctx| {
                ctx.report_progress(0, 1, "started");
                thread::sleep(Duration::from_millis(150));
                Ok("done")
            })
            .unwrap();
        wait_until_running(&engine, running);
        let pending = engine.submit(|_ctx| Ok(())).unwrap();

        engine.shutdown(true, None);

        assert_eq!(engine.get_status(running).unwrap().status, TaskStatus::Completed);
        let pending = engine.get_status(pending).unwrap();
        assert_eq!(pending.status, TaskStatus::Cancelled);
        assert_eq!(pending.error_message(), Some(CANCELLED_ON_SHUTDOWN));

        assert!(engine.is_shut_down());
        assert!(matches!(engine.submit(|_ctx| Ok(())), Err(EngineError::ShutDown)));
        engine.shutdown(true, None);
    }

    #[test]
    fn test_shutdown_without_wait_signals_running() {
        let engine = test_engine(1);
        let id = engine
            .submit(|ctx| {
                ctx.sleep(Duration::from_secs(5))?;
                Ok(())
            })
            .unwrap();
        wait_until_running(&engine, id);

        let started = Instant::now();
        engine.shutdown(false, None);
        assert!(started.elapsed() < Duration::from_secs(1));

        let record = wait_for(&engine, id);
        assert_eq!(record.status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_shutdown_timeout_signals_stragglers() {
        let engine = test_engine(1);
        let id = engine
            .submit(|ctx| {
                ctx.sleep(Duration::from_secs(5))?;
                Ok(())
            })
            .unwrap();
        wait_until_running(&engine, id);

        engine.shutdown(true, Some(Duration::from_millis(50)));
        assert_eq!(wait_for(&engine, id).status, TaskStatus::Cancelled);
    }
}
