// Tue Jan 13 2026 - Alex

use crate::engine::cancel::Cancelled;
use crate::engine::context::TaskContext;
use crate::engine::store::{Outcome, StatusStore, CANCELLED_BEFORE_START, CANCELLED_WHILE_RUNNING};
use crate::engine::task::{Job, TaskId};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) struct Assignment {
    pub id: TaskId,
    pub job: Job,
    pub context: TaskContext,
}

/// Counts idle workers. The dispatcher takes a slot before it dequeues, so
/// an entry only leaves the queue when a worker is ready for it.
pub(crate) struct WorkerSlots {
    idle: Mutex<usize>,
    freed: Condvar,
}

impl WorkerSlots {
    pub fn new(size: usize) -> Self {
        Self {
            idle: Mutex::new(size),
            freed: Condvar::new(),
        }
    }

    pub fn acquire(&self, wait: Duration) -> bool {
        let mut idle = self.idle.lock();
        if *idle == 0 {
            self.freed.wait_for(&mut idle, wait);
        }
        if *idle > 0 {
            *idle -= 1;
            true
        } else {
            false
        }
    }

    pub fn release(&self) {
        *self.idle.lock() += 1;
        self.freed.notify_one();
    }

    pub fn idle(&self) -> usize {
        *self.idle.lock()
    }

    pub fn wake_all(&self) {
        self.freed.notify_all();
    }
}

#[derive(Clone)]
pub(crate) struct PoolHandle {
    sender: Sender<Assignment>,
    slots: Arc<WorkerSlots>,
}

impl PoolHandle {
    pub fn new(sender: Sender<Assignment>, slots: Arc<WorkerSlots>) -> Self {
        Self { sender, slots }
    }

    pub fn slots(&self) -> &Arc<WorkerSlots> {
        &self.slots
    }

    /// Hands the assignment back when every worker is gone.
    pub fn assign(&self, assignment: Assignment) -> Result<(), Assignment> {
        self.sender.send(assignment).map_err(|err| err.0)
    }
}

pub struct Worker {
    id: usize,
    thread_handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        id: usize,
        name: String,
        receiver: Arc<Mutex<Receiver<Assignment>>>,
        store: Arc<StatusStore>,
        slots: Arc<WorkerSlots>,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new().name(name).spawn(move || {
            Worker::worker_loop(id, receiver, store, slots);
        })?;

        Ok(Self {
            id,
            thread_handle: Some(handle),
        })
    }

    fn worker_loop(
        id: usize,
        receiver: Arc<Mutex<Receiver<Assignment>>>,
        store: Arc<StatusStore>,
        slots: Arc<WorkerSlots>,
    ) {
        log::trace!("Worker {} started", id);

        loop {
            let assignment = {
                let receiver = receiver.lock();
                receiver.recv()
            };

            match assignment {
                Ok(assignment) => {
                    Worker::execute(id, &store, assignment);
                    slots.release();
                }
                Err(_) => break,
            }
        }

        log::trace!("Worker {} exiting", id);
    }

    fn execute(worker_id: usize, store: &StatusStore, assignment: Assignment) {
        let Assignment { id, job, context } = assignment;

        if context.is_cancelled() {
            log::info!("Task {} ({}) cancelled before it ran", id, context.name());
            store.finish(id, Outcome::Cancelled(CANCELLED_BEFORE_START.to_string()));
            return;
        }

        log::debug!("Worker {} running task {} ({})", worker_id, id, context.name());
        let start_time = Instant::now();

        let ctx = &context;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(move || job(ctx))) {
            Ok(Ok(_)) if context.is_cancelled() => Outcome::Cancelled(CANCELLED_WHILE_RUNNING.to_string()),
            Ok(Ok(value)) => Outcome::Completed(value),
            Ok(Err(err)) if is_cancellation(&err) => Outcome::Cancelled(CANCELLED_WHILE_RUNNING.to_string()),
            Ok(Err(err)) => {
                let mut message = format!("{:#}", err);
                if message.is_empty() {
                    message = "Task failed without an error message".to_string();
                }
                log::error!("Task {} ({}) failed: {}", id, context.name(), message);
                Outcome::Failed(message)
            }
            Err(payload) => {
                let message = format!("Task panicked: {}", panic_message(payload.as_ref()));
                log::error!("Task {} ({}) {}", id, context.name(), message);
                Outcome::Failed(message)
            }
        };

        let duration = start_time.elapsed();
        match &outcome {
            Outcome::Completed(_) => log::debug!("Task {} completed in {:.2?}", id, duration),
            Outcome::Cancelled(_) => log::info!("Task {} cancelled after {:.2?}", id, duration),
            Outcome::Failed(_) => {}
        }

        store.finish(id, outcome);
    }

    fn join_until(&mut self, deadline: Option<Instant>) -> bool {
        let handle = match self.thread_handle.take() {
            Some(handle) => handle,
            None => return true,
        };

        if let Some(deadline) = deadline {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    self.thread_handle = Some(handle);
                    return false;
                }
                thread::sleep(JOIN_POLL_INTERVAL);
            }
        }

        if handle.join().is_err() {
            log::warn!("Worker {} thread panicked", self.id);
        }
        true
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Cancelled>().is_some() || err.chain().any(|cause| cause.is::<Cancelled>())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub struct ExecutionPool {
    workers: Vec<Worker>,
    sender: Option<Sender<Assignment>>,
    slots: Arc<WorkerSlots>,
}

impl ExecutionPool {
    pub(crate) fn new(size: usize, thread_name_prefix: &str, store: Arc<StatusStore>) -> std::io::Result<Self> {
        let (sender, receiver) = channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let slots = Arc::new(WorkerSlots::new(size));
        let mut workers = Vec::with_capacity(size);

        for i in 0..size {
            workers.push(Worker::spawn(
                i,
                format!("{}-worker-{}", thread_name_prefix, i),
                receiver.clone(),
                store.clone(),
                slots.clone(),
            )?);
        }

        Ok(Self {
            workers,
            sender: Some(sender),
            slots,
        })
    }

    pub(crate) fn handle(&self) -> Option<PoolHandle> {
        self.sender
            .as_ref()
            .map(|sender| PoolHandle::new(sender.clone(), self.slots.clone()))
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn idle_count(&self) -> usize {
        self.slots.idle()
    }

    pub fn running_count(&self) -> usize {
        self.workers.iter().filter(|w| w.is_running()).count()
    }

    /// Closes the pool and waits for in-flight work to drain. Returns `false`
    /// if some worker was still busy when `timeout` ran out.
    pub fn shutdown(&mut self, timeout: Option<Duration>) -> bool {
        self.sender.take();
        self.slots.wake_all();

        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut all_joined = true;
        for worker in &mut self.workers {
            if !worker.join_until(deadline) {
                all_joined = false;
            }
        }

        all_joined
    }

    /// Closes the pool without waiting. Busy workers exit once their current
    /// task returns.
    pub fn detach(mut self) {
        self.sender.take();
        self.slots.wake_all();
        let detached = self.workers.iter().filter(|w| w.is_running()).count();
        self.workers.clear();
        log::debug!("Detached {} worker thread(s)", detached);
    }
}
