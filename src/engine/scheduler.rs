// Tue Jan 13 2026 - Alex

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::store::{Dispatch, Outcome, StatusStore};
use crate::engine::task::{TaskId, TaskPriority};
use crate::engine::worker::{Assignment, PoolHandle, WorkerSlots};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One queued task. Entries compare so that the max-heap yields the lowest
/// priority rank first, and among equal ranks the earliest sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEntry {
    pub priority: TaskPriority,
    pub sequence: u64,
    pub id: TaskId,
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueState {
    heap: BinaryHeap<PendingEntry>,
    next_sequence: u64,
    closed: bool,
}

pub struct PendingQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

impl PendingQueue {
    /// A `capacity` of zero means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_sequence: 0,
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    pub fn push(&self, priority: TaskPriority, id: TaskId) -> EngineResult<PendingEntry> {
        self.push_with(priority, id, || {})
    }

    /// Queues `id`, running `admit` under the queue lock once the entry is
    /// known to fit. Nothing runs when the queue is closed or full.
    pub fn push_with<F>(&self, priority: TaskPriority, id: TaskId, admit: F) -> EngineResult<PendingEntry>
    where
        F: FnOnce(),
    {
        let mut state = self.state.lock();

        if state.closed {
            return Err(EngineError::ShutDown);
        }
        if self.capacity > 0 && state.heap.len() >= self.capacity {
            return Err(EngineError::QueueFull {
                capacity: self.capacity,
            });
        }

        admit();

        let entry = PendingEntry {
            priority,
            sequence: state.next_sequence,
            id,
        };
        state.next_sequence += 1;
        state.heap.push(entry);
        drop(state);

        self.available.notify_one();
        Ok(entry)
    }

    /// Drops the entry for `id`, if still queued, so it stops counting
    /// against the capacity.
    pub fn remove(&self, id: TaskId) -> bool {
        let mut state = self.state.lock();
        let before = state.heap.len();
        state.heap.retain(|entry| entry.id != id);
        state.heap.len() != before
    }

    pub fn try_pop(&self) -> Option<PendingEntry> {
        self.state.lock().heap.pop()
    }

    pub fn pop_timeout(&self, wait: Duration) -> Option<PendingEntry> {
        let mut state = self.state.lock();
        if state.heap.is_empty() && !state.closed {
            self.available.wait_for(&mut state, wait);
        }
        state.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Refuses further pushes and hands back whatever was still queued.
    pub fn close(&self) -> Vec<PendingEntry> {
        let mut state = self.state.lock();
        state.closed = true;
        let drained = std::mem::take(&mut state.heap).into_sorted_vec();
        drop(state);

        self.available.notify_all();
        drained.into_iter().rev().collect()
    }

    pub fn wake_all(&self) {
        self.available.notify_all();
    }
}

/// Single background thread that moves entries from the pending queue onto
/// idle workers.
pub struct Dispatcher {
    running: Arc<AtomicBool>,
    queue: Arc<PendingQueue>,
    slots: Arc<WorkerSlots>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub(crate) fn spawn(
        name: String,
        queue: Arc<PendingQueue>,
        store: Arc<StatusStore>,
        pool: PoolHandle,
        wait: Duration,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let slots = pool.slots().clone();

        let handle = {
            let running = running.clone();
            let queue = queue.clone();
            thread::Builder::new()
                .name(name)
                .spawn(move || Dispatcher::run_loop(running, queue, store, pool, wait))?
        };

        Ok(Self {
            running,
            queue,
            slots,
            handle: Some(handle),
        })
    }

    fn run_loop(
        running: Arc<AtomicBool>,
        queue: Arc<PendingQueue>,
        store: Arc<StatusStore>,
        pool: PoolHandle,
        wait: Duration,
    ) {
        log::debug!("Dispatcher started");
        let mut slot_held = false;

        while running.load(AtomicOrdering::Acquire) {
            if !slot_held {
                if !pool.slots().acquire(wait) {
                    continue;
                }
                slot_held = true;
            }

            let entry = match queue.pop_timeout(wait) {
                Some(entry) => entry,
                None => continue,
            };

            if !running.load(AtomicOrdering::Acquire) {
                log::debug!("Dispatcher stopping, task {} stays pending", entry.id);
                break;
            }

            match store.begin(entry.id) {
                Dispatch::Skip => log::trace!("Skipping stale queue entry for task {}", entry.id),
                Dispatch::Cancelled => log::info!("Task {} was cancelled before dispatch", entry.id),
                Dispatch::Run { job, context } => {
                    log::debug!(
                        "Dispatching task {} ({}) at priority {}",
                        entry.id,
                        context.name(),
                        entry.priority
                    );
                    match pool.assign(Assignment {
                        id: entry.id,
                        job,
                        context,
                    }) {
                        Ok(()) => slot_held = false,
                        Err(assignment) => {
                            log::error!("Execution pool rejected task {}", assignment.id);
                            store.finish(
                                assignment.id,
                                Outcome::Failed("Execution pool is not accepting work".to_string()),
                            );
                        }
                    }
                }
            }
        }

        if slot_held {
            pool.slots().release();
        }
        log::debug!("Dispatcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(AtomicOrdering::Acquire)
    }

    pub fn stop(&mut self) {
        self.running.store(false, AtomicOrdering::Release);
        self.queue.wake_all();
        self.slots.wake_all();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Dispatcher thread panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
