// Tue Jan 13 2026 - Alex

use crate::engine::task::{TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::time::SystemTime;

/// A status transition. `from` is `None` for the event that announces a new
/// submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: TaskId,
    pub name: String,
    pub from: Option<TaskStatus>,
    pub to: TaskStatus,
    pub at: SystemTime,
}

impl TaskEvent {
    pub fn new(id: TaskId, name: &str, from: Option<TaskStatus>, to: TaskStatus) -> Self {
        Self {
            id,
            name: name.to_string(),
            from,
            to,
            at: SystemTime::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.to.is_terminal()
    }
}

/// Events buffered per subscriber before new ones are dropped for it.
pub const SUBSCRIBER_BUFFER: usize = 1024;

#[derive(Debug)]
pub(crate) struct EventBus {
    subscribers: Vec<SyncSender<TaskEvent>>,
    buffer: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_buffer(SUBSCRIBER_BUFFER)
    }
}

impl EventBus {
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            subscribers: Vec::new(),
            buffer: buffer.max(1),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<TaskEvent> {
        let (sender, receiver) = sync_channel(self.buffer);
        self.subscribers.push(sender);
        receiver
    }

    /// Never blocks. A subscriber whose buffer is full misses this event but
    /// stays subscribed; one whose receiver is gone is removed.
    pub fn publish(&mut self, event: TaskEvent) {
        if self.subscribers.is_empty() {
            return;
        }

        let before = self.subscribers.len();
        let mut lagging = 0;
        self.subscribers.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                lagging += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });

        if lagging > 0 {
            log::debug!("Event for task {} skipped {} full subscriber buffer(s)", event.id, lagging);
        }
        let dropped = before - self.subscribers.len();
        if dropped > 0 {
            log::debug!("Dropped {} disconnected event subscriber(s)", dropped);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
