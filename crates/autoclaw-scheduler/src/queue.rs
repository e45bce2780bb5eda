//! Task queue — the single hand-off point between producers and the worker.
//!
//! Unbounded and order preserving. [`TaskQueue`] is a cheap cloneable
//! producer handle (triggers, watcher, retry timer, continuations);
//! [`TaskReceiver`] is owned by the one worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use autoclaw_core::error::{AutoClawError, Result};
use tokio::sync::mpsc;

use crate::tasks::Task;

/// Producer side of the queue.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
    pending: Arc<AtomicUsize>,
}

/// Consumer side of the queue.
#[derive(Debug)]
pub struct TaskReceiver {
    rx: mpsc::UnboundedReceiver<Task>,
    pending: Arc<AtomicUsize>,
}

/// Create a connected producer/consumer pair.
pub fn task_queue() -> (TaskQueue, TaskReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        TaskQueue {
            tx,
            pending: pending.clone(),
        },
        TaskReceiver { rx, pending },
    )
}

impl TaskQueue {
    /// Append `task` to the tail. Never blocks; fails only once the receiver is gone.
    pub fn enqueue(&self, task: Task) -> Result<()> {
        let (id, name) = (task.id.clone(), task.name().to_string());
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(AutoClawError::QueueClosed);
        }
        tracing::debug!("📥 Enqueued '{}' ({}), pending: {}", name, id, self.len());
        Ok(())
    }

    /// Tasks enqueued but not yet dequeued.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl TaskReceiver {
    /// Wait for the next task. `None` once every producer handle is dropped.
    pub async fn dequeue(&mut self) -> Option<Task> {
        let task = self.rx.recv().await?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(task)
    }

    /// Take the next task if one is ready.
    pub fn try_dequeue(&mut self) -> Option<Task> {
        let task = self.rx.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(task)
    }

    /// Discard every pending task without running it. Returns how many were dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while let Some(task) = self.try_dequeue() {
            tracing::debug!("🗑️ Discarded '{}' ({})", task.name(), task.id);
            dropped += 1;
        }
        dropped
    }
}
