//! Retry scheduler — re-enqueues failed tasks after their cooldown.
//!
//! One timer loop owns a min-heap of due times. Scheduling a retry never
//! blocks the worker; the task goes back to the tail of the queue once its
//! cooldown has elapsed. Retries still pending at shutdown are dropped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::queue::TaskQueue;
use crate::tasks::Task;

/// Delays are clamped here so a due time always fits in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct Pending {
    due: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed so the BinaryHeap pops the earliest due time first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Handle used by the worker to schedule a retry.
#[derive(Debug, Clone)]
pub struct RetryHandle {
    tx: mpsc::UnboundedSender<(Task, Duration)>,
}

impl RetryHandle {
    /// Re-enqueue `task` after `delay`. Returns false once the timer loop has stopped.
    pub fn schedule(&self, task: Task, delay: Duration) -> bool {
        self.tx.send((task, delay)).is_ok()
    }
}

/// Timer loop that feeds due retries back into the queue.
pub struct RetryScheduler {
    rx: mpsc::UnboundedReceiver<(Task, Duration)>,
    queue: TaskQueue,
    heap: BinaryHeap<Pending>,
    seq: u64,
}

impl RetryScheduler {
    pub fn new(queue: TaskQueue) -> (Self, RetryHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx,
                queue,
                heap: BinaryHeap::new(),
                seq: 0,
            },
            RetryHandle { tx },
        )
    }

    fn push(&mut self, task: Task, delay: Duration) {
        tracing::debug!(
            "🔁 Retry of '{}' scheduled in {:.1}s (attempt {})",
            task.name(),
            delay.as_secs_f64(),
            task.attempt_count() + 1
        );
        let now = Instant::now();
        let due = now
            .checked_add(delay)
            .filter(|due| *due <= now + FAR_FUTURE)
            .unwrap_or(now + FAR_FUTURE);
        self.seq += 1;
        self.heap.push(Pending {
            due,
            seq: self.seq,
            task,
        });
    }

    fn release_due(&mut self) {
        let now = Instant::now();
        while self.heap.peek().is_some_and(|p| p.due <= now) {
            let Some(pending) = self.heap.pop() else {
                break;
            };
            let name = pending.task.name().to_string();
            if let Err(e) = self.queue.enqueue(pending.task) {
                tracing::warn!("⚠️ Retry of '{}' dropped: {e}", name);
            }
        }
    }

    /// Run until `shutdown` flips to true or every handle is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("🔁 Retry scheduler started");
        let mut closed = false;
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.release_due();
            let next_due = self.heap.peek().map(|p| p.due);
            if closed && next_due.is_none() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                incoming = self.rx.recv(), if !closed => match incoming {
                    Some((task, delay)) => self.push(task, delay),
                    None => closed = true,
                },
                _ = sleep_until_opt(next_due) => {}
            }
        }

        if !self.heap.is_empty() {
            tracing::info!("🔁 Abandoning {} pending retries", self.heap.len());
        }
    }

    pub fn pending(&self) -> usize {
        self.heap.len()
    }
}

async fn sleep_until_opt(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}
