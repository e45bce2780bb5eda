//! Worker — the single consumer of the task queue.
//!
//! Tasks run strictly one at a time, in dequeue order. After each task the
//! worker decides what happens next: retry later, enqueue `on_success` or
//! `on_fail`, or nothing.

use std::sync::Arc;

use autoclaw_core::error::ActionError;
use autoclaw_core::types::OcrMode;
use tokio::sync::watch;

use crate::executor::ActionExecutor;
use crate::playbook::PlaybookRegistry;
use crate::queue::{TaskQueue, TaskReceiver};
use crate::retry::RetryHandle;
use crate::store::StateStore;
use crate::tasks::{ActionVerb, Continuation, Step, Task, TaskKind};

pub const COUNTER_SUCCEEDED: &str = "tasks_succeeded";
pub const COUNTER_FAILED: &str = "tasks_failed";

/// What became of one processed task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Succeeded,
    /// Failed, handed to the retry scheduler.
    Retrying { attempt: u32 },
    Failed(ActionError),
}

pub struct Worker {
    receiver: TaskReceiver,
    queue: TaskQueue,
    executor: ActionExecutor,
    registry: Arc<PlaybookRegistry>,
    retries: RetryHandle,
}

impl Worker {
    pub fn new(
        receiver: TaskReceiver,
        queue: TaskQueue,
        executor: ActionExecutor,
        registry: Arc<PlaybookRegistry>,
        retries: RetryHandle,
    ) -> Self {
        Self {
            receiver,
            queue,
            executor,
            registry,
            retries,
        }
    }

    fn store(&self) -> &Arc<StateStore> {
        self.executor.store()
    }

    /// Consume tasks until `shutdown` flips to true, then discard what is left.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("👷 Worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let task = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = self.receiver.dequeue() => match next {
                    Some(task) => task,
                    None => break,
                },
            };
            self.process(task).await;
        }

        let dropped = self.receiver.drain();
        tracing::info!("👷 Worker stopped ({} queued tasks discarded)", dropped);
    }

    /// Run one task to completion and route its outcome.
    pub async fn process(&self, task: Task) -> TaskOutcome {
        tracing::info!(
            "▶️ Running '{}' [{}] ({})",
            task.name(),
            task.spec.kind.label(),
            task.id
        );
        match self.run_body(&task).await {
            Ok(()) => {
                self.complete(&task);
                TaskOutcome::Succeeded
            }
            Err(err) => self.fail(task, err),
        }
    }

    async fn run_body(&self, task: &Task) -> Result<(), ActionError> {
        match &task.spec.kind {
            TaskKind::Routine { steps } | TaskKind::SemiRoutine { steps } => {
                for (i, step) in steps.iter().enumerate() {
                    if let Err(e) = self.executor.execute(step).await {
                        tracing::debug!(
                            "'{}' stopped at step {}/{}: {}",
                            task.name(),
                            i + 1,
                            steps.len(),
                            step.describe()
                        );
                        return Err(e);
                    }
                }
                Ok(())
            }
            TaskKind::UserInput {
                region,
                expected,
                on_match,
                on_mismatch,
            } => {
                let actual = self.executor.read_text(Some(region), OcrMode::Line)?;
                if actual == *expected {
                    tracing::info!("✅ Read '{}' as expected", actual);
                    self.executor.execute(on_match).await
                } else {
                    let mismatch = ActionError::MismatchExpected {
                        expected: expected.clone(),
                        actual,
                    };
                    tracing::info!("↪️ {}", mismatch);
                    self.executor.execute(on_mismatch).await
                }
            }
            TaskKind::WaitFor {
                image,
                timeout_secs,
                region,
            } => {
                let step = Step {
                    image: Some(image.clone()),
                    action: ActionVerb::WaitFor,
                    timeout_secs: *timeout_secs,
                    region: *region,
                    ..Step::default()
                };
                self.executor.execute(&step).await
            }
            TaskKind::Spawn { tasks } => {
                for child in tasks {
                    self.queue.enqueue(Task::new(child.clone()))?;
                }
                tracing::info!("🌱 '{}' spawned {} tasks", task.name(), tasks.len());
                Ok(())
            }
        }
    }

    fn complete(&self, task: &Task) {
        tracing::info!("✅ '{}' succeeded", task.name());
        if let Some(tx) = &task.spec.record
            && let Err(e) = self.store().record_transaction(tx)
        {
            tracing::warn!("⚠️ Failed to record transaction for '{}': {e}", task.name());
        }
        self.bump(COUNTER_SUCCEEDED);
        if let Some(next) = &task.spec.on_success {
            self.follow(next, task.name());
        }
    }

    fn fail(&self, mut task: Task, err: ActionError) -> TaskOutcome {
        if let Some(policy) = task.spec.retry
            && task.can_retry()
        {
            let Some(cooldown) = policy.cooldown() else {
                let invalid = ActionError::InvalidStep(format!(
                    "retry cooldown {}s is out of range ({err})",
                    policy.cooldown_secs
                ));
                return self.give_up(task.name(), task.spec.on_fail.as_ref(), invalid);
            };
            let attempt = task.record_failed_attempt();
            tracing::warn!(
                "🔁 '{}' failed ({err}); retry {}/{} in {:.1}s",
                task.name(),
                attempt,
                policy.max_attempts,
                policy.cooldown_secs
            );
            let name = task.name().to_string();
            let on_fail = task.spec.on_fail.clone();
            if self.retries.schedule(task, cooldown) {
                return TaskOutcome::Retrying { attempt };
            }
            tracing::warn!("⚠️ Retry scheduler stopped; '{}' will not be retried", name);
            return self.give_up(&name, on_fail.as_ref(), err);
        }

        let err = match task.spec.retry {
            Some(_) => ActionError::PermanentFailure {
                attempts: task.attempt_count() + 1,
                last: Box::new(err),
            },
            None => err,
        };
        self.give_up(task.name(), task.spec.on_fail.as_ref(), err)
    }

    fn give_up(&self, name: &str, on_fail: Option<&Continuation>, err: ActionError) -> TaskOutcome {
        tracing::error!("❌ '{}' failed: {}", name, err);
        self.bump(COUNTER_FAILED);
        if let Some(next) = on_fail {
            self.follow(next, name);
        }
        TaskOutcome::Failed(err)
    }

    fn follow(&self, next: &Continuation, after: &str) {
        match self.registry.resolve_continuation(next) {
            Ok(task) => {
                tracing::debug!("➡️ '{}' continues with '{}'", after, task.name());
                if let Err(e) = self.queue.enqueue(task) {
                    tracing::warn!("⚠️ Continuation of '{}' dropped: {e}", after);
                }
            }
            Err(e) => tracing::error!("❌ Continuation of '{}' failed: {e}", after),
        }
    }

    fn bump(&self, counter: &str) {
        if let Err(e) = self.store().increment_counter(counter) {
            tracing::warn!("⚠️ Failed to update counter {}: {e}", counter);
        }
    }
}
