//! Resource watcher — polls an on-screen counter and reacts to gains.
//!
//! Every change is written to the state store. An increase enqueues the
//! configured playbook with `{{value}}`, `{{previous}}` and `{{delta}}`
//! filled in. Readings that cannot be parsed are treated as "no change".

use std::sync::Arc;
use std::time::Duration;

use autoclaw_core::config::WatcherConfig;
use autoclaw_core::error::Result;
use autoclaw_core::traits::Desktop;
use autoclaw_core::types::OcrMode;
use tokio::sync::watch;

use crate::playbook::PlaybookRegistry;
use crate::queue::TaskQueue;
use crate::store::StateStore;
use crate::tasks::Task;

/// Extract the digits of an OCR reading. `None` when there are none.
pub fn parse_reading(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

pub struct Watcher {
    desktop: Desktop,
    store: Arc<StateStore>,
    registry: Arc<PlaybookRegistry>,
    queue: TaskQueue,
    config: WatcherConfig,
    last: i64,
}

impl Watcher {
    /// The previous reading starts at the stored resource value.
    pub fn new(
        desktop: Desktop,
        store: Arc<StateStore>,
        registry: Arc<PlaybookRegistry>,
        queue: TaskQueue,
        config: WatcherConfig,
    ) -> Self {
        let last = store.resources();
        Self {
            desktop,
            store,
            registry,
            queue,
            config,
            last,
        }
    }

    pub fn last_reading(&self) -> i64 {
        self.last
    }

    /// Feed one OCR reading. Returns the task to enqueue on an increase.
    pub fn observe(&mut self, text: &str) -> Option<Task> {
        let Some(value) = parse_reading(text) else {
            tracing::trace!("Unreadable counter: {:?}", text);
            return None;
        };
        if value == self.last {
            return None;
        }

        let previous = std::mem::replace(&mut self.last, value);
        if let Err(e) = self.store.update_resource(value) {
            tracing::warn!("⚠️ Failed to store resource reading {}: {e}", value);
        }
        if value < previous {
            tracing::debug!("📉 Resources {} → {}", previous, value);
            return None;
        }

        let delta = value - previous;
        tracing::info!("📈 Resources {} → {} (+{})", previous, value, delta);
        let Some(spec) = self.registry.get(&self.config.on_increase) else {
            tracing::error!("❌ Watcher playbook '{}' is not registered", self.config.on_increase);
            return None;
        };
        Some(Task::new(spec.interpolate(&[
            ("value", value.to_string()),
            ("previous", previous.to_string()),
            ("delta", delta.to_string()),
        ])))
    }

    /// Read the counter once and enqueue a reaction if it went up.
    pub fn poll(&mut self) -> Result<bool> {
        let text = self
            .desktop
            .read_text(Some(&self.config.region), OcrMode::Digits)?;
        match self.observe(&text) {
            Some(task) => {
                self.queue.enqueue(task)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Poll every `interval_ms` until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "👀 Watcher started on {} every {}ms (seed {})",
            self.config.region,
            self.config.interval_ms,
            self.last
        );
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.interval_ms.max(1)));
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.poll() {
                tracing::warn!("⚠️ Watcher poll failed: {e}");
            }
        }
        tracing::info!("👀 Watcher stopped");
    }
}
