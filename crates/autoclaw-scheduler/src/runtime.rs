//! Orchestrator — wires the queue, worker, retry timer, watcher and trigger
//! engine together and owns their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use autoclaw_core::config::AutoClawConfig;
use autoclaw_core::error::Result;
use autoclaw_core::traits::Desktop;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::TriggerEngine;
use crate::executor::ActionExecutor;
use crate::playbook::PlaybookRegistry;
use crate::queue::{TaskQueue, task_queue};
use crate::retry::RetryScheduler;
use crate::store::StateStore;
use crate::watcher::Watcher;
use crate::worker::Worker;

/// Running engine. Dropping it drops the stop sender, which ends every loop
/// on its next wakeup; only [`Orchestrator::shutdown`] waits for them to finish.
pub struct Orchestrator {
    queue: TaskQueue,
    store: Arc<StateStore>,
    registry: Arc<PlaybookRegistry>,
    stop: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Orchestrator {
    /// Validate every playbook reference, then spawn the background loops.
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &AutoClawConfig,
        desktop: Desktop,
        store: Arc<StateStore>,
        registry: Arc<PlaybookRegistry>,
    ) -> Result<Self> {
        if config.watcher.enabled {
            registry.ensure(&config.watcher.on_increase, "watcher")?;
        }

        let (queue, receiver) = task_queue();
        let engine =
            TriggerEngine::new(&config.triggers, registry.clone(), queue.clone(), store.clone())?;
        let (retry, retries) = RetryScheduler::new(queue.clone());
        let executor = ActionExecutor::new(desktop.clone(), store.clone(), config.executor.clone());
        let worker = Worker::new(receiver, queue.clone(), executor, registry.clone(), retries);

        let (stop, stop_rx) = watch::channel(false);
        let mut handles = vec![
            ("worker", tokio::spawn(worker.run(stop_rx.clone()))),
            ("retry", tokio::spawn(retry.run(stop_rx.clone()))),
            (
                "triggers",
                tokio::spawn(engine.run(
                    Duration::from_secs(config.scheduler.tick_secs.max(1)),
                    stop_rx.clone(),
                )),
            ),
        ];

        if config.watcher.enabled {
            let watcher = Watcher::new(
                desktop,
                store.clone(),
                registry.clone(),
                queue.clone(),
                config.watcher.clone(),
            );
            handles.push(("watcher", tokio::spawn(watcher.run(stop_rx))));
        }

        tracing::info!(
            "🚀 Orchestrator running ({} playbooks, {} triggers, watcher {})",
            registry.count(),
            config.triggers.iter().filter(|t| t.enabled).count(),
            if config.watcher.enabled { "on" } else { "off" }
        );

        Ok(Self {
            queue,
            store,
            registry,
            stop,
            handles,
        })
    }

    /// Enqueue a fresh instance of playbook `name`.
    pub fn submit(&self, name: &str) -> Result<()> {
        let task = self.registry.resolve(name)?;
        tracing::info!("📨 Submitted '{}' ({})", name, task.id);
        self.queue.enqueue(task)
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Signal every loop to stop and wait for them. Queued tasks are discarded.
    pub async fn shutdown(self) {
        tracing::info!("🛑 Shutting down...");
        let _ = self.stop.send(true);
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!("⚠️ {} task ended abnormally: {e}", name);
            }
        }
        tracing::info!("🛑 Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::fast_config;
    use crate::worker::COUNTER_SUCCEEDED;
    use autoclaw_core::config::{TriggerConfig, TriggerSchedule};
    use autoclaw_core::error::AutoClawError;
    use autoclaw_core::mock::ScriptedDesktop;

    fn quiet_config() -> AutoClawConfig {
        let mut config = AutoClawConfig::default();
        config.executor = fast_config();
        config.watcher.enabled = false;
        config.triggers.clear();
        config
    }

    async fn wait_for_counter(store: &StateStore, name: &str, at_least: i64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.counter(name) < at_least {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("counter never reached");
    }

    #[tokio::test]
    async fn test_submitted_playbook_runs_to_completion() {
        let desktop = Arc::new(ScriptedDesktop::new());
        desktop.show("daily_login.png", 10, 10);
        desktop.show("collect_reward.png", 20, 20);
        let store = Arc::new(StateStore::in_memory());
        let registry = Arc::new(PlaybookRegistry::with_defaults().unwrap());

        let orchestrator = Orchestrator::start(
            &quiet_config(),
            Desktop::from_backend(desktop.clone()),
            store.clone(),
            registry,
        )
        .unwrap();
        orchestrator.submit("daily_login").unwrap();
        assert!(orchestrator.submit("nope").is_err());

        wait_for_counter(&store, COUNTER_SUCCEEDED, 1).await;
        orchestrator.shutdown().await;

        assert_eq!(desktop.clicks(), 2);
        assert_eq!(store.snapshot().history.len(), 2);
    }

    #[tokio::test]
    async fn test_interval_trigger_and_watcher_feed_worker() {
        let desktop = Arc::new(ScriptedDesktop::dry_run());
        desktop.push_text("120");
        let store = Arc::new(StateStore::in_memory());
        store.update_resource(100).unwrap();
        let registry = Arc::new(PlaybookRegistry::with_defaults().unwrap());

        let mut config = quiet_config();
        config.watcher.enabled = true;
        config.watcher.interval_ms = 10;
        config.triggers.push(TriggerConfig {
            name: "mail".into(),
            playbook: "mail_check".into(),
            schedule: TriggerSchedule::Interval(3600),
            min_interval_secs: None,
            enabled: true,
        });

        let orchestrator =
            Orchestrator::start(&config, Desktop::from_backend(desktop), store.clone(), registry)
                .unwrap();

        // mail_check from the trigger, resource_gain from the watcher.
        wait_for_counter(&store, COUNTER_SUCCEEDED, 2).await;
        orchestrator.shutdown().await;

        let state = store.snapshot();
        assert_eq!(state.resources, 120);
        assert!(state.last_run.contains_key("mail"));
    }

    #[tokio::test]
    async fn test_dropping_orchestrator_stops_worker() {
        let orchestrator = Orchestrator::start(
            &quiet_config(),
            Desktop::from_backend(Arc::new(ScriptedDesktop::new())),
            Arc::new(StateStore::in_memory()),
            Arc::new(PlaybookRegistry::with_defaults().unwrap()),
        )
        .unwrap();
        let queue = orchestrator.queue().clone();
        assert!(!queue.is_closed());

        drop(orchestrator);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !queue.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker kept running");
    }

    #[tokio::test]
    async fn test_unknown_watcher_playbook_is_fatal() {
        let mut config = quiet_config();
        config.watcher.enabled = true;
        config.watcher.on_increase = "ghost".into();

        let result = Orchestrator::start(
            &config,
            Desktop::from_backend(Arc::new(ScriptedDesktop::new())),
            Arc::new(StateStore::in_memory()),
            Arc::new(PlaybookRegistry::with_defaults().unwrap()),
        );
        assert!(matches!(result, Err(AutoClawError::Resolution(_))));
    }
}
