//! Trigger engine — the loop that checks triggers and enqueues their playbooks.
//! Uses tokio::interval for ticking (sleeps between checks).
//!
//! A firing only enqueues a fresh task; the worker executes it. `lastRun` is
//! persisted per trigger after a successful enqueue and drives the
//! `min_interval_secs` guard across restarts.

use std::sync::Arc;
use std::time::Duration;

use autoclaw_core::config::{TriggerConfig, TriggerSchedule};
use autoclaw_core::error::{AutoClawError, Result};
use chrono::{DateTime, Local, Utc};
use tokio::sync::watch;

use crate::cron::CronSchedule;
use crate::playbook::PlaybookRegistry;
use crate::queue::TaskQueue;
use crate::store::StateStore;

#[derive(Debug)]
struct Trigger {
    config: TriggerConfig,
    cron: Option<CronSchedule>,
    next_run: Option<DateTime<Utc>>,
}

impl Trigger {
    fn compute_next(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.config.schedule {
            TriggerSchedule::Interval(secs) => now.checked_add_signed(span(*secs)?),
            TriggerSchedule::Cron(_) => self
                .cron
                .as_ref()?
                .next_after(&now.with_timezone(&Local))
                .map(|at| at.with_timezone(&Utc)),
            TriggerSchedule::Once(_) => None,
        }
    }
}

fn span(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

/// Time-based producer of playbook tasks.
pub struct TriggerEngine {
    triggers: Vec<Trigger>,
    registry: Arc<PlaybookRegistry>,
    queue: TaskQueue,
    store: Arc<StateStore>,
}

impl TriggerEngine {
    pub fn new(
        configs: &[TriggerConfig],
        registry: Arc<PlaybookRegistry>,
        queue: TaskQueue,
        store: Arc<StateStore>,
    ) -> Result<Self> {
        Self::starting_at(configs, registry, queue, store, Utc::now())
    }

    /// Build the engine as if started at `now`. Fails on unknown playbooks
    /// and malformed cron expressions.
    pub fn starting_at(
        configs: &[TriggerConfig],
        registry: Arc<PlaybookRegistry>,
        queue: TaskQueue,
        store: Arc<StateStore>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut triggers = Vec::new();
        for config in configs.iter().filter(|c| c.enabled) {
            registry.ensure(&config.playbook, &format!("trigger '{}'", config.name))?;

            let cron = match &config.schedule {
                TriggerSchedule::Cron(expr) => Some(CronSchedule::parse(expr).ok_or_else(|| {
                    AutoClawError::Config(format!(
                        "trigger '{}' has an invalid cron expression '{expr}'",
                        config.name
                    ))
                })?),
                _ => None,
            };

            let mut trigger = Trigger {
                config: config.clone(),
                cron,
                next_run: None,
            };
            trigger.next_run = match &config.schedule {
                // Interval triggers are due immediately; the guard decides.
                TriggerSchedule::Interval(_) => Some(now),
                TriggerSchedule::Once(at) => {
                    if store.last_run(&config.name).is_some_and(|last| last >= *at) {
                        None
                    } else {
                        Some(*at)
                    }
                }
                TriggerSchedule::Cron(_) => trigger.compute_next(now),
            };

            tracing::info!(
                "⏰ Trigger '{}' → '{}' ({}), next: {}",
                config.name,
                config.playbook,
                config.schedule,
                trigger
                    .next_run
                    .map(|t| t.with_timezone(&Local).to_rfc3339())
                    .unwrap_or_else(|| "never".into())
            );
            triggers.push(trigger);
        }

        Ok(Self {
            triggers,
            registry,
            queue,
            store,
        })
    }

    /// Fire every due trigger. Returns the names of the triggers that enqueued.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut fired = Vec::new();

        for trigger in self.triggers.iter_mut() {
            let Some(due) = trigger.next_run else {
                continue;
            };
            if now < due {
                continue;
            }
            let name = trigger.config.name.clone();

            // A minimum too large to represent never elapses.
            let guarded = trigger.config.min_interval_secs.is_some_and(|min| {
                self.store
                    .last_run(&name)
                    .is_some_and(|last| span(min).is_none_or(|min| now - last < min))
            });

            if guarded {
                tracing::debug!("⏭️ Trigger '{}' skipped (min interval not elapsed)", name);
            } else {
                match self.registry.resolve(&trigger.config.playbook) {
                    Ok(task) => match self.queue.enqueue(task) {
                        Ok(()) => {
                            tracing::info!("🔔 Trigger fired: '{}'", name);
                            if let Err(e) = self.store.set_last_run(&name, now) {
                                tracing::warn!("⚠️ Failed to save lastRun for '{}': {e}", name);
                            }
                            fired.push(name.clone());
                        }
                        Err(e) => tracing::warn!("⚠️ Trigger '{}' could not enqueue: {e}", name),
                    },
                    Err(e) => tracing::error!("❌ Trigger '{}': {e}", name),
                }
            }

            trigger.next_run = trigger.compute_next(now);
            if trigger.next_run.is_none() {
                tracing::debug!("Trigger '{}' has no further runs", name);
            }
        }

        fired
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// Next scheduled firing of trigger `name`.
    pub fn next_run(&self, name: &str) -> Option<DateTime<Utc>> {
        self.triggers
            .iter()
            .find(|t| t.config.name == name)
            .and_then(|t| t.next_run)
    }

    /// Tick every `check_interval` until `shutdown` flips to true.
    pub async fn run(mut self, check_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "⏰ Trigger engine started ({} triggers, check every {:?})",
            self.triggers.len(),
            check_interval
        );
        let mut interval = tokio::time::interval(check_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            self.tick(Utc::now());
        }
        tracing::info!("⏰ Trigger engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{TaskReceiver, task_queue};
    use chrono::TimeZone;

    fn trigger(name: &str, playbook: &str, schedule: TriggerSchedule) -> TriggerConfig {
        TriggerConfig {
            name: name.into(),
            playbook: playbook.into(),
            schedule,
            min_interval_secs: None,
            enabled: true,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn engine(configs: &[TriggerConfig]) -> (TriggerEngine, TaskReceiver, Arc<StateStore>) {
        let store = Arc::new(StateStore::in_memory());
        let (queue, rx) = task_queue();
        let registry = Arc::new(PlaybookRegistry::with_defaults().unwrap());
        let engine =
            TriggerEngine::starting_at(configs, registry, queue, store.clone(), t0()).unwrap();
        (engine, rx, store)
    }

    #[test]
    fn test_interval_fires_then_waits() {
        let (mut engine, mut rx, store) =
            engine(&[trigger("mail", "mail_check", TriggerSchedule::Interval(600))]);

        assert_eq!(engine.tick(t0()), vec!["mail"]);
        assert_eq!(rx.try_dequeue().unwrap().name(), "mail_check");
        assert_eq!(store.last_run("mail"), Some(t0()));

        assert!(engine.tick(t0() + chrono::Duration::seconds(599)).is_empty());
        assert_eq!(engine.tick(t0() + chrono::Duration::seconds(600)), vec!["mail"]);
        assert!(rx.try_dequeue().is_some());
        assert!(rx.try_dequeue().is_none());
    }

    #[test]
    fn test_huge_intervals_do_not_overflow() {
        let mut guarded = trigger("gift", "mail_check", TriggerSchedule::Interval(600));
        guarded.min_interval_secs = Some(u64::MAX);
        let (mut engine, mut rx, store) = engine(&[
            trigger("mail", "mail_check", TriggerSchedule::Interval(u64::MAX)),
            trigger("rare", "mail_check", TriggerSchedule::Interval(i64::MAX as u64)),
            guarded,
        ]);
        store.set_last_run("gift", t0() - chrono::Duration::days(3650)).unwrap();

        assert_eq!(engine.tick(t0()), vec!["mail", "rare"]);
        assert_eq!(engine.next_run("mail"), None);
        assert_eq!(engine.next_run("rare"), None);
        assert_eq!(engine.next_run("gift"), Some(t0() + chrono::Duration::seconds(600)));
        assert!(engine.tick(t0() + chrono::Duration::days(365)).is_empty());
        assert_eq!(std::iter::from_fn(|| rx.try_dequeue()).count(), 2);
    }

    #[test]
    fn test_min_interval_guard_uses_persisted_last_run() {
        let mut config = trigger("mail", "mail_check", TriggerSchedule::Interval(600));
        config.min_interval_secs = Some(7200);
        let (mut engine, mut rx, store) = engine(&[config]);
        store
            .set_last_run("mail", t0() - chrono::Duration::hours(1))
            .unwrap();

        assert!(engine.tick(t0()).is_empty());
        assert!(rx.try_dequeue().is_none());

        for k in 1..6 {
            assert!(engine.tick(t0() + chrono::Duration::seconds(600 * k)).is_empty());
        }
        // Two hours after the persisted run the guard lets it through.
        let later = t0() + chrono::Duration::hours(1);
        assert_eq!(engine.tick(later), vec!["mail"]);
        assert_eq!(store.last_run("mail"), Some(later));
    }

    #[test]
    fn test_cron_trigger_fires_at_next_run() {
        let (mut engine, mut rx, _) =
            engine(&[trigger("login", "daily_login", TriggerSchedule::Cron("0 9 * * *".into()))]);

        let due = engine.next_run("login").unwrap();
        assert!(due > t0());
        assert!(engine.tick(due - chrono::Duration::seconds(1)).is_empty());
        assert_eq!(engine.tick(due), vec!["login"]);
        assert_eq!(rx.try_dequeue().unwrap().name(), "daily_login");

        let next = engine.next_run("login").unwrap();
        assert_eq!(next - due, chrono::Duration::days(1));
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let at = t0() + chrono::Duration::minutes(5);
        let (mut engine, mut rx, _) =
            engine(&[trigger("promo", "mail_check", TriggerSchedule::Once(at))]);

        assert!(engine.tick(t0()).is_empty());
        assert_eq!(engine.tick(at), vec!["promo"]);
        assert!(engine.tick(at + chrono::Duration::days(1)).is_empty());
        assert!(rx.try_dequeue().is_some());
        assert!(rx.try_dequeue().is_none());
        assert_eq!(engine.next_run("promo"), None);
    }

    #[test]
    fn test_failed_enqueue_keeps_last_run() {
        let (mut engine, rx, store) =
            engine(&[trigger("mail", "mail_check", TriggerSchedule::Interval(60))]);
        drop(rx);

        assert!(engine.tick(t0()).is_empty());
        assert_eq!(store.last_run("mail"), None);
    }

    #[test]
    fn test_unknown_playbook_and_bad_cron_rejected() {
        let store = Arc::new(StateStore::in_memory());
        let (queue, _rx) = task_queue();
        let registry = Arc::new(PlaybookRegistry::with_defaults().unwrap());

        let unknown = [trigger("x", "ghost", TriggerSchedule::Interval(60))];
        assert!(matches!(
            TriggerEngine::new(&unknown, registry.clone(), queue.clone(), store.clone()),
            Err(AutoClawError::Resolution(_))
        ));

        let bad_cron = [trigger("y", "mail_check", TriggerSchedule::Cron("99 * * * *".into()))];
        assert!(matches!(
            TriggerEngine::new(&bad_cron, registry, queue, store),
            Err(AutoClawError::Config(_))
        ));
    }

    #[test]
    fn test_disabled_triggers_are_skipped() {
        let mut config = trigger("off", "mail_check", TriggerSchedule::Interval(60));
        config.enabled = false;
        let (mut engine, _rx, _) = engine(&[config]);
        assert_eq!(engine.trigger_count(), 0);
        assert!(engine.tick(t0()).is_empty());
    }
}
