//! State store — counters, history, player ledgers and last-run stamps.
//! Persisted as one JSON file, human-readable, written through on every mutation.
//!
//! All access goes through [`StateStore`] operations. Each one runs under a
//! single lock, applies the change to a copy, flushes the copy to the backend
//! and only then commits it, so memory is never ahead of disk once the call
//! returns.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use autoclaw_core::error::{AutoClawError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tasks::{Direction, Transaction};

/// History ring buffer size.
pub const HISTORY_CAP: usize = 1000;

/// One audit log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub time: DateTime<Utc>,
    pub action: String,
}

/// Accumulated amounts exchanged with one player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerLedger {
    #[serde(default)]
    pub sent: BTreeMap<String, i64>,
    #[serde(default)]
    pub taken: BTreeMap<String, i64>,
}

/// The persisted state blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    /// Last observed resource reading.
    #[serde(default)]
    pub resources: i64,
    #[serde(default)]
    pub history: VecDeque<HistoryEntry>,
    #[serde(default)]
    pub players: BTreeMap<String, PlayerLedger>,
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
    #[serde(default, rename = "lastRun")]
    pub last_run: BTreeMap<String, DateTime<Utc>>,
}

impl BotState {
    fn push_history(&mut self, action: &str) {
        self.history.push_back(HistoryEntry {
            time: Utc::now(),
            action: action.to_string(),
        });
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }
    }
}

/// Durable storage for the state blob.
pub trait StateBackend: Send {
    /// `None` when nothing has been saved yet.
    fn load(&self) -> Result<Option<BotState>>;
    /// Replace the stored blob as a whole.
    fn save(&self, state: &BotState) -> Result<()>;
    fn describe(&self) -> String;
}

/// JSON file backend with atomic replace (write temp file, then rename).
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<BotState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path)
            .map_err(|e| AutoClawError::Store(format!("Read {}: {e}", self.path.display())))?;
        let state = serde_json::from_str(&json)
            .map_err(|e| AutoClawError::Store(format!("Parse {}: {e}", self.path.display())))?;
        Ok(Some(state))
    }

    fn save(&self, state: &BotState) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| AutoClawError::Store(format!("Write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| AutoClawError::Store(format!("Replace {}: {e}", self.path.display())))?;
        tracing::trace!("💾 Saved state to {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory backend. Clones share the stored blob, so tests can inspect
/// what was flushed.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    saved: Arc<Mutex<Option<BotState>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: BotState) -> Self {
        let backend = Self::new();
        *backend.slot() = Some(state);
        backend
    }

    fn slot(&self) -> MutexGuard<'_, Option<BotState>> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Last flushed blob.
    pub fn saved(&self) -> Option<BotState> {
        self.slot().clone()
    }

    /// Number of flushes so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl StateBackend for MemoryBackend {
    fn load(&self) -> Result<Option<BotState>> {
        Ok(self.saved())
    }

    fn save(&self, state: &BotState) -> Result<()> {
        *self.slot() = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

struct Inner {
    state: BotState,
    backend: Box<dyn StateBackend>,
}

/// Process-wide state monitor.
pub struct StateStore {
    inner: Mutex<Inner>,
}

impl StateStore {
    /// Load state from `backend`, or start from the default blob when it is empty.
    pub fn open(backend: Box<dyn StateBackend>) -> Result<Self> {
        let mut state = backend.load()?.unwrap_or_default();
        while state.history.len() > HISTORY_CAP {
            state.history.pop_front();
        }
        tracing::info!(
            "📂 State loaded from {} (resources: {}, history: {})",
            backend.describe(),
            state.resources,
            state.history.len()
        );
        Ok(Self {
            inner: Mutex::new(Inner { state, backend }),
        })
    }

    /// Open a JSON file store.
    pub fn open_file(path: &Path) -> Result<Self> {
        Self::open(Box::new(JsonFileBackend::new(path)))
    }

    /// Fresh store that only lives in memory.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BotState::default(),
                backend: Box::new(MemoryBackend::new()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f` to a copy, flush it, then commit. A failed flush leaves the
    /// in-memory state untouched.
    fn mutate<R>(&self, f: impl FnOnce(&mut BotState) -> R) -> Result<R> {
        let mut inner = self.lock();
        let mut next = inner.state.clone();
        let out = f(&mut next);
        inner.backend.save(&next)?;
        inner.state = next;
        Ok(out)
    }

    /// Append an audit log entry.
    pub fn record_history(&self, action: &str) -> Result<()> {
        self.mutate(|s| s.push_history(action))
    }

    /// Store a new resource reading. Returns the previous one.
    pub fn update_resource(&self, value: i64) -> Result<i64> {
        self.mutate(|s| std::mem::replace(&mut s.resources, value))
    }

    pub fn resources(&self) -> i64 {
        self.lock().state.resources
    }

    /// Accumulate a ledger transaction and log it. Totals saturate at `i64::MAX`.
    pub fn record_transaction(&self, tx: &Transaction) -> Result<()> {
        if tx.amount <= 0 {
            return Err(AutoClawError::Store(format!(
                "transaction amount must be positive, got {} {}",
                tx.amount, tx.resource
            )));
        }
        self.mutate(|s| {
            let ledger = s.players.entry(tx.player.clone()).or_default();
            let book = match tx.direction {
                Direction::Sent => &mut ledger.sent,
                Direction::Taken => &mut ledger.taken,
            };
            let total = book.entry(tx.resource.clone()).or_insert(0);
            *total = total.saturating_add(tx.amount);
            let verb = match tx.direction {
                Direction::Sent => "sent to",
                Direction::Taken => "taken from",
            };
            s.push_history(&format!(
                "{} {} {} {}",
                tx.amount, tx.resource, verb, tx.player
            ));
        })
    }

    /// Bump a named counter. Returns the new value.
    pub fn increment_counter(&self, name: &str) -> Result<i64> {
        self.mutate(|s| {
            let counter = s.counters.entry(name.to_string()).or_insert(0);
            *counter += 1;
            *counter
        })
    }

    pub fn counter(&self, name: &str) -> i64 {
        self.lock().state.counters.get(name).copied().unwrap_or(0)
    }

    pub fn last_run(&self, name: &str) -> Option<DateTime<Utc>> {
        self.lock().state.last_run.get(name).copied()
    }

    pub fn set_last_run(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        self.mutate(|s| {
            s.last_run.insert(name.to_string(), at);
        })
    }

    /// Copy of the whole state.
    pub fn snapshot(&self) -> BotState {
        self.lock().state.clone()
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("StateStore")
            .field("backend", &inner.backend.describe())
            .field("resources", &inner.state.resources)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open_file(&dir.path().join("bot_data.json")).unwrap();
        assert_eq!(store.snapshot(), BotState::default());
    }

    #[test]
    fn test_write_through_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bot_data.json");
        {
            let store = StateStore::open_file(&path).unwrap();
            store.update_resource(120).unwrap();
            store.record_history("click on daily_login.png").unwrap();
            store.increment_counter("tasks_succeeded").unwrap();
        }
        let reopened = StateStore::open_file(&path).unwrap();
        let state = reopened.snapshot();
        assert_eq!(state.resources, 120);
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].action, "click on daily_login.png");
        assert_eq!(state.counters["tasks_succeeded"], 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_persisted_layout_keys() {
        let backend = MemoryBackend::new();
        let store = StateStore::open(Box::new(backend.clone())).unwrap();
        store.set_last_run("mail_check", Utc::now()).unwrap();
        let json = serde_json::to_value(backend.saved().unwrap()).unwrap();
        for key in ["resources", "history", "players", "counters", "lastRun"] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
    }

    #[test]
    fn test_loads_legacy_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot_data.json");
        std::fs::write(
            &path,
            r#"{"resources": 42, "history": [{"time": "2026-02-22T09:00:00Z", "action": "click on daily_login.png"}]}"#,
        )
        .unwrap();
        let store = StateStore::open_file(&path).unwrap();
        assert_eq!(store.resources(), 42);
        assert_eq!(store.snapshot().history.len(), 1);
    }

    #[test]
    fn test_corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot_data.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            StateStore::open_file(&path),
            Err(AutoClawError::Store(_))
        ));
    }

    #[test]
    fn test_history_is_capped_fifo() {
        let store = StateStore::in_memory();
        for i in 0..(HISTORY_CAP + 25) {
            store.record_history(&format!("step {i}")).unwrap();
        }
        let history = store.snapshot().history;
        assert_eq!(history.len(), HISTORY_CAP);
        assert_eq!(history.front().unwrap().action, "step 25");
        assert_eq!(
            history.back().unwrap().action,
            format!("step {}", HISTORY_CAP + 24)
        );
    }

    #[test]
    fn test_every_mutation_flushes() {
        let backend = MemoryBackend::new();
        let store = StateStore::open(Box::new(backend.clone())).unwrap();
        store.record_history("a").unwrap();
        store.update_resource(5).unwrap();
        store.increment_counter("c").unwrap();
        assert_eq!(backend.save_count(), 3);
        assert_eq!(backend.saved().unwrap(), store.snapshot());
    }

    #[test]
    fn test_transactions_accumulate() {
        let store = StateStore::in_memory();
        let gift = Transaction {
            player: "p-17".into(),
            direction: Direction::Sent,
            resource: "gold".into(),
            amount: 50,
        };
        store.record_transaction(&gift).unwrap();
        store.record_transaction(&gift).unwrap();
        store
            .record_transaction(&Transaction {
                direction: Direction::Taken,
                amount: 10,
                ..gift.clone()
            })
            .unwrap();

        let state = store.snapshot();
        assert_eq!(state.players["p-17"].sent["gold"], 100);
        assert_eq!(state.players["p-17"].taken["gold"], 10);
        assert_eq!(state.history.len(), 3);
    }

    #[test]
    fn test_transaction_amounts_are_checked() {
        let store = StateStore::in_memory();
        let whale = Transaction {
            player: "p-9".into(),
            direction: Direction::Taken,
            resource: "gems".into(),
            amount: i64::MAX,
        };
        store.record_transaction(&whale).unwrap();
        store.record_transaction(&whale).unwrap();
        assert_eq!(store.snapshot().players["p-9"].taken["gems"], i64::MAX);

        let before = store.snapshot();
        for amount in [0, -5, i64::MIN] {
            let err = store
                .record_transaction(&Transaction {
                    amount,
                    ..whale.clone()
                })
                .unwrap_err();
            assert!(matches!(err, AutoClawError::Store(_)));
        }
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_update_resource_returns_previous() {
        let store = StateStore::open(Box::new(MemoryBackend::with_state(BotState {
            resources: 100,
            ..BotState::default()
        })))
        .unwrap();
        assert_eq!(store.update_resource(150).unwrap(), 100);
        assert_eq!(store.resources(), 150);
    }

    struct FailingBackend;

    impl StateBackend for FailingBackend {
        fn load(&self) -> Result<Option<BotState>> {
            Ok(None)
        }
        fn save(&self, _state: &BotState) -> Result<()> {
            Err(AutoClawError::Store("disk full".into()))
        }
        fn describe(&self) -> String {
            "failing".into()
        }
    }

    #[test]
    fn test_failed_flush_does_not_commit() {
        let store = StateStore::open(Box::new(FailingBackend)).unwrap();
        assert!(store.update_resource(7).is_err());
        assert_eq!(store.resources(), 0);
        assert!(store.snapshot().history.is_empty());
    }
}
