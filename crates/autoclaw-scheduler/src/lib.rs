//! # AutoClaw Scheduler
//!
//! Task orchestration engine for a screen-driven bot. Several producers feed
//! one FIFO queue; a single worker drains it so only one task ever drives the
//! mouse and keyboard.
//!
//! ## Architecture
//! ```text
//! TriggerEngine (tokio interval)        Watcher (OCR poll)
//!   ├── cron "0 9 * * *" → daily_login    └── counter went up → resource_gain
//!   └── every 600s → mail_check               ({{value}} / {{previous}} / {{delta}})
//!                 │                                  │
//!                 └──────────► TaskQueue ◄───────────┘
//!                                  │        ▲         ▲
//!                                  ▼        │         │
//!                               Worker ─────┘         │
//!                                  │  on_success / on_fail / spawn
//!                                  │                  │
//!                                  ├── failed + policy ──► RetryScheduler
//!                                  ▼
//!                           ActionExecutor ── cooldown gate ──► Desktop
//!                                  │
//!                                  ▼
//!                              StateStore (bot_data.json)
//! ```

pub mod cron;
pub mod engine;
pub mod executor;
pub mod playbook;
pub mod queue;
pub mod retry;
pub mod runtime;
pub mod store;
pub mod tasks;
pub mod watcher;
pub mod worker;

pub use engine::TriggerEngine;
pub use executor::{ActionExecutor, CooldownGate};
pub use playbook::PlaybookRegistry;
pub use queue::{TaskQueue, TaskReceiver, task_queue};
pub use retry::{RetryHandle, RetryScheduler};
pub use runtime::Orchestrator;
pub use store::{BotState, JsonFileBackend, MemoryBackend, StateBackend, StateStore};
pub use tasks::{ActionVerb, Continuation, RetryPolicy, Step, Task, TaskKind, TaskSpec};
pub use watcher::Watcher;
pub use worker::{TaskOutcome, Worker};
