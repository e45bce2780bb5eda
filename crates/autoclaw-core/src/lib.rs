//! # AutoClaw Core
//!
//! Shared building blocks for the AutoClaw task orchestration engine:
//! configuration, the error taxonomy, geometry types and the desktop
//! collaborator traits (screen capture, template matching, OCR, input).
//!
//! Concrete capture/OCR/input backends live outside this workspace and plug
//! in through [`traits::Desktop`]. [`mock::ScriptedDesktop`] implements every
//! trait in-process for tests and dry runs.

pub mod config;
pub mod error;
pub mod mock;
pub mod traits;
pub mod types;

pub use config::AutoClawConfig;
pub use error::{ActionError, AutoClawError, Result};
pub use traits::{Desktop, InputInjector, ScreenCapture, TemplateMatcher, TextRecognizer};
pub use types::{Bitmap, Match, OcrMode, Point, Region};
