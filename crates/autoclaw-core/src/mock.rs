//! Scripted in-process desktop.
//!
//! Implements every collaborator trait without touching the OS. Tests script
//! which images are visible and what OCR reads; the binary uses
//! [`ScriptedDesktop::dry_run`] to exercise playbooks without a real backend.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{AutoClawError, Result};
use crate::traits::{InputInjector, ScreenCapture, TemplateMatcher, TextRecognizer};
use crate::types::{Bitmap, Match, OcrMode, Point, Region};

/// A synthetic input event recorded by the scripted desktop.
#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    MoveTo { x: i32, y: i32 },
    Click,
    MouseDown,
    MouseUp,
    Type(String),
}

#[derive(Debug, Clone)]
struct ImageScript {
    at: Point,
    /// Locate calls that still report "not visible" before the image shows up.
    hidden_polls: u32,
}

#[derive(Debug, Default)]
struct Script {
    images: HashMap<String, ImageScript>,
    missing: HashSet<String>,
    texts: VecDeque<String>,
    last_text: String,
    locate_calls: HashMap<String, u32>,
    gestures: Vec<Gesture>,
    find_everything: Option<Point>,
}

/// Scripted desktop backend.
#[derive(Debug, Default)]
pub struct ScriptedDesktop {
    script: Mutex<Script>,
}

impl ScriptedDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every image is "found" at the center of a 1920x1080 display and OCR
    /// reads an empty string. Gestures are logged instead of performed and
    /// nothing is kept, so a long-running dry run holds no history.
    pub fn dry_run() -> Self {
        let desktop = Self::new();
        desktop.script().find_everything = Some(Point::new(960, 540));
        desktop
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `image` visible at `(x, y)`.
    pub fn show(&self, image: &str, x: i32, y: i32) {
        self.show_after(image, x, y, 0);
    }

    /// Make `image` visible at `(x, y)` after `polls` unsuccessful locate calls.
    pub fn show_after(&self, image: &str, x: i32, y: i32, polls: u32) {
        self.script().images.insert(
            image.to_string(),
            ImageScript {
                at: Point::new(x, y),
                hidden_polls: polls,
            },
        );
    }

    pub fn hide(&self, image: &str) {
        self.script().images.remove(image);
    }

    /// Report `image` as a missing asset file.
    pub fn mark_missing(&self, image: &str) {
        self.script().missing.insert(image.to_string());
    }

    /// Queue the next OCR reading. The last reading repeats once the queue is empty.
    pub fn push_text(&self, text: &str) {
        self.script().texts.push_back(text.to_string());
    }

    pub fn gestures(&self) -> Vec<Gesture> {
        self.script().gestures.clone()
    }

    pub fn clicks(&self) -> usize {
        self.script()
            .gestures
            .iter()
            .filter(|g| matches!(g, Gesture::Click))
            .count()
    }

    /// How many times `image` was looked for.
    pub fn locate_calls(&self, image: &str) -> u32 {
        self.script().locate_calls.get(image).copied().unwrap_or(0)
    }

    fn record(&self, gesture: Gesture) {
        let mut script = self.script();
        if script.find_everything.is_some() {
            tracing::info!("🖱️ [dry-run] {:?}", gesture);
            return;
        }
        script.gestures.push(gesture);
    }
}

impl ScreenCapture for ScriptedDesktop {
    fn capture(&self, region: Option<&Region>) -> Result<Bitmap> {
        let (width, height) = region.map(|r| (r.width, r.height)).unwrap_or((1920, 1080));
        Ok(Bitmap {
            width,
            height,
            data: Vec::new(),
            region: region.copied(),
        })
    }
}

impl TemplateMatcher for ScriptedDesktop {
    fn locate(&self, _bitmap: &Bitmap, image: &str, _threshold: f32) -> Result<Option<Match>> {
        let mut script = self.script();
        if script.missing.contains(image) {
            *script.locate_calls.entry(image.to_string()).or_insert(0) += 1;
            return Err(AutoClawError::MissingAsset(image.to_string()));
        }
        if let Some(at) = script.find_everything {
            tracing::debug!("🔍 [dry-run] {} found", image);
            return Ok(Some(Match {
                x: at.x,
                y: at.y,
                score: 1.0,
            }));
        }

        *script.locate_calls.entry(image.to_string()).or_insert(0) += 1;
        match script.images.get_mut(image) {
            Some(entry) if entry.hidden_polls > 0 => {
                entry.hidden_polls -= 1;
                Ok(None)
            }
            Some(entry) => Ok(Some(Match {
                x: entry.at.x,
                y: entry.at.y,
                score: 0.95,
            })),
            None => Ok(None),
        }
    }
}

impl TextRecognizer for ScriptedDesktop {
    fn recognize(&self, _bitmap: &Bitmap, _mode: OcrMode) -> Result<String> {
        let mut script = self.script();
        if let Some(text) = script.texts.pop_front() {
            script.last_text = text;
        }
        Ok(script.last_text.clone())
    }
}

impl InputInjector for ScriptedDesktop {
    fn move_to(&self, x: i32, y: i32, _duration: Duration) -> Result<()> {
        self.record(Gesture::MoveTo { x, y });
        Ok(())
    }

    fn click(&self) -> Result<()> {
        self.record(Gesture::Click);
        Ok(())
    }

    fn mouse_down(&self) -> Result<()> {
        self.record(Gesture::MouseDown);
        Ok(())
    }

    fn mouse_up(&self) -> Result<()> {
        self.record(Gesture::MouseUp);
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<()> {
        self.record(Gesture::Type(text.to_string()));
        Ok(())
    }
}
