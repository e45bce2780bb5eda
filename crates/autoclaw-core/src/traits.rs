//! Desktop collaborator traits.
//!
//! The engine never talks to the OS directly. Capture, template matching,
//! OCR and synthetic input are provided by implementations of these traits,
//! bundled into a [`Desktop`]. Calls are synchronous; the executor paces them.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::types::{Bitmap, Match, OcrMode, Region};

/// Screen capture provider.
pub trait ScreenCapture: Send + Sync {
    /// Grab `region`, or the whole primary display when `None`.
    fn capture(&self, region: Option<&Region>) -> Result<Bitmap>;
}

/// Template matcher.
pub trait TemplateMatcher: Send + Sync {
    /// Best match of `image` inside `bitmap` scoring at least `threshold`.
    /// A reference image that cannot be loaded is `Err(MissingAsset)`.
    fn locate(&self, bitmap: &Bitmap, image: &str, threshold: f32) -> Result<Option<Match>>;
}

/// Text recognizer.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, bitmap: &Bitmap, mode: OcrMode) -> Result<String>;
}

/// Synthetic input device. There is exactly one per process.
pub trait InputInjector: Send + Sync {
    fn move_to(&self, x: i32, y: i32, duration: Duration) -> Result<()>;
    fn click(&self) -> Result<()>;
    fn mouse_down(&self) -> Result<()>;
    fn mouse_up(&self) -> Result<()>;
    fn type_text(&self, text: &str) -> Result<()>;
}

/// The set of collaborators the action executor drives.
#[derive(Clone)]
pub struct Desktop {
    pub screen: Arc<dyn ScreenCapture>,
    pub matcher: Arc<dyn TemplateMatcher>,
    pub ocr: Arc<dyn TextRecognizer>,
    pub input: Arc<dyn InputInjector>,
}

impl Desktop {
    pub fn new(
        screen: Arc<dyn ScreenCapture>,
        matcher: Arc<dyn TemplateMatcher>,
        ocr: Arc<dyn TextRecognizer>,
        input: Arc<dyn InputInjector>,
    ) -> Self {
        Self {
            screen,
            matcher,
            ocr,
            input,
        }
    }

    /// Build a desktop from a single backend implementing every trait.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ScreenCapture + TemplateMatcher + TextRecognizer + InputInjector + 'static,
    {
        Self {
            screen: backend.clone(),
            matcher: backend.clone(),
            ocr: backend.clone(),
            input: backend,
        }
    }

    /// Capture `region` and run OCR over it, trimming surrounding whitespace.
    pub fn read_text(&self, region: Option<&Region>, mode: OcrMode) -> Result<String> {
        let bitmap = self.screen.capture(region)?;
        let text = self.ocr.recognize(&bitmap, mode)?;
        Ok(text.trim().to_string())
    }

    /// Capture `region` (or the display) and look for `image` once.
    pub fn locate(
        &self,
        image: &str,
        region: Option<&Region>,
        threshold: f32,
    ) -> Result<Option<Match>> {
        let bitmap = self.screen.capture(region)?;
        self.matcher.locate(&bitmap, image, threshold)
    }
}

impl std::fmt::Debug for Desktop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Desktop").finish_non_exhaustive()
    }
}
