//! Action executor — runs one step against the desktop.
//!
//! Physical gestures (click, hold, drag, type) go through a process-wide
//! [`CooldownGate`] because there is only one mouse and keyboard no matter
//! which task drives them. Image lookups get a bounded, jittered locate-retry
//! budget that is separate from any task-level retry policy.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use autoclaw_core::config::ExecutorConfig;
use autoclaw_core::error::{ActionError, AutoClawError};
use autoclaw_core::traits::Desktop;
use autoclaw_core::types::{Match, OcrMode, Point, Region};
use rand::Rng;

use crate::store::StateStore;
use crate::tasks::{ActionVerb, Step, seconds};

/// Minimum spacing between physical actions.
#[derive(Debug)]
pub struct CooldownGate {
    cooldown: Duration,
    last_action: Mutex<Option<Instant>>,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_action: Mutex::new(None),
        }
    }

    /// Time left before the next action may start.
    pub fn remaining(&self) -> Duration {
        let last = *self.last_action.lock().unwrap_or_else(|e| e.into_inner());
        match last {
            Some(at) => self.cooldown.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Wait out the remaining cooldown, if any.
    pub async fn pace(&self) {
        let wait = self.remaining();
        if !wait.is_zero() {
            tracing::trace!("⏳ Cooldown: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Stamp the end of a physical action.
    pub fn mark(&self) {
        *self.last_action.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }
}

/// Executes steps using the desktop collaborators.
pub struct ActionExecutor {
    desktop: Desktop,
    store: Arc<StateStore>,
    gate: Arc<CooldownGate>,
    config: ExecutorConfig,
}

impl ActionExecutor {
    pub fn new(desktop: Desktop, store: Arc<StateStore>, config: ExecutorConfig) -> Self {
        let gate = Arc::new(CooldownGate::new(Duration::from_millis(config.cooldown_ms)));
        Self {
            desktop,
            store,
            gate,
            config,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn gate(&self) -> &Arc<CooldownGate> {
        &self.gate
    }

    /// Run one step. A successful step appends exactly one history entry.
    pub async fn execute(&self, step: &Step) -> Result<(), ActionError> {
        let entry = match step.action {
            ActionVerb::Click => self.click(step).await?,
            ActionVerb::Hold => self.hold(step).await?,
            ActionVerb::Drag => self.drag(step).await?,
            ActionVerb::Type => self.type_text(step).await?,
            ActionVerb::Wait => {
                let secs = step.duration_secs.unwrap_or(self.config.default_duration_secs);
                tokio::time::sleep(secs_to_duration(secs)?).await;
                format!("wait {secs:.1}s")
            }
            ActionVerb::WaitFor => self.wait_for(step).await?,
            ActionVerb::Read => {
                let text = self.read_text(step.region.as_ref(), OcrMode::Block)?;
                tracing::info!("📖 OCR read: {}", text);
                format!("read '{text}'")
            }
        };

        if let Err(e) = self.store.record_history(&entry) {
            tracing::warn!("⚠️ Failed to record history '{}': {e}", entry);
        }
        Ok(())
    }

    /// OCR over `region` (or the whole display), trimmed.
    pub fn read_text(&self, region: Option<&Region>, mode: OcrMode) -> Result<String, ActionError> {
        self.desktop.read_text(region, mode).map_err(ActionError::from)
    }

    async fn click(&self, step: &Step) -> Result<String, ActionError> {
        let image = required_image(step)?;
        let found = self.locate(image, step.region.as_ref()).await?;
        self.gate.pace().await;
        self.human_move(found.point(), self.move_duration())?;
        self.desktop.input.click()?;
        self.gate.mark();
        Ok(step.describe())
    }

    async fn hold(&self, step: &Step) -> Result<String, ActionError> {
        let image = required_image(step)?;
        let found = self.locate(image, step.region.as_ref()).await?;
        let secs = step.duration_secs.unwrap_or(self.config.default_duration_secs);
        let hold = secs_to_duration(secs)?;
        self.gate.pace().await;
        self.human_move(found.point(), self.move_duration())?;
        self.desktop.input.mouse_down()?;
        tokio::time::sleep(hold).await;
        self.desktop.input.mouse_up()?;
        self.gate.mark();
        Ok(format!("{} ({secs:.1}s)", step.describe()))
    }

    async fn drag(&self, step: &Step) -> Result<String, ActionError> {
        let image = required_image(step)?;
        let target = step
            .drag_to
            .ok_or_else(|| ActionError::InvalidStep(format!("{} needs drag_to", step.describe())))?;
        let found = self.locate(image, step.region.as_ref()).await?;
        let secs = step.duration_secs.unwrap_or(self.config.default_duration_secs);
        let sweep = secs_to_duration(secs)?;
        self.gate.pace().await;
        self.human_move(found.point(), self.move_duration())?;
        self.desktop.input.mouse_down()?;
        self.human_move(target, sweep)?;
        self.desktop.input.mouse_up()?;
        self.gate.mark();
        Ok(format!("{} to ({}, {})", step.describe(), target.x, target.y))
    }

    async fn type_text(&self, step: &Step) -> Result<String, ActionError> {
        let text = step
            .text
            .as_deref()
            .ok_or_else(|| ActionError::InvalidStep(format!("{} needs text", step.describe())))?;
        let focus = match &step.image {
            Some(image) => Some(self.locate(image, step.region.as_ref()).await?),
            None => None,
        };
        self.gate.pace().await;
        if let Some(found) = focus {
            self.human_move(found.point(), self.move_duration())?;
            self.desktop.input.click()?;
        }
        self.desktop.input.type_text(text)?;
        self.gate.mark();
        Ok(format!("{} '{text}'", step.describe()))
    }

    async fn wait_for(&self, step: &Step) -> Result<String, ActionError> {
        let image = required_image(step)?;
        let timeout = step.timeout_secs.unwrap_or(self.config.default_timeout_secs);
        let deadline = Instant::now()
            .checked_add(secs_to_duration(timeout)?)
            .ok_or_else(|| ActionError::InvalidStep(format!("timeout {timeout}s is out of range")))?;
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        let mut polls = 0;
        loop {
            polls += 1;
            match self.desktop.locate(image, step.region.as_ref(), self.config.match_threshold) {
                Ok(Some(_)) => return Ok(step.describe()),
                Ok(None) => {}
                Err(AutoClawError::MissingAsset(path)) => {
                    tracing::warn!("❌ Missing image file: {}", path);
                    return Err(ActionError::NotFound {
                        image: image.to_string(),
                        attempts: polls,
                    });
                }
                Err(e) => return Err(e.into()),
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ActionError::Timeout {
                    image: image.to_string(),
                    secs: timeout,
                });
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    /// Look for `image` up to `match_retries` times with jittered pauses.
    async fn locate(&self, image: &str, region: Option<&Region>) -> Result<Match, ActionError> {
        let attempts = self.config.match_retries.max(1);
        for attempt in 1..=attempts {
            match self.desktop.locate(image, region, self.config.match_threshold) {
                Ok(Some(found)) => {
                    tracing::debug!(
                        "🎯 Found {} at ({}, {}) score {:.2} (attempt {})",
                        image,
                        found.x,
                        found.y,
                        found.score,
                        attempt
                    );
                    return Ok(found);
                }
                Ok(None) => {}
                Err(AutoClawError::MissingAsset(path)) => {
                    tracing::warn!("❌ Missing image file: {}", path);
                    return Err(ActionError::NotFound {
                        image: image.to_string(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e.into()),
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry_delay()).await;
            }
        }
        Err(ActionError::NotFound {
            image: image.to_string(),
            attempts,
        })
    }

    /// Move with a small random offset and duration variance.
    fn human_move(&self, to: Point, duration: Duration) -> Result<(), ActionError> {
        let mut rng = rand::thread_rng();
        let jitter = self.config.jitter_px.abs();
        let (dx, dy) = if jitter > 0 {
            (rng.gen_range(-jitter..=jitter), rng.gen_range(-jitter..=jitter))
        } else {
            (0, 0)
        };
        let variance_ms: i64 = rng.gen_range(-50..=50);
        let millis = (duration.as_millis() as i64 + variance_ms).max(0) as u64;
        self.desktop
            .input
            .move_to(to.x + dx, to.y + dy, Duration::from_millis(millis))?;
        Ok(())
    }

    fn move_duration(&self) -> Duration {
        Duration::from_millis(self.config.move_duration_ms)
    }

    fn retry_delay(&self) -> Duration {
        let (lo, hi) = (self.config.retry_delay_min_ms, self.config.retry_delay_max_ms);
        let ms = if hi > lo {
            rand::thread_rng().gen_range(lo..=hi)
        } else {
            lo
        };
        Duration::from_millis(ms)
    }
}

fn required_image(step: &Step) -> Result<&str, ActionError> {
    step.image
        .as_deref()
        .ok_or_else(|| ActionError::InvalidStep(format!("{} needs an image", step.action)))
}

fn secs_to_duration(secs: f64) -> Result<Duration, ActionError> {
    seconds(secs).ok_or_else(|| ActionError::InvalidStep(format!("{secs}s is out of range")))
}
