//! Task definitions — the core data model for queued work.
//!
//! A [`TaskSpec`] is an immutable template: what a playbook file or a trigger
//! describes. A [`Task`] is one runnable instance of a spec, carrying its own
//! id and retry attempt counter. Templates never carry attempt state, so two
//! tasks built from the same spec can never observe each other's retries.

use std::time::Duration;

use autoclaw_core::types::{Point, Region};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a step does once its image (if any) is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionVerb {
    #[default]
    Click,
    Hold,
    #[serde(alias = "swipe")]
    Drag,
    Type,
    Wait,
    WaitFor,
    Read,
}

impl std::fmt::Display for ActionVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Click => "click",
            Self::Hold => "hold",
            Self::Drag => "drag",
            Self::Type => "type",
            Self::Wait => "wait",
            Self::WaitFor => "wait_for",
            Self::Read => "read",
        };
        f.write_str(s)
    }
}

/// One interaction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Step {
    /// Reference image to locate before acting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub action: ActionVerb,
    /// hold/wait/drag duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drag_to: Option<Point>,
    /// Payload for type steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
    /// Restrict capture (locate) or OCR (read) to this region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
}

impl Step {
    pub fn new(action: ActionVerb) -> Self {
        Self {
            action,
            ..Self::default()
        }
    }

    /// Locate `image` and click it.
    pub fn click(image: &str) -> Self {
        Self::new(ActionVerb::Click).with_image(image)
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.image = Some(image.to_string());
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_drag_to(mut self, x: i32, y: i32) -> Self {
        self.drag_to = Some(Point::new(x, y));
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    /// Reject non-finite or out-of-range durations.
    pub fn check_limits(&self) -> Result<(), String> {
        check_secs("duration_secs", self.duration_secs)?;
        check_secs("timeout_secs", self.timeout_secs)
    }

    /// Short human-readable form used in history entries and logs.
    pub fn describe(&self) -> String {
        match &self.image {
            Some(image) => format!("{} on {}", self.action, image),
            None => self.action.to_string(),
        }
    }
}

/// Per-kind payload of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// Fixed sequence of steps.
    Routine { steps: Vec<Step> },
    /// Same as routine; fired by interval triggers with a min-interval guard.
    SemiRoutine { steps: Vec<Step> },
    /// Read text in `region` and branch on whether it equals `expected`.
    UserInput {
        region: Region,
        expected: String,
        on_match: Step,
        on_mismatch: Step,
    },
    /// Wait until `image` shows up.
    WaitFor {
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<Region>,
    },
    /// Enqueue every child independently; no join.
    Spawn { tasks: Vec<TaskSpec> },
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Routine { .. } => "routine",
            Self::SemiRoutine { .. } => "semi_routine",
            Self::UserInput { .. } => "user_input",
            Self::WaitFor { .. } => "wait_for",
            Self::Spawn { .. } => "spawn",
        }
    }
}

/// Task-level retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_attempts: u32,
    pub cooldown_secs: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, cooldown_secs: f64) -> Self {
        Self {
            max_attempts,
            cooldown_secs,
        }
    }

    /// `None` when `cooldown_secs` is not a representable duration.
    pub fn cooldown(&self) -> Option<Duration> {
        seconds(self.cooldown_secs)
    }
}

/// Upper bound for every seconds field in a playbook (one week).
pub const MAX_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Convert a seconds field to a [`Duration`]. Negative values clamp to zero;
/// non-finite or values past [`MAX_SECS`] yield `None`.
pub fn seconds(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs > MAX_SECS {
        return None;
    }
    Duration::try_from_secs_f64(secs.max(0.0)).ok()
}

fn check_secs(field: &str, value: Option<f64>) -> Result<(), String> {
    match value {
        Some(secs) if seconds(secs).is_none() => Err(format!(
            "{field} = {secs} is out of range (0..={MAX_SECS})"
        )),
        _ => Ok(()),
    }
}

/// Work to enqueue after a task completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Continuation {
    /// `{ ref = "playbook_name" }`
    Reference {
        #[serde(rename = "ref")]
        name: String,
    },
    Inline(Box<TaskSpec>),
}

impl Continuation {
    pub fn reference(name: &str) -> Self {
        Self::Reference {
            name: name.to_string(),
        }
    }

    pub fn inline(spec: TaskSpec) -> Self {
        Self::Inline(Box::new(spec))
    }
}

/// Direction of a ledger transaction, from the bot's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Taken,
}

/// Resource exchange recorded in the per-player ledger when a task succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub player: String,
    pub direction: Direction,
    pub resource: String,
    pub amount: i64,
}

/// Immutable task template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: TaskKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<Continuation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_fail: Option<Continuation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Transaction>,
}

impl TaskSpec {
    pub fn new(name: &str, kind: TaskKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            retry: None,
            on_success: None,
            on_fail: None,
            record: None,
        }
    }

    pub fn routine(name: &str, steps: Vec<Step>) -> Self {
        Self::new(name, TaskKind::Routine { steps })
    }

    pub fn with_retry(mut self, max_attempts: u32, cooldown_secs: f64) -> Self {
        self.retry = Some(RetryPolicy::new(max_attempts, cooldown_secs));
        self
    }

    pub fn on_success(mut self, next: Continuation) -> Self {
        self.on_success = Some(next);
        self
    }

    pub fn on_fail(mut self, next: Continuation) -> Self {
        self.on_fail = Some(next);
        self
    }

    pub fn with_record(mut self, record: Transaction) -> Self {
        self.record = Some(record);
        self
    }

    /// Parse a playbook manifest.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Parse playbook: {e}"))
    }

    /// Every playbook name this spec can reach by reference, including
    /// through inline continuations and spawned children.
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        for next in [&self.on_success, &self.on_fail].into_iter().flatten() {
            match next {
                Continuation::Reference { name } => out.push(name.as_str()),
                Continuation::Inline(spec) => spec.collect_references(out),
            }
        }
        if let TaskKind::Spawn { tasks } = &self.kind {
            for child in tasks {
                child.collect_references(out);
            }
        }
    }

    /// Check every numeric field, including nested inline specs and spawned
    /// children: durations must be finite and within [`MAX_SECS`], ledger
    /// amounts strictly positive.
    pub fn check_limits(&self) -> Result<(), String> {
        match &self.kind {
            TaskKind::Routine { steps } | TaskKind::SemiRoutine { steps } => {
                for step in steps {
                    step.check_limits()?;
                }
            }
            TaskKind::UserInput {
                on_match,
                on_mismatch,
                ..
            } => {
                on_match.check_limits()?;
                on_mismatch.check_limits()?;
            }
            TaskKind::WaitFor { timeout_secs, .. } => check_secs("timeout_secs", *timeout_secs)?,
            TaskKind::Spawn { tasks } => {
                for child in tasks {
                    child.check_limits()?;
                }
            }
        }
        if let Some(policy) = &self.retry {
            check_secs("retry.cooldown_secs", Some(policy.cooldown_secs))?;
        }
        if let Some(record) = &self.record
            && record.amount <= 0
        {
            return Err(format!("record.amount must be positive, got {}", record.amount));
        }
        for next in [&self.on_success, &self.on_fail].into_iter().flatten() {
            if let Continuation::Inline(spec) = next {
                spec.check_limits()?;
            }
        }
        Ok(())
    }

    /// Substitute `{{key}}` placeholders in every string field.
    pub fn interpolate(&self, vars: &[(&str, String)]) -> Self {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(_) => return self.clone(),
        };
        let interpolated = vars.iter().fold(json, |acc, (key, value)| {
            acc.replace(&format!("{{{{{key}}}}}"), value)
        });
        serde_json::from_str(&interpolated).unwrap_or_else(|_| self.clone())
    }
}

/// A runnable instance of a [`TaskSpec`].
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub spec: TaskSpec,
    pub created_at: DateTime<Utc>,
    /// Failed attempts consumed by the retry policy. Only the worker writes it.
    attempt_count: u32,
}

impl Task {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            spec,
            created_at: Utc::now(),
            attempt_count: 0,
        }
    }

    /// Display name: the spec name, or the kind when unnamed.
    pub fn name(&self) -> &str {
        if self.spec.name.is_empty() {
            self.spec.kind.label()
        } else {
            &self.spec.name
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another retry is allowed by the policy.
    pub fn can_retry(&self) -> bool {
        self.spec
            .retry
            .is_some_and(|policy| self.attempt_count < policy.max_attempts)
    }

    /// Consume one retry; returns the new attempt count.
    pub(crate) fn record_failed_attempt(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_playbook_manifest() {
        let toml_str = r#"
name = "daily_login"
kind = "routine"
retry = { max_attempts = 2, cooldown_secs = 30 }
on_fail = { ref = "recover_home" }

[[steps]]
image = "daily_login.png"

[[steps]]
image = "collect_reward.png"
action = "hold"
duration_secs = 1.5

[[steps]]
image = "slider.png"
action = "swipe"
drag_to = { x = 800, y = 400 }
"#;
        let spec = TaskSpec::from_toml(toml_str).unwrap();
        assert_eq!(spec.name, "daily_login");
        assert_eq!(spec.retry, Some(RetryPolicy::new(2, 30.0)));
        assert_eq!(spec.on_fail, Some(Continuation::reference("recover_home")));
        let TaskKind::Routine { steps } = &spec.kind else {
            panic!("expected routine, got {:?}", spec.kind);
        };
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].action, ActionVerb::Click);
        assert_eq!(steps[1].duration_secs, Some(1.5));
        assert_eq!(steps[2].action, ActionVerb::Drag);
        assert_eq!(steps[2].drag_to, Some(Point::new(800, 400)));
    }

    #[test]
    fn test_inline_continuation_parses_as_spec() {
        let json = serde_json::json!({
            "kind": "wait_for",
            "image": "gift.png",
            "timeout_secs": 5.0,
            "on_success": {
                "kind": "routine",
                "steps": [{"image": "confirm.png"}]
            }
        });
        let spec: TaskSpec = serde_json::from_value(json).unwrap();
        match spec.on_success {
            Some(Continuation::Inline(next)) => {
                assert!(matches!(next.kind, TaskKind::Routine { .. }));
            }
            other => panic!("expected inline continuation, got {other:?}"),
        }
    }

    #[test]
    fn test_references_walk_nested_specs() {
        let child = TaskSpec::routine("child", vec![Step::click("a.png")])
            .on_fail(Continuation::reference("child_recover"));
        let spec = TaskSpec::new(
            "fan_out",
            TaskKind::Spawn {
                tasks: vec![child],
            },
        )
        .on_success(Continuation::inline(
            TaskSpec::routine("inline", vec![]).on_success(Continuation::reference("done")),
        ));

        let mut refs = spec.references();
        refs.sort();
        assert_eq!(refs, vec!["child_recover", "done"]);
    }

    #[test]
    fn test_interpolate_replaces_placeholders() {
        let spec = TaskSpec::new(
            "gain",
            TaskKind::UserInput {
                region: Region::new(0, 0, 10, 10),
                expected: "{{value}}".into(),
                on_match: Step::click("thank_button.png"),
                on_mismatch: Step::new(ActionVerb::Type).with_text("+{{delta}}"),
            },
        );
        let out = spec.interpolate(&[("value", "150".into()), ("delta", "50".into())]);
        let TaskKind::UserInput {
            expected,
            on_mismatch,
            ..
        } = out.kind
        else {
            panic!("kind changed");
        };
        assert_eq!(expected, "150");
        assert_eq!(on_mismatch.text.as_deref(), Some("+50"));
    }

    #[test]
    fn test_retry_budget() {
        let mut task = Task::new(TaskSpec::routine("r", vec![]).with_retry(2, 0.0));
        assert!(task.can_retry());
        task.record_failed_attempt();
        task.record_failed_attempt();
        assert_eq!(task.attempt_count(), 2);
        assert!(!task.can_retry());

        let no_policy = Task::new(TaskSpec::routine("r", vec![]));
        assert!(!no_policy.can_retry());
        assert_eq!(no_policy.name(), "r");
    }

    #[test]
    fn test_seconds_rejects_unrepresentable_values() {
        assert_eq!(seconds(1.5), Some(Duration::from_millis(1500)));
        assert_eq!(seconds(-3.0), Some(Duration::ZERO));
        assert_eq!(seconds(1e20), None);
        assert_eq!(seconds(f64::INFINITY), None);
        assert_eq!(seconds(f64::NAN), None);
        assert_eq!(RetryPolicy::new(1, 1e20).cooldown(), None);
    }

    #[test]
    fn test_check_limits_walks_nested_specs() {
        let manifest = r#"
kind = "routine"
retry = { max_attempts = 1, cooldown_secs = 1e20 }

[[steps]]
image = "a.png"
"#;
        let err = TaskSpec::from_toml(manifest).unwrap().check_limits().unwrap_err();
        assert!(err.contains("retry.cooldown_secs"));

        let wait = TaskSpec::routine(
            "w",
            vec![Step::new(ActionVerb::Wait).with_duration(1e20)],
        );
        let nested = TaskSpec::routine("outer", vec![]).on_fail(Continuation::inline(wait));
        assert!(nested.check_limits().unwrap_err().contains("duration_secs"));

        let spawn = TaskSpec::new(
            "fan",
            TaskKind::Spawn {
                tasks: vec![TaskSpec::new(
                    "popup",
                    TaskKind::WaitFor {
                        image: "x.png".into(),
                        timeout_secs: Some(f64::INFINITY),
                        region: None,
                    },
                )],
            },
        );
        assert!(spawn.check_limits().is_err());

        assert!(
            TaskSpec::routine("ok", vec![Step::click("a.png").with_timeout(30.0)])
                .with_retry(3, 60.0)
                .check_limits()
                .is_ok()
        );
    }

    #[test]
    fn test_check_limits_rejects_non_positive_amount() {
        let spec = TaskSpec::routine("gift", vec![]).with_record(Transaction {
            player: "p".into(),
            direction: Direction::Sent,
            resource: "gold".into(),
            amount: -5,
        });
        assert!(spec.check_limits().unwrap_err().contains("record.amount"));
    }
}
