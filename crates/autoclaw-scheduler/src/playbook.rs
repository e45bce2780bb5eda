//! Playbook registry — named task templates, resolved by reference.
//!
//! Populated once at startup from the builtin playbooks and a directory of
//! `<name>.toml` manifests, validated, and never mutated afterwards.
//! Resolution always hands out a fresh [`Task`] built from a clone of the
//! template.

use std::collections::HashMap;
use std::path::Path;

use autoclaw_core::config::{PlaybookConfig, expand_path};
use autoclaw_core::error::{AutoClawError, Result};
use autoclaw_core::types::Region;

use crate::tasks::{Continuation, Step, Task, TaskKind, TaskSpec};

/// Registry of all available playbooks.
#[derive(Debug, Clone)]
pub struct PlaybookRegistry {
    playbooks: HashMap<String, TaskSpec>,
}

impl PlaybookRegistry {
    /// Build and validate a registry. Fails on any dangling reference.
    pub fn new(playbooks: HashMap<String, TaskSpec>) -> Result<Self> {
        let registry = Self { playbooks };
        registry.validate()?;
        Ok(registry)
    }

    /// Registry with the builtin playbooks only.
    pub fn with_defaults() -> Result<Self> {
        Self::new(builtin_playbooks().into_iter().map(|p| (p.name.clone(), p)).collect())
    }

    /// Load builtins (if enabled) and every manifest in the configured directory.
    /// Directory manifests replace builtins with the same name.
    pub fn load(config: &PlaybookConfig) -> Result<Self> {
        let mut playbooks = HashMap::new();
        if config.builtin {
            for spec in builtin_playbooks() {
                playbooks.insert(spec.name.clone(), spec);
            }
        }

        let dir = expand_path(&config.dir);
        for (name, spec) in load_dir(&dir)? {
            if playbooks.insert(name.clone(), spec).is_some() {
                tracing::info!("📘 Playbook '{}' overridden by {}", name, dir.display());
            }
        }

        let registry = Self::new(playbooks)?;
        tracing::info!("📚 {} playbooks registered", registry.count());
        Ok(registry)
    }

    fn validate(&self) -> Result<()> {
        for (name, spec) in &self.playbooks {
            spec.check_limits()
                .map_err(|e| AutoClawError::Config(format!("playbook '{name}': {e}")))?;
            for target in spec.references() {
                if !self.playbooks.contains_key(target) {
                    return Err(AutoClawError::Resolution(format!(
                        "playbook '{name}' references unknown playbook '{target}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fail unless `name` is registered. Used to validate trigger and watcher
    /// references at startup.
    pub fn ensure(&self, name: &str, referenced_by: &str) -> Result<()> {
        if self.playbooks.contains_key(name) {
            Ok(())
        } else {
            Err(AutoClawError::Resolution(format!(
                "{referenced_by} references unknown playbook '{name}'"
            )))
        }
    }

    /// Fresh task instance of playbook `name`.
    pub fn resolve(&self, name: &str) -> Result<Task> {
        self.playbooks
            .get(name)
            .map(|spec| Task::new(spec.clone()))
            .ok_or_else(|| AutoClawError::Resolution(format!("unknown playbook '{name}'")))
    }

    /// Fresh task instance for a continuation, inline or by reference.
    pub fn resolve_continuation(&self, next: &Continuation) -> Result<Task> {
        match next {
            Continuation::Reference { name } => self.resolve(name),
            Continuation::Inline(spec) => Ok(Task::new(spec.as_ref().clone())),
        }
    }

    /// Template for `name`, for inspection only.
    pub fn get(&self, name: &str) -> Option<&TaskSpec> {
        self.playbooks.get(name)
    }

    /// Sorted playbook names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.playbooks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn count(&self) -> usize {
        self.playbooks.len()
    }
}

/// Read every `*.toml` manifest in `dir`. The file stem is the playbook name.
fn load_dir(dir: &Path) -> Result<Vec<(String, TaskSpec)>> {
    if !dir.exists() {
        tracing::debug!("No playbook directory at {}", dir.display());
        return Ok(Vec::new());
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let content = std::fs::read_to_string(&path)?;
        let mut spec = TaskSpec::from_toml(&content)
            .map_err(|e| AutoClawError::Config(format!("{}: {e}", path.display())))?;
        spec.name = name.to_string();
        tracing::debug!("📘 Loaded playbook '{}' ({})", name, spec.kind.label());
        out.push((name.to_string(), spec));
    }
    Ok(out)
}

/// Builtin playbooks.
pub fn builtin_playbooks() -> Vec<TaskSpec> {
    vec![
        TaskSpec::routine(
            "daily_login",
            vec![
                Step::click("daily_login.png"),
                Step::click("collect_reward.png"),
            ],
        )
        .with_retry(3, 60.0),
        TaskSpec::new(
            "mail_check",
            TaskKind::SemiRoutine {
                steps: vec![
                    Step::click("check_mail.png"),
                    Step::click("collect_mail.png"),
                ],
            },
        ),
        // Enqueued by the watcher with {{value}} filled in.
        TaskSpec::new(
            "resource_gain",
            TaskKind::UserInput {
                region: Region::new(500, 300, 200, 50),
                expected: "{{value}}".into(),
                on_match: Step::click("thank_button.png"),
                on_mismatch: Step::click("ignore_button.png"),
            },
        ),
        TaskSpec::new(
            "confirm_popup",
            TaskKind::WaitFor {
                image: "confirm_button.png".into(),
                timeout_secs: Some(10.0),
                region: None,
            },
        )
        .on_success(Continuation::inline(TaskSpec::routine(
            "confirm_popup_click",
            vec![Step::click("confirm_button.png")],
        ))),
    ]
}
