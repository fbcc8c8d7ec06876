//! Skills and the explicit table that loads them.
//!
//! A skill registers its intents and handlers through a [`SkillContext`] during
//! startup. Handlers capture whatever shared state the skill needs; after loading,
//! the registry is frozen and only read.

pub mod joke;
pub mod time;
pub mod timer;
pub mod unknown;

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::RegistrationError;
use crate::kernel::guard::catch_panic;
use crate::kernel::intent::handler::{running_confidence, Handler};
use crate::kernel::intent::package::{HoldHandle, ResultPackage};
use crate::kernel::intent::registry::IntentRegistry;
use crate::kernel::intent::types::{IntentName, IntentSpec};

pub use joke::JokeSkill;
pub use time::TimeSkill;
pub use timer::TimerSkill;
pub use unknown::UnknownSkill;

pub trait Skill: Send + Sync {
    fn name(&self) -> &str;

    fn register(&self, ctx: &mut SkillContext<'_>) -> anyhow::Result<()>;
}

/// Sends packages into the render path outside of a query.
#[derive(Debug, Clone)]
pub struct Trigger {
    tx: mpsc::UnboundedSender<ResultPackage>,
}

impl Trigger {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ResultPackage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns `false` once the engine has stopped taking packages.
    pub fn send(&self, package: ResultPackage) -> bool {
        match self.tx.send(package) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropped package for {}: engine stopped", e.0.action);
                false
            }
        }
    }
}

/// Tracks whether a skill has an ongoing job that keeps presentation control.
#[derive(Debug)]
pub struct RunningState {
    hold: Mutex<Option<HoldHandle>>,
    avg_run_secs: f64,
}

impl RunningState {
    pub fn new(avg_run_secs: f64) -> Self {
        Self {
            hold: Mutex::new(None),
            avg_run_secs,
        }
    }

    /// Hold `package`'s outputs until [`RunningState::stop`].
    pub fn start(&self, package: &mut ResultPackage) {
        let handle = package.hold();
        let mut hold = self.hold.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = hold.replace(handle) {
            previous.release();
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.hold.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.release();
        }
    }

    pub fn is_running(&self) -> bool {
        self.hold
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(false, HoldHandle::is_active)
    }

    /// Default confidence to use while running.
    pub fn weighted_confidence(&self) -> Option<f32> {
        self.is_running().then(|| running_confidence(self.avg_run_secs))
    }
}

impl Default for RunningState {
    fn default() -> Self {
        Self::new(60.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadFailure {
    pub skill: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub intents: Vec<IntentName>,
    pub fallbacks: Vec<IntentName>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The engine as seen by one skill while it registers.
pub struct SkillContext<'a> {
    skill: String,
    registry: &'a mut IntentRegistry,
    report: &'a mut LoadReport,
    trigger: Trigger,
    running: Arc<RunningState>,
}

impl<'a> SkillContext<'a> {
    pub fn skill_name(&self) -> &str {
        &self.skill
    }

    /// Handlers without a confidence opinion score higher while the skill is running.
    pub fn register_intent(&mut self, spec: IntentSpec, handler: Handler) -> Result<IntentName, RegistrationError> {
        let running = Arc::clone(&self.running);
        let handler = handler.with_default_opinion(move || running.weighted_confidence());
        let name = self.registry.register(&self.skill, &spec, handler)?;
        self.report.intents.push(name.clone());
        Ok(name)
    }

    pub fn register_alias(&mut self, alias: IntentSpec, source_intent: &str) -> Result<IntentName, RegistrationError> {
        let name = self.registry.register_alias(&self.skill, &alias, source_intent)?;
        self.report.intents.push(name.clone());
        Ok(name)
    }

    pub fn register_fallback(&mut self, handler: Handler) -> IntentName {
        let name = self.registry.register_fallback(&self.skill, handler);
        self.report.fallbacks.push(name.clone());
        name
    }

    /// Clone this into handlers that produce output later.
    pub fn trigger(&self) -> Trigger {
        self.trigger.clone()
    }

    /// Shared with handlers that start long-running jobs.
    pub fn running(&self) -> Arc<RunningState> {
        Arc::clone(&self.running)
    }
}

/// Explicit, ordered list of skills to load.
#[derive(Default)]
pub struct SkillTable {
    skills: Vec<Box<dyn Skill>>,
}

impl SkillTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time, joke, timer and the question fallback.
    pub fn bundled() -> Self {
        Self::new()
            .with(TimeSkill::new())
            .with(JokeSkill::new())
            .with(TimerSkill::new())
            .with(UnknownSkill::new())
    }

    pub fn with(mut self, skill: impl Skill + 'static) -> Self {
        self.skills.push(Box::new(skill));
        self
    }

    pub fn push(&mut self, skill: Box<dyn Skill>) {
        self.skills.push(skill);
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Registers every skill in order. A failing skill is reported and the rest
    /// still load.
    pub fn load(&self, registry: &mut IntentRegistry, trigger: &Trigger) -> LoadReport {
        let mut report = LoadReport::default();
        for skill in &self.skills {
            let name = skill.name().to_string();
            let outcome = {
                let mut ctx = SkillContext {
                    skill: name.clone(),
                    registry: &mut *registry,
                    report: &mut report,
                    trigger: trigger.clone(),
                    running: Arc::new(RunningState::default()),
                };
                catch_panic(|| skill.register(&mut ctx))
            };
            match outcome {
                Ok(()) => {
                    info!("Loaded skill {}", name);
                    report.loaded.push(name);
                }
                Err(e) => {
                    warn!("Failed to load skill {}: {:#}", name, e);
                    report.failures.push(LoadFailure {
                        skill: name,
                        error: format!("{:#}", e),
                    });
                }
            }
        }
        report
    }
}
