//! Format pipeline: independent renderers turning a result package into outputs.

pub mod dialog;
pub mod faceplate;
pub mod template;

use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::RenderError;
use crate::kernel::guard::panic_message;
use crate::kernel::intent::package::HoldHandle;
use crate::kernel::intent::types::IntentName;

pub use dialog::DialogRenderer;
pub use faceplate::{ChannelSink, FaceplateRenderer, FaceplateSink, LogSink};
pub use template::TemplateStore;

/// What one renderer produced for the latest package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Artifact {
    Empty,
    Text(String),
    Commands(Vec<String>),
}

impl Artifact {
    pub fn is_empty(&self) -> bool {
        matches!(self, Artifact::Empty)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Artifact::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// An output channel. Each renderer owns its accumulated state; the pipeline
/// only calls these methods, one caller at a time.
pub trait Renderer: Send {
    fn name(&self) -> &str;

    fn reset(&mut self);

    /// A missing template is not an error and leaves the output empty.
    fn generate(&mut self, action: &IntentName, data: &BTreeMap<String, String>) -> Result<(), RenderError>;

    fn read_output(&self) -> Artifact;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderFailure {
    pub renderer: String,
    pub error: String,
}

/// Snapshot of every renderer's output after one `generate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderedOutputs {
    pub artifacts: Vec<(String, Artifact)>,
    pub failures: Vec<RenderFailure>,
}

impl RenderedOutputs {
    pub fn get(&self, renderer: &str) -> Option<&Artifact> {
        self.artifacts
            .iter()
            .find(|(name, _)| name == renderer)
            .map(|(_, artifact)| artifact)
    }

    /// The dialog sentence, empty when nothing was said.
    pub fn dialog(&self) -> &str {
        self.get("dialog").and_then(Artifact::as_text).unwrap_or("")
    }
}

/// Runs renderer code, turning a panic into `RenderError::Panicked`.
fn isolate<T>(f: impl FnOnce() -> Result<T, RenderError>) -> Result<T, RenderError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(RenderError::Panicked(panic_message(&*payload))))
}

pub struct FormatPipeline {
    renderers: Vec<Mutex<Box<dyn Renderer>>>,
    hold: Mutex<Option<HoldHandle>>,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl FormatPipeline {
    pub fn new(renderers: Vec<Box<dyn Renderer>>) -> Self {
        Self {
            renderers: renderers.into_iter().map(Mutex::new).collect(),
            hold: Mutex::new(None),
        }
    }

    /// Whether a long-running handler still keeps the accumulated outputs.
    pub fn is_held(&self) -> bool {
        lock(&self.hold).as_ref().map_or(false, HoldHandle::is_active)
    }

    /// Reset (unless held) and regenerate every renderer. A failing renderer is
    /// recorded and the others carry on.
    pub fn generate(
        &self,
        action: &IntentName,
        data: &BTreeMap<String, String>,
        hold: Option<HoldHandle>,
    ) -> RenderedOutputs {
        let held = {
            let mut current = lock(&self.hold);
            let held = current.as_ref().map_or(false, HoldHandle::is_active);
            if !held {
                *current = None;
            }
            if let Some(handle) = hold {
                *current = Some(handle);
            }
            held
        };
        if held {
            debug!("Pipeline held, keeping accumulated output for {}", action);
        }

        let mut outputs = RenderedOutputs::default();
        for (index, slot) in self.renderers.iter().enumerate() {
            let mut renderer = lock(slot);
            let mut failure = None;

            let name = match isolate(|| Ok(renderer.name().to_string())) {
                Ok(name) => name,
                Err(e) => {
                    failure = Some(e);
                    format!("renderer-{}", index)
                }
            };
            if let Err(e) = isolate(|| {
                if !held {
                    renderer.reset();
                }
                renderer.generate(action, data)
            }) {
                failure = failure.or(Some(e));
            }
            let artifact = match isolate(|| Ok(renderer.read_output())) {
                Ok(artifact) => artifact,
                Err(e) => {
                    failure = failure.or(Some(e));
                    Artifact::Empty
                }
            };

            if let Some(e) = failure {
                warn!("Renderer '{}' failed for {}: {}", name, action, e);
                outputs.failures.push(RenderFailure {
                    renderer: name.clone(),
                    error: e.to_string(),
                });
            }
            outputs.artifacts.push((name, artifact));
        }
        outputs
    }
}
