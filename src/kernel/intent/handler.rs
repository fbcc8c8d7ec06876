use std::fmt;
use std::sync::Arc;

use super::package::ResultPackage;
use super::types::{clamp_confidence, IntentMatch};
use crate::kernel::guard::catch_panic;

/// Confidence used when a handler has no opinion of its own.
pub const DEFAULT_HANDLER_CONFIDENCE: f32 = 0.75;

/// No-opinion confidence for a skill that currently keeps control. Short-running
/// jobs get close to 1.0, long ones decay towards the plain default.
pub fn running_confidence(avg_run_secs: f64) -> f32 {
    let weight = 2.0 / (1.0 + (avg_run_secs.max(0.0) / 50.0).exp());
    DEFAULT_HANDLER_CONFIDENCE + 0.25 * weight as f32
}

pub type ConfidenceFn = dyn Fn(&IntentMatch) -> anyhow::Result<Option<f32>> + Send + Sync;
pub type ResultFn = dyn Fn(&IntentMatch, &mut ResultPackage) -> anyhow::Result<()> + Send + Sync;

/// "Can I handle this" kept apart from "produce the result", so candidates can be
/// probed cheaply before the winner does the expensive work.
#[derive(Clone)]
pub struct Handler {
    confidence: Arc<ConfidenceFn>,
    result: Arc<ResultFn>,
}

impl Handler {
    pub fn new<C, R>(confidence: C, result: R) -> Self
    where
        C: Fn(&IntentMatch) -> anyhow::Result<Option<f32>> + Send + Sync + 'static,
        R: Fn(&IntentMatch, &mut ResultPackage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            confidence: Arc::new(confidence),
            result: Arc::new(result),
        }
    }

    /// Handler without a confidence opinion.
    pub fn from_result<R>(result: R) -> Self
    where
        R: Fn(&IntentMatch, &mut ResultPackage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(|_| Ok(None), result)
    }

    /// Replace "no opinion" with `opinion()` whenever it returns `Some`.
    pub fn with_default_opinion<D>(self, opinion: D) -> Self
    where
        D: Fn() -> Option<f32> + Send + Sync + 'static,
    {
        let inner = self.confidence;
        Self {
            confidence: Arc::new(move |candidate: &IntentMatch| -> anyhow::Result<Option<f32>> {
                Ok(inner(candidate)?.or_else(&opinion))
            }),
            result: self.result,
        }
    }

    /// Clamped to [0, 1]. Errors and panics come back as `Err`.
    pub fn confidence(&self, candidate: &IntentMatch) -> anyhow::Result<f32> {
        let opinion = catch_panic(|| (self.confidence)(candidate))?;
        Ok(clamp_confidence(opinion.unwrap_or(DEFAULT_HANDLER_CONFIDENCE)))
    }

    pub fn result(&self, candidate: &IntentMatch, package: &mut ResultPackage) -> anyhow::Result<()> {
        catch_panic(|| (self.result)(candidate, package))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler")
    }
}
