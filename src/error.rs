//! Error types for the engine.

use std::time::Duration;
use thiserror::Error;

use crate::kernel::intent::types::IntentName;

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that stop startup or surface through the public API.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("backend '{backend}' did not finish compiling within {timeout:?}")]
    CompileTimeout { backend: String, timeout: Duration },

    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("backend '{backend}' failed: {reason}")]
    Backend { backend: String, reason: String },

    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("engine is shutting down")]
    Shutdown,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Registration problems are reported to the skill loader, never thrown past it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("no backend accepted intent {0}")]
    NoBackend(IntentName),

    #[error("intent {0} is already registered")]
    Duplicate(IntentName),

    #[error("alias {alias} refers to unknown intent {source_name}")]
    UnknownSource {
        alias: IntentName,
        source_name: IntentName,
    },
}

/// A single renderer failing. Isolated by the pipeline.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("template IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("output channel error: {0}")]
    Sink(String),

    #[error("renderer panicked: {0}")]
    Panicked(String),
}
