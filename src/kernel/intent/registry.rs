use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::backend::MatchBackend;
use super::handler::Handler;
use super::types::{IntentName, IntentSpec};
use crate::error::{EngineError, EngineResult, RegistrationError};

/// A registered intent. `action` is the intent whose templates render the result;
/// for an alias it is the source intent.
#[derive(Debug, Clone)]
pub struct HandlerEntry {
    pub name: IntentName,
    pub action: IntentName,
    pub handler: Handler,
}

#[derive(Debug, Clone)]
pub struct FallbackEntry {
    pub name: IntentName,
    pub handler: Handler,
}

/// Populated during skill loading, then frozen behind an `Arc` and only read.
///
/// Duplicate names are rejected: the first registration stays and later ones get
/// `RegistrationError::Duplicate`.
pub struct IntentRegistry {
    backends: Vec<Arc<dyn MatchBackend>>,
    handlers: HashMap<IntentName, HandlerEntry>,
    fallbacks: Vec<FallbackEntry>,
}

impl IntentRegistry {
    /// `backends` are tried in the given priority order.
    pub fn new(backends: Vec<Arc<dyn MatchBackend>>) -> Self {
        Self {
            backends,
            handlers: HashMap::new(),
            fallbacks: Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        skill: &str,
        spec: &IntentSpec,
        handler: Handler,
    ) -> Result<IntentName, RegistrationError> {
        let name = self.register_pattern(skill, spec)?;
        self.handlers.insert(
            name.clone(),
            HandlerEntry {
                name: name.clone(),
                action: name.clone(),
                handler,
            },
        );
        debug!("Registered intent {}", name);
        Ok(name)
    }

    /// Another matchable pattern for an existing intent of the same skill.
    pub fn register_alias(
        &mut self,
        skill: &str,
        alias: &IntentSpec,
        source_intent: &str,
    ) -> Result<IntentName, RegistrationError> {
        let source_name = IntentName::new(skill, source_intent);
        let source = match self.handlers.get(&source_name) {
            Some(entry) => entry.clone(),
            None => {
                return Err(RegistrationError::UnknownSource {
                    alias: IntentName::new(skill, alias.name.clone()),
                    source_name,
                })
            }
        };

        let name = self.register_pattern(skill, alias)?;
        self.handlers.insert(
            name.clone(),
            HandlerEntry {
                name: name.clone(),
                action: source.action,
                handler: source.handler,
            },
        );
        debug!("Registered alias {} -> {}", name, source_name);
        Ok(name)
    }

    /// Appended to the fallback chain, which is evaluated in registration order.
    pub fn register_fallback(&mut self, skill: &str, handler: Handler) -> IntentName {
        let name = IntentName::fallback(skill);
        self.fallbacks.push(FallbackEntry {
            name: name.clone(),
            handler,
        });
        debug!("Registered fallback {}", name);
        name
    }

    fn register_pattern(&self, skill: &str, spec: &IntentSpec) -> Result<IntentName, RegistrationError> {
        let wanted = IntentName::new(skill, spec.name.clone());
        if self.handlers.contains_key(&wanted) {
            warn!("Rejected duplicate intent {}", wanted);
            return Err(RegistrationError::Duplicate(wanted));
        }

        for backend in &self.backends {
            if let Some(name) = backend.register(skill, spec) {
                if name != wanted && self.handlers.contains_key(&name) {
                    warn!("Backend '{}' produced duplicate intent {}", backend.name(), name);
                    return Err(RegistrationError::Duplicate(name));
                }
                debug!("Backend '{}' accepted {}", backend.name(), name);
                return Ok(name);
            }
        }

        warn!("Failed to register intent for {}", wanted);
        Err(RegistrationError::NoBackend(wanted))
    }

    /// Runs every backend's compile step in registration order. `timeout` bounds
    /// the whole run; each backend gets what is left of it. Overrunning is fatal
    /// to startup.
    pub async fn compile(&self, timeout: Duration) -> EngineResult<()> {
        let started_total = Instant::now();
        for backend in &self.backends {
            let name = backend.name().to_string();
            let remaining = timeout.saturating_sub(started_total.elapsed());
            if remaining.is_zero() {
                return Err(EngineError::CompileTimeout {
                    backend: name,
                    timeout,
                });
            }

            let task_backend = Arc::clone(backend);
            let started = Instant::now();
            let task = tokio::task::spawn_blocking(move || task_backend.compile(remaining));

            match tokio::time::timeout(remaining, task).await {
                Err(_) => {
                    return Err(EngineError::CompileTimeout {
                        backend: name,
                        timeout,
                    })
                }
                Ok(Err(join_err)) => {
                    return Err(EngineError::Internal(format!(
                        "compile task for '{}' failed: {}",
                        name, join_err
                    )))
                }
                Ok(Ok(result)) => result?,
            }
            info!("Backend '{}' compiled in {:?}", name, started.elapsed());
        }
        Ok(())
    }

    pub fn entry(&self, name: &IntentName) -> Option<&HandlerEntry> {
        self.handlers.get(name)
    }

    pub fn fallbacks(&self) -> &[FallbackEntry] {
        &self.fallbacks
    }

    pub fn backends(&self) -> &[Arc<dyn MatchBackend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
