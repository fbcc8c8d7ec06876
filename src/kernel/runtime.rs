use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::dispatch::QueryDispatcher;
use super::intent::arbitrator::ConfidenceArbitrator;
use super::intent::backend::{KeywordBackend, MatchBackend, PatternBackend};
use super::intent::package::ResultPackage;
use super::intent::registry::IntentRegistry;
use super::intent::remote::RemoteBackend;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::outputs::{DialogRenderer, FaceplateRenderer, FaceplateSink, FormatPipeline, LogSink, Renderer, TemplateStore};
use crate::skills::{LoadReport, SkillTable, Trigger};

/// Startup wiring: backends, skills, compile, pipeline, dispatcher.
pub struct RuntimeBuilder {
    config: EngineConfig,
    skills: SkillTable,
    backends: Vec<Arc<dyn MatchBackend>>,
    renderers: Vec<Box<dyn Renderer>>,
    faceplate: Option<Arc<dyn FaceplateSink>>,
    builtin_renderers: bool,
}

impl RuntimeBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            skills: SkillTable::new(),
            backends: Vec::new(),
            renderers: Vec::new(),
            faceplate: None,
            builtin_renderers: true,
        }
    }

    pub fn skills(mut self, skills: SkillTable) -> Self {
        self.skills = skills;
        self
    }

    /// Consulted after the built-in pattern, keyword and remote backends.
    pub fn backend(mut self, backend: Arc<dyn MatchBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Added after the built-in dialog and faceplate renderers.
    pub fn renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderers.push(renderer);
        self
    }

    /// Where faceplate commands go. Defaults to the log.
    pub fn faceplate(mut self, sink: Arc<dyn FaceplateSink>) -> Self {
        self.faceplate = Some(sink);
        self
    }

    /// Use only the renderers passed to [`RuntimeBuilder::renderer`].
    pub fn without_builtin_renderers(mut self) -> Self {
        self.builtin_renderers = false;
        self
    }

    pub async fn boot(self) -> EngineResult<Runtime> {
        let config = self.config;
        config.validate()?;
        let paths = config.vocab_paths();
        info!("Booting engine (vocab {:?}, lang {})", config.vocab_dir, config.lang);

        let mut backends: Vec<Arc<dyn MatchBackend>> = vec![
            Arc::new(PatternBackend::with_vocab(paths.clone())),
            Arc::new(KeywordBackend::new()),
        ];
        if let Some(addr) = config.remote_backend.clone() {
            let remote_paths = paths.clone();
            let handshake = config.handshake_timeout();
            let query_timeout = config.backend_query_timeout();
            let compile_warn = config.compile_warn();
            let remote = tokio::task::spawn_blocking(move || {
                RemoteBackend::connect(&addr, remote_paths, handshake, query_timeout, compile_warn)
            })
            .await
            .map_err(|e| EngineError::Internal(format!("remote connect task failed: {}", e)))??;
            backends.push(Arc::new(remote));
        }
        backends.extend(self.backends);

        let mut registry = IntentRegistry::new(backends);
        let (trigger, packages) = Trigger::channel();
        let report = self.skills.load(&mut registry, &trigger);
        info!(
            "Loaded {} skills with {} intents and {} fallbacks",
            report.loaded.len(),
            report.intents.len(),
            report.fallbacks.len()
        );
        for failure in &report.failures {
            warn!("Skill {} not loaded: {}", failure.skill, failure.error);
        }

        compile_with_warning(&registry, &config).await?;

        let mut renderers: Vec<Box<dyn Renderer>> = Vec::new();
        if self.builtin_renderers {
            let store = TemplateStore::new(paths);
            let sink = self.faceplate.unwrap_or_else(|| Arc::new(LogSink));
            renderers.push(Box::new(DialogRenderer::new(store.clone())));
            renderers.push(Box::new(FaceplateRenderer::new(store, sink)));
        }
        renderers.extend(self.renderers);
        let pipeline = FormatPipeline::new(renderers);

        let shutdown = CancellationToken::new();
        let arbitrator = ConfidenceArbitrator::new(Arc::new(registry));
        let dispatcher =
            QueryDispatcher::with_shutdown(arbitrator, pipeline, config.listener_timeout(), shutdown.clone());
        let pump = tokio::spawn(pump_packages(dispatcher.clone(), packages, shutdown));

        info!("Engine ready");
        Ok(Runtime {
            config,
            dispatcher,
            report,
            trigger,
            pump,
        })
    }
}

async fn compile_with_warning(registry: &IntentRegistry, config: &EngineConfig) -> EngineResult<()> {
    let compile = registry.compile(config.compile_timeout());
    tokio::pin!(compile);
    let warn_after = tokio::time::sleep(config.compile_warn());
    tokio::pin!(warn_after);
    let mut warned = false;

    loop {
        tokio::select! {
            result = &mut compile => return result,
            _ = &mut warn_after, if !warned => {
                warned = true;
                warn!("Taking longer than expected to compile intents...");
            }
        }
    }
}

/// Forwards skill-triggered packages to the dispatcher until shutdown.
async fn pump_packages(
    dispatcher: QueryDispatcher,
    mut packages: mpsc::UnboundedReceiver<ResultPackage>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            package = packages.recv() => match package {
                Some(package) => {
                    dispatcher.send_package(package);
                }
                None => break,
            },
        }
    }
}

/// A booted engine.
pub struct Runtime {
    config: EngineConfig,
    dispatcher: QueryDispatcher,
    report: LoadReport,
    trigger: Trigger,
    pump: JoinHandle<()>,
}

impl Runtime {
    pub fn builder(config: EngineConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    pub fn dispatcher(&self) -> &QueryDispatcher {
        &self.dispatcher
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.report
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Same channel skills use to send packages outside of a query.
    pub fn trigger(&self) -> Trigger {
        self.trigger.clone()
    }

    pub async fn shutdown(self) {
        self.dispatcher.shutdown();
        if let Err(e) = self.pump.await {
            warn!("Package pump ended abnormally: {}", e);
        }
        info!("Engine stopped");
    }
}
