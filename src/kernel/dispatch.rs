use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::guard::catch_panic;
use super::intent::arbitrator::{ConfidenceArbitrator, ResolutionPath};
use super::intent::package::{Continuation, ResultPackage};
use super::intent::types::IntentName;
use super::lifecycle::{DispatchStage, EngineState};
use super::telemetry::{TelemetryEvent, TelemetryRecorder, TelemetrySnapshot};
use crate::error::{EngineError, EngineResult};
use crate::outputs::{FormatPipeline, RenderedOutputs};

pub type QueryId = Uuid;

pub type QueryListener = Arc<dyn Fn(QueryId, &str) -> anyhow::Result<()> + Send + Sync>;
pub type ResponseListener = Arc<dyn Fn(&Response) -> anyhow::Result<()> + Send + Sync>;

/// What interfaces receive once a query (or triggered package) is delivered.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub query_id: QueryId,
    /// `None` for packages sent by skills outside of a query.
    pub query: Option<String>,
    pub action: IntentName,
    pub confidence: f32,
    pub path: Option<ResolutionPath>,
    pub outputs: RenderedOutputs,
    /// Produced by a continuation of an earlier package.
    pub follow_up: bool,
}

impl Response {
    pub fn dialog(&self) -> &str {
        self.outputs.dialog()
    }

    pub fn is_no_answer(&self) -> bool {
        self.path == Some(ResolutionPath::NoMatch)
    }
}

/// Resolves once its query is delivered. Dropping it does not cancel the query.
#[derive(Debug)]
pub struct QueryTicket {
    id: QueryId,
    rx: oneshot::Receiver<EngineResult<Response>>,
}

impl QueryTicket {
    pub fn id(&self) -> QueryId {
        self.id
    }

    pub async fn wait(self) -> EngineResult<Response> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Internal(format!("dispatch of {} was dropped", self.id))),
        }
    }
}

enum Work {
    Query(String),
    Package(ResultPackage),
}

struct Delivery {
    response: Response,
    continuation: Option<(Continuation, ResultPackage)>,
}

struct Inner {
    arbitrator: ConfidenceArbitrator,
    pipeline: FormatPipeline,
    query_listeners: RwLock<Vec<QueryListener>>,
    response_listeners: RwLock<Vec<ResponseListener>>,
    stages: Mutex<HashMap<QueryId, DispatchStage>>,
    telemetry: Mutex<TelemetryRecorder>,
    listener_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn joined<T>(result: Result<T, tokio::task::JoinError>, what: &str) -> EngineResult<T> {
    result.map_err(|e| EngineError::Internal(format!("{} task failed: {}", what, e)))
}

impl Inner {
    fn record(&self, event: TelemetryEvent) {
        lock(&self.telemetry).record(event);
    }

    fn set_stage(&self, id: QueryId, stage: DispatchStage) {
        let mut stages = lock(&self.stages);
        if stage == DispatchStage::Delivered {
            stages.remove(&id);
            return;
        }
        match stages.get(&id) {
            Some(current) if !current.can_move_to(stage) => {
                warn!("Query {} cannot move from {:?} to {:?}", id, current, stage);
            }
            _ => {
                stages.insert(id, stage);
            }
        }
    }

    async fn call_listener<F>(&self, id: QueryId, index: usize, call: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(move || catch_panic(call));
        let outcome = match self.listener_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(result) => Some(result),
                Err(_) => None,
            },
            None => Some(task.await),
        };

        match outcome {
            Some(Ok(Ok(()))) => {}
            Some(Ok(Err(e))) => {
                warn!("Listener {} failed: {}", index, e);
                self.record(TelemetryEvent::ListenerFailed {
                    query_id: id,
                    listener: index,
                    timed_out: false,
                });
            }
            Some(Err(e)) => {
                warn!("Listener {} task failed: {}", index, e);
                self.record(TelemetryEvent::ListenerFailed {
                    query_id: id,
                    listener: index,
                    timed_out: false,
                });
            }
            None => {
                warn!("Listener {} timed out after {:?}", index, self.listener_timeout);
                self.record(TelemetryEvent::ListenerFailed {
                    query_id: id,
                    listener: index,
                    timed_out: true,
                });
            }
        }
    }

    async fn notify_query(&self, id: QueryId, text: &str) {
        let listeners: Vec<QueryListener> = self
            .query_listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for (index, listener) in listeners.into_iter().enumerate() {
            let text = text.to_string();
            self.call_listener(id, index, move || listener(id, &text)).await;
        }
    }

    async fn notify_response(&self, response: &Response) {
        let listeners: Vec<ResponseListener> = self
            .response_listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for (index, listener) in listeners.into_iter().enumerate() {
            let response = response.clone();
            self.call_listener(response.query_id, index, move || listener(&response)).await;
        }
    }

    async fn resolve(self: &Arc<Self>, id: QueryId, text: String) -> EngineResult<(ResultPackage, ResolutionPath)> {
        self.set_stage(id, DispatchStage::Resolving);
        let inner = Arc::clone(self);
        let ranking = joined(
            tokio::task::spawn_blocking(move || inner.arbitrator.rank(&text)).await,
            "ranking",
        )?;

        self.set_stage(id, DispatchStage::HandlerRunning);
        let inner = Arc::clone(self);
        let verdict = joined(
            tokio::task::spawn_blocking(move || inner.arbitrator.commit(ranking)).await,
            "handler",
        )?;

        let path = verdict.resolution.path();
        self.record(TelemetryEvent::Resolved {
            query_id: id,
            path,
            candidates: verdict.candidates,
            handler_failures: verdict.handler_failures,
        });
        Ok((verdict.resolution.into_package(), path))
    }

    async fn deliver(
        self: &Arc<Self>,
        id: QueryId,
        query: Option<String>,
        mut package: ResultPackage,
        path: Option<ResolutionPath>,
        follow_up: bool,
        started: Instant,
    ) -> EngineResult<Delivery> {
        self.set_stage(id, DispatchStage::Rendering);
        let action = package.action.clone();
        let data = package.string_data();
        let hold = package.hold.clone();

        let inner = Arc::clone(self);
        let render_action = action.clone();
        let outputs = joined(
            tokio::task::spawn_blocking(move || inner.pipeline.generate(&render_action, &data, hold)).await,
            "render",
        )?;
        for failure in &outputs.failures {
            self.record(TelemetryEvent::RendererFailed {
                query_id: id,
                renderer: failure.renderer.clone(),
            });
        }

        let response = Response {
            query_id: id,
            query,
            action,
            confidence: package.confidence,
            path,
            outputs,
            follow_up,
        };
        self.notify_response(&response).await;

        self.set_stage(id, DispatchStage::Delivered);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.record(TelemetryEvent::Delivered {
            query_id: id,
            elapsed_ms,
        });
        debug!("Delivered {} as {} in {}ms", id, response.action, elapsed_ms);

        let continuation = package.continuation.take().map(|c| (c, package));
        Ok(Delivery {
            response,
            continuation,
        })
    }

    /// Listeners still hear about a dispatch that failed outright: they get a
    /// no-answer response with no rendered outputs.
    async fn abort(&self, id: QueryId, query: Option<String>, follow_up: bool) {
        let path = query.as_ref().map(|_| ResolutionPath::NoMatch);
        let response = Response {
            query_id: id,
            query,
            action: ResultPackage::no_answer().action,
            confidence: 0.0,
            path,
            outputs: RenderedOutputs::default(),
            follow_up,
        };
        self.notify_response(&response).await;
        self.set_stage(id, DispatchStage::Delivered);
        self.record(TelemetryEvent::Aborted { query_id: id });
    }

    async fn process(self: Arc<Self>, id: QueryId, work: Work, tx: oneshot::Sender<EngineResult<Response>>) {
        let started = Instant::now();
        let query = match &work {
            Work::Query(text) => Some(text.clone()),
            Work::Package(_) => None,
        };
        let outcome = match work {
            Work::Query(text) => {
                self.notify_query(id, &text).await;
                match self.resolve(id, text.clone()).await {
                    Ok((package, path)) => {
                        self.deliver(id, Some(text), package, Some(path), false, started)
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            Work::Package(package) => self.deliver(id, None, package, None, false, started).await,
        };

        let mut pending = match outcome {
            Ok(delivery) => {
                let _ = tx.send(Ok(delivery.response));
                delivery.continuation
            }
            Err(e) => {
                warn!("Dispatch {} failed: {}", id, e);
                self.abort(id, query, false).await;
                let _ = tx.send(Err(e));
                None
            }
        };

        while let Some((continuation, package)) = pending.take() {
            let next = tokio::task::spawn_blocking(move || catch_panic(|| Ok(continuation(&package)))).await;
            let next = match next {
                Ok(Ok(Some(next))) => next,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    warn!("Continuation of {} failed: {}", id, e);
                    break;
                }
                Err(e) => {
                    warn!("Continuation of {} task failed: {}", id, e);
                    break;
                }
            };
            if self.shutdown.is_cancelled() {
                debug!("Dropping follow-up of {} during shutdown", id);
                break;
            }

            let follow_id = Uuid::new_v4();
            self.set_stage(follow_id, DispatchStage::Received);
            self.record(TelemetryEvent::PackageTriggered { query_id: follow_id });
            match self.deliver(follow_id, None, next, None, true, Instant::now()).await {
                Ok(delivery) => pending = delivery.continuation,
                Err(e) => {
                    warn!("Follow-up of {} failed: {}", id, e);
                    self.abort(follow_id, None, true).await;
                }
            }
        }
    }
}

/// Accepts queries from any interface and runs each on its own task.
///
/// Results are delivered in completion order. Interfaces that want one answer at a
/// time await each [`QueryTicket`] before sending the next query.
#[derive(Clone)]
pub struct QueryDispatcher {
    inner: Arc<Inner>,
}

impl QueryDispatcher {
    pub fn new(arbitrator: ConfidenceArbitrator, pipeline: FormatPipeline, listener_timeout: Option<Duration>) -> Self {
        Self::with_shutdown(arbitrator, pipeline, listener_timeout, CancellationToken::new())
    }

    pub fn with_shutdown(
        arbitrator: ConfidenceArbitrator,
        pipeline: FormatPipeline,
        listener_timeout: Option<Duration>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                arbitrator,
                pipeline,
                query_listeners: RwLock::new(Vec::new()),
                response_listeners: RwLock::new(Vec::new()),
                stages: Mutex::new(HashMap::new()),
                telemetry: Mutex::new(TelemetryRecorder::new()),
                listener_timeout,
                shutdown,
            }),
        }
    }

    /// Called with each query as it is received, before resolution.
    pub fn on_query<F>(&self, listener: F)
    where
        F: Fn(QueryId, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner
            .query_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }

    /// Called after rendering, in registration order. A failing, panicking or
    /// timed-out listener is logged and skipped.
    pub fn on_response<F>(&self, listener: F)
    where
        F: Fn(&Response) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner
            .response_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }

    /// Must be called from within a Tokio runtime.
    pub fn send_query(&self, text: impl Into<String>) -> QueryTicket {
        let text = text.into();
        let id = Uuid::new_v4();
        debug!("Received query {}", id);
        self.spawn(id, Work::Query(text), TelemetryEvent::QueryReceived { query_id: id })
    }

    /// Render and deliver a package produced outside of a query.
    pub fn send_package(&self, package: ResultPackage) -> QueryTicket {
        let id = Uuid::new_v4();
        debug!("Triggered package {} for {}", id, package.action);
        self.spawn(id, Work::Package(package), TelemetryEvent::PackageTriggered { query_id: id })
    }

    fn spawn(&self, id: QueryId, work: Work, event: TelemetryEvent) -> QueryTicket {
        let (tx, rx) = oneshot::channel();
        if self.inner.shutdown.is_cancelled() {
            let _ = tx.send(Err(EngineError::Shutdown));
            return QueryTicket { id, rx };
        }

        self.inner.set_stage(id, DispatchStage::Received);
        self.inner.record(event);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.process(id, work, tx));
        QueryTicket { id, rx }
    }

    pub fn stage(&self, id: QueryId) -> Option<DispatchStage> {
        lock(&self.inner.stages).get(&id).copied()
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.inner.stages).len()
    }

    pub fn engine_state(&self) -> EngineState {
        let stages: Vec<DispatchStage> = lock(&self.inner.stages).values().copied().collect();
        EngineState::derive(stages, self.inner.pipeline.is_held())
    }

    pub fn pipeline(&self) -> &FormatPipeline {
        &self.inner.pipeline
    }

    pub fn arbitrator(&self) -> &ConfidenceArbitrator {
        &self.inner.arbitrator
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        lock(&self.inner.telemetry).snapshot()
    }

    /// Recorded events of one dispatch, oldest first.
    pub fn trail(&self, id: QueryId) -> Vec<TelemetryEvent> {
        lock(&self.inner.telemetry).trail(id)
    }

    /// Stop accepting work. Queries already running finish on their own.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("Dispatcher shutting down with {} queries in flight", self.in_flight());
            self.inner.shutdown.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}
