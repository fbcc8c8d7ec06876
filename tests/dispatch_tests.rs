use aide::config::VocabPaths;
use aide::error::{EngineError, RenderError};
use aide::kernel::dispatch::{QueryDispatcher, Response};
use aide::kernel::intent::arbitrator::{ConfidenceArbitrator, ResolutionPath};
use aide::kernel::intent::backend::PatternBackend;
use aide::kernel::intent::handler::Handler;
use aide::kernel::intent::package::ResultPackage;
use aide::kernel::intent::registry::IntentRegistry;
use aide::kernel::intent::types::{IntentName, IntentSpec};
use aide::kernel::lifecycle::EngineState;
use aide::kernel::telemetry::TelemetryEvent;
use aide::outputs::{Artifact, DialogRenderer, FormatPipeline, Renderer, TemplateStore};
use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn write_vocab(dir: &TempDir, files: &[(&str, &str, &str)]) -> VocabPaths {
    let paths = VocabPaths::new(dir.path(), "en-us");
    for (skill, file, body) in files {
        let skill_dir = paths.skill_dir(skill);
        fs::create_dir_all(&skill_dir).unwrap();
        fs::write(skill_dir.join(file), body).unwrap();
    }
    paths
}

fn standard_vocab(dir: &TempDir) -> VocabPaths {
    write_vocab(
        dir,
        &[
            ("greet", "hello.dialog", "Hello {name}.\n"),
            ("slow", "wait.dialog", "Done waiting.\n"),
            ("job", "start.dialog", "Job started.\n"),
            ("job", "finished.dialog", "Job finished.\n"),
            ("engine", "no_answer.dialog", "Sorry, I didn't understand.\n"),
        ],
    )
}

fn registry() -> IntentRegistry {
    let mut registry = IntentRegistry::new(vec![Arc::new(PatternBackend::new())]);
    registry
        .register(
            "greet",
            &IntentSpec::templates("hello", &["hello {name}", "hi {name}"]),
            Handler::from_result(|candidate, package| {
                package.add_result("name", candidate.slot("name").unwrap_or("stranger"));
                Ok(())
            }),
        )
        .unwrap();
    registry
        .register(
            "slow",
            &IntentSpec::templates("wait", &["take your time"]),
            Handler::from_result(|_, _| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            }),
        )
        .unwrap();
    registry
        .register(
            "job",
            &IntentSpec::templates("start", &["start the job"]),
            Handler::from_result(|_, package| {
                package.set_continuation(|_| Some(ResultPackage::for_action("job", "finished")));
                Ok(())
            }),
        )
        .unwrap();
    registry
}

fn dispatcher(paths: VocabPaths, extra: Vec<Box<dyn Renderer>>, listener_timeout: Option<Duration>) -> QueryDispatcher {
    let mut renderers: Vec<Box<dyn Renderer>> = extra;
    renderers.push(Box::new(DialogRenderer::new(TemplateStore::new(paths))));
    QueryDispatcher::new(
        ConfidenceArbitrator::new(Arc::new(registry())),
        FormatPipeline::new(renderers),
        listener_timeout,
    )
}

struct UnpluggedRenderer;

impl Renderer for UnpluggedRenderer {
    fn name(&self) -> &str {
        "unplugged"
    }

    fn reset(&mut self) {}

    fn generate(&mut self, _action: &IntentName, _data: &BTreeMap<String, String>) -> Result<(), RenderError> {
        Err(RenderError::Sink("no device".into()))
    }

    fn read_output(&self) -> Artifact {
        Artifact::Empty
    }
}

/// Renders fine but panics when asked for its output.
struct UnreadableRenderer;

impl Renderer for UnreadableRenderer {
    fn name(&self) -> &str {
        "unreadable"
    }

    fn reset(&mut self) {}

    fn generate(&mut self, _action: &IntentName, _data: &BTreeMap<String, String>) -> Result<(), RenderError> {
        Ok(())
    }

    fn read_output(&self) -> Artifact {
        panic!("output buffer corrupted")
    }
}

#[tokio::test]
async fn test_query_is_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let engine = dispatcher(standard_vocab(&dir), vec![], None);

    let ticket = engine.send_query("Hello Ann");
    let id = ticket.id();
    let response = ticket.wait().await.unwrap();

    assert_eq!(response.query_id, id);
    assert_eq!(response.action, IntentName::new("greet", "hello"));
    assert_eq!(response.path, Some(ResolutionPath::Primary));
    assert_eq!(response.dialog(), "Hello ann.", "queries are lowercased before matching");
    assert!(engine.stage(id).is_none(), "delivered queries leave the stage table");
    assert_eq!(engine.engine_state(), EngineState::Idle);

    let snapshot = engine.telemetry();
    assert_eq!(snapshot.resolution_stats.queries, 1);
    assert_eq!(snapshot.resolution_stats.primary, 1);
    assert_eq!(snapshot.delivery_stats.delivered, 1);
}

#[tokio::test]
async fn test_unmatched_query_gets_no_answer() {
    let dir = tempfile::tempdir().unwrap();
    let engine = dispatcher(standard_vocab(&dir), vec![], None);

    let response = engine.send_query("reticulate the splines").wait().await.unwrap();
    assert!(response.is_no_answer());
    assert_eq!(response.action, IntentName::new("engine", "no_answer"));
    assert_eq!(response.dialog(), "Sorry, I didn't understand.");
    assert_eq!(engine.telemetry().resolution_stats.no_match, 1);
}

#[tokio::test]
async fn test_listeners_run_in_registration_order() {
    let dir = tempfile::tempdir().unwrap();
    let engine = dispatcher(standard_vocab(&dir), vec![], None);
    let calls = Arc::new(Mutex::new(Vec::new()));

    let seen_queries = Arc::new(Mutex::new(Vec::new()));
    let sq = Arc::clone(&seen_queries);
    engine.on_query(move |_, text| {
        sq.lock().unwrap().push(text.to_string());
        Ok(())
    });
    for n in 1..=3 {
        let calls = Arc::clone(&calls);
        engine.on_response(move |response: &Response| {
            calls.lock().unwrap().push((n, response.dialog().to_string()));
            Ok(())
        });
    }

    engine.send_query("hi bob").wait().await.unwrap();

    assert_eq!(*seen_queries.lock().unwrap(), vec!["hi bob".to_string()]);
    let calls = calls.lock().unwrap();
    let order: Vec<i32> = calls.iter().map(|(n, _)| *n).collect();
    assert_eq!(order, vec![1, 2, 3]);
    assert!(calls.iter().all(|(_, dialog)| dialog == "Hello bob."));
}

#[tokio::test]
async fn test_failing_and_slow_listeners_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let engine = dispatcher(standard_vocab(&dir), vec![], Some(Duration::from_millis(50)));
    let reached = Arc::new(Mutex::new(false));

    engine.on_response(|_| Err(anyhow::anyhow!("display offline")));
    engine.on_response(|_| panic!("listener bug"));
    engine.on_response(|_| {
        std::thread::sleep(Duration::from_millis(300));
        Ok(())
    });
    let r = Arc::clone(&reached);
    engine.on_response(move |_| {
        *r.lock().unwrap() = true;
        Ok(())
    });

    let response = engine.send_query("hello ann").wait().await.unwrap();
    assert_eq!(response.dialog(), "Hello ann.");
    assert!(*reached.lock().unwrap(), "last listener must still run");

    let failures = engine.telemetry().failure_stats;
    assert_eq!(failures.listener_failures, 3);
    assert_eq!(failures.listener_timeouts, 1);
}

#[tokio::test]
async fn test_failing_renderer_does_not_block_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let engine = dispatcher(standard_vocab(&dir), vec![Box::new(UnpluggedRenderer)], None);
    let delivered = Arc::new(Mutex::new(0));
    let d = Arc::clone(&delivered);
    engine.on_response(move |_| {
        *d.lock().unwrap() += 1;
        Ok(())
    });

    let response = engine.send_query("hello ann").wait().await.unwrap();

    assert_eq!(response.outputs.failures.len(), 1);
    assert_eq!(response.dialog(), "Hello ann.");
    assert_eq!(*delivered.lock().unwrap(), 1, "completion callback must fire");
    assert_eq!(engine.telemetry().failure_stats.renderer_failures, 1);
}

#[tokio::test]
async fn test_unreadable_renderer_still_completes() {
    let engine = QueryDispatcher::new(
        ConfidenceArbitrator::new(Arc::new(registry())),
        FormatPipeline::new(vec![Box::new(UnreadableRenderer)]),
        None,
    );
    let calls = Arc::new(Mutex::new(0));
    let c = Arc::clone(&calls);
    engine.on_response(move |_| {
        *c.lock().unwrap() += 1;
        Ok(())
    });

    let ticket = engine.send_query("hello ann");
    let id = ticket.id();
    let response = ticket.wait().await.unwrap();

    assert_eq!(*calls.lock().unwrap(), 1, "completion callback must fire");
    assert_eq!(response.outputs.get("unreadable"), Some(&Artifact::Empty));
    assert_eq!(response.outputs.failures.len(), 1);

    let trail = engine.trail(id);
    assert!(matches!(trail.first(), Some(TelemetryEvent::QueryReceived { .. })));
    assert!(trail
        .iter()
        .any(|e| matches!(e, TelemetryEvent::RendererFailed { renderer, .. } if renderer == "unreadable")));
    assert!(matches!(trail.last(), Some(TelemetryEvent::Delivered { .. })));
}

#[tokio::test]
async fn test_slow_query_does_not_block_others() {
    let dir = tempfile::tempdir().unwrap();
    let engine = dispatcher(standard_vocab(&dir), vec![], None);
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.on_response(move |response| {
        let _ = tx.send(response.action.clone());
        Ok(())
    });

    let slow = engine.send_query("take your time");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let fast = engine.send_query("hello ann");

    let fast_response = tokio::time::timeout(Duration::from_millis(250), fast.wait())
        .await
        .expect("fast query must not wait for the slow one")
        .unwrap();
    assert_eq!(fast_response.action, IntentName::new("greet", "hello"));
    assert_eq!(engine.in_flight(), 1);
    assert_eq!(engine.engine_state(), EngineState::Dispatched);

    slow.wait().await.unwrap();
    assert_eq!(rx.recv().await, Some(IntentName::new("greet", "hello")), "completion order");
    assert_eq!(rx.recv().await, Some(IntentName::new("slow", "wait")));
}

#[tokio::test]
async fn test_continuation_delivers_follow_up() {
    let dir = tempfile::tempdir().unwrap();
    let engine = dispatcher(standard_vocab(&dir), vec![], None);
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.on_response(move |response| {
        let _ = tx.send(response.clone());
        Ok(())
    });

    let first = engine.send_query("start the job").wait().await.unwrap();
    assert_eq!(first.dialog(), "Job started.");
    assert!(!first.follow_up);

    let _ = rx.recv().await;
    let follow_up = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(follow_up.follow_up);
    assert_eq!(follow_up.action, IntentName::new("job", "finished"));
    assert_eq!(follow_up.dialog(), "Job finished.");
}

#[tokio::test]
async fn test_triggered_package_uses_action_templates() {
    let dir = tempfile::tempdir().unwrap();
    let engine = dispatcher(standard_vocab(&dir), vec![], None);

    let mut package = ResultPackage::for_action("greet", "hello");
    package.add_result("name", "  Grace  ");
    let response = engine.send_package(package).wait().await.unwrap();

    assert_eq!(response.query, None);
    assert_eq!(response.path, None);
    assert_eq!(response.dialog(), "Hello Grace.");
    assert_eq!(engine.telemetry().resolution_stats.triggered, 1);
}

#[tokio::test]
async fn test_held_package_sets_holding_state() {
    let dir = tempfile::tempdir().unwrap();
    let engine = dispatcher(standard_vocab(&dir), vec![], None);

    let mut package = ResultPackage::for_action("job", "start");
    let hold = package.hold();
    engine.send_package(package).wait().await.unwrap();
    assert_eq!(engine.engine_state(), EngineState::Holding);

    let response = engine.send_query("hello ann").wait().await.unwrap();
    assert_eq!(response.dialog(), "Job started. Hello ann.");

    hold.release();
    assert_eq!(engine.engine_state(), EngineState::Idle);
    let response = engine.send_query("hello ann").wait().await.unwrap();
    assert_eq!(response.dialog(), "Hello ann.");
}

#[tokio::test]
async fn test_queries_after_shutdown_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let engine = dispatcher(standard_vocab(&dir), vec![], None);

    engine.shutdown();
    assert!(engine.is_shut_down());
    let result = engine.send_query("hello ann").wait().await;
    assert!(matches!(result, Err(EngineError::Shutdown)));
    assert_eq!(engine.in_flight(), 0);
}
