use aide::config::VocabPaths;
use aide::error::EngineError;
use aide::kernel::intent::arbitrator::ConfidenceArbitrator;
use aide::kernel::intent::backend::MatchBackend;
use aide::kernel::intent::handler::Handler;
use aide::kernel::intent::registry::IntentRegistry;
use aide::kernel::intent::remote::RemoteBackend;
use aide::kernel::intent::types::{IntentName, IntentSpec};
use serde_json::{json, Value};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Copy)]
enum Matcher {
    Cooperative,
    NeverTrains,
    Mute,
    /// Answers `calc_intents` with `echo:<query>`; the first answer comes late.
    SlowFirstAnswer,
}

/// Fake matcher process. Returns every request it saw once the client hangs up.
fn spawn_matcher(behaviour: Matcher) -> (String, JoinHandle<Vec<Value>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let reader = BufReader::new(stream);
        let mut seen = Vec::new();
        let mut answered = 0;

        for line in reader.lines() {
            let Ok(line) = line else { break };
            let request: Value = serde_json::from_str(&line).unwrap();
            let reply = match (behaviour, request["request"].as_str()) {
                (Matcher::Mute, _) => None,
                (_, Some("hello")) => Some(json!({ "status": "ready" })),
                (Matcher::Cooperative, Some("train")) => Some(json!({ "status": "trained" })),
                (Matcher::SlowFirstAnswer, Some("calc_intents")) => {
                    answered += 1;
                    if answered == 1 {
                        thread::sleep(Duration::from_millis(300));
                    }
                    let query = request["query"].as_str().unwrap().replace(' ', "_");
                    Some(json!({ "matches": [{ "name": format!("echo:{}", query), "conf": 0.9 }] }))
                }
                (_, Some("calc_intents")) => Some(json!({
                    "matches": [
                        { "name": "greet:hello", "conf": 0.9, "matches": { "name": "ann" } },
                        { "name": "not-namespaced", "conf": 1.0 }
                    ]
                })),
                _ => None,
            };
            let reply = reply.map(|mut reply| {
                reply["seq"] = request["seq"].clone();
                reply
            });
            seen.push(request);
            if let Some(reply) = reply {
                writeln!(writer, "{}", reply).unwrap();
            }
        }
        seen
    });
    (addr, handle)
}

fn vocab() -> (TempDir, VocabPaths) {
    let dir = tempfile::tempdir().unwrap();
    let paths = VocabPaths::new(dir.path(), "en-us");
    fs::create_dir_all(paths.skill_dir("greet")).unwrap();
    fs::write(paths.intent_file("greet", "hello"), "hello {name}\n").unwrap();
    (dir, paths)
}

fn connect(addr: &str, paths: VocabPaths) -> Result<RemoteBackend, EngineError> {
    RemoteBackend::connect(
        addr,
        paths,
        Duration::from_millis(200),
        Duration::from_millis(500),
        Duration::from_millis(50),
    )
}

#[tokio::test]
async fn test_register_train_and_match() {
    let (_dir, paths) = vocab();
    let (addr, server) = spawn_matcher(Matcher::Cooperative);
    let remote = connect(&addr, paths).unwrap();

    // 1. Only vocab-file intents are representable
    assert_eq!(remote.register("greet", &IntentSpec::templates("hi", &["hi"])), None);
    assert_eq!(remote.register("greet", &IntentSpec::vocab("missing")), None);

    // 2. Register through the registry, then compile
    let mut registry = IntentRegistry::new(vec![Arc::new(remote)]);
    registry
        .register(
            "greet",
            &IntentSpec::vocab("hello"),
            Handler::from_result(|candidate, package| {
                package.add_result("name", candidate.slot("name").unwrap_or("?"));
                Ok(())
            }),
        )
        .unwrap();
    registry.compile(Duration::from_secs(2)).await.unwrap();

    // 3. Matches come back with slots; bad names are skipped
    let arbitrator = ConfidenceArbitrator::new(Arc::new(registry));
    let ranking = arbitrator.rank("Hello Ann");
    assert_eq!(ranking.considered, 1);
    let best = ranking.best().unwrap();
    assert_eq!(best.candidate.name, IntentName::new("greet", "hello"));
    assert_eq!(best.candidate.slot("name"), Some("ann"));

    let package = arbitrator.commit(ranking).resolution.into_package();
    assert_eq!(package.string_data()["name"], "ann");

    drop(arbitrator);
    let seen = server.join().unwrap();
    let kinds: Vec<&str> = seen.iter().filter_map(|r| r["request"].as_str()).collect();
    assert_eq!(kinds, vec!["hello", "register_intent", "train", "calc_intents"]);
    assert_eq!(seen[1]["name"], "greet:hello");
    assert!(seen[1]["file_name"].as_str().unwrap().ends_with("hello.intent"));
    assert_eq!(seen[3]["query"], "hello ann");
}

#[test]
fn test_late_answer_is_not_given_to_the_next_query() {
    let (_dir, paths) = vocab();
    let (addr, server) = spawn_matcher(Matcher::SlowFirstAnswer);
    let remote = RemoteBackend::connect(
        &addr,
        paths,
        Duration::from_millis(200),
        Duration::from_millis(100),
        Duration::from_millis(50),
    )
    .unwrap();

    // 1. First answer misses the query bound
    let first = remote.matches("first query");
    assert!(matches!(first, Err(EngineError::Backend { .. })), "got {:?}", first);

    // 2. Let the late answer land in the socket, then ask again
    thread::sleep(Duration::from_millis(300));
    let names: Vec<String> = remote
        .matches("second query")
        .unwrap()
        .into_iter()
        .map(|m| m.name.to_string())
        .collect();
    assert_eq!(names, vec!["echo:second_query"]);

    // 3. The connection stays usable
    let third = remote.matches("third query").unwrap();
    assert_eq!(third[0].name, IntentName::new("echo", "third_query"));

    drop(remote);
    let seen = server.join().unwrap();
    let seqs: Vec<u64> = seen.iter().filter_map(|r| r["seq"].as_u64()).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3], "every request carries a fresh sequence number");
}

#[test]
fn test_training_overrun_is_compile_timeout() {
    let (_dir, paths) = vocab();
    let (addr, server) = spawn_matcher(Matcher::NeverTrains);
    let remote = connect(&addr, paths).unwrap();

    let result = remote.compile(Duration::from_millis(200));
    assert!(
        matches!(result, Err(EngineError::CompileTimeout { ref backend, .. }) if backend == "remote"),
        "got {:?}",
        result
    );

    drop(remote);
    server.join().unwrap();
}

#[test]
fn test_silent_matcher_is_unavailable() {
    let (_dir, paths) = vocab();
    let (addr, server) = spawn_matcher(Matcher::Mute);

    let result = connect(&addr, paths);
    assert!(matches!(result, Err(EngineError::BackendUnavailable { .. })));
    server.join().unwrap();
}

#[test]
fn test_closed_port_is_unavailable() {
    let (_dir, paths) = vocab();
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let result = connect(&addr, paths);
    assert!(matches!(result, Err(EngineError::BackendUnavailable { .. })));
}
