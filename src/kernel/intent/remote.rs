//! Adapter for an out-of-process matcher speaking newline-delimited JSON over TCP.
//!
//! Requests:  `{"seq":n,"request":"hello"}`, `{"seq":n,"request":"register_intent","name":..,"file_name":..}`,
//!            `{"seq":n,"request":"train"}`, `{"seq":n,"request":"calc_intents","query":..}`
//! Replies:   `{"seq":n,"status":"ready"}`, `{"seq":n,"status":"trained"}`,
//!            `{"seq":n,"matches":[{"name","conf","matches"}]}`
//! `register_intent` has no reply. A reply whose `seq` is not the one awaited
//! answers an earlier, abandoned request and is discarded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::backend::MatchBackend;
use super::types::{IntentMatch, IntentName, IntentPattern, IntentSpec};
use crate::config::VocabPaths;
use crate::error::{EngineError, EngineResult};

const BACKEND_NAME: &str = "remote";

#[derive(Debug, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
enum Request<'a> {
    Hello,
    RegisterIntent { name: String, file_name: String },
    Train,
    CalcIntents { query: &'a str },
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    seq: u64,
    #[serde(flatten)]
    request: &'a Request<'a>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    seq: Option<u64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    matches: Vec<RemoteMatch>,
}

#[derive(Debug, Deserialize)]
struct RemoteMatch {
    name: String,
    conf: f32,
    #[serde(default)]
    matches: HashMap<String, String>,
}

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    next_seq: u64,
    /// Bytes of a reply line cut off by a read timeout.
    partial: String,
}

impl Connection {
    fn new(stream: TcpStream) -> io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
            next_seq: 0,
            partial: String::new(),
        })
    }

    /// Returns the sequence number the reply must carry.
    fn send(&mut self, request: &Request<'_>) -> io::Result<u64> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let mut line = serde_json::to_string(&Envelope { seq, request })?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(seq)
    }

    /// Waits up to `timeout` for the reply to `seq`, skipping replies to earlier
    /// requests that arrived after their caller gave up.
    fn read_reply(&mut self, seq: u64, timeout: Duration) -> io::Result<Reply> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no reply from matcher"));
            }
            self.reader.get_ref().set_read_timeout(Some(remaining))?;
            let read = self.reader.read_line(&mut self.partial)?;
            if read == 0 && !self.partial.ends_with('\n') {
                self.partial.clear();
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "matcher closed the connection"));
            }

            let line = std::mem::take(&mut self.partial);
            let reply: Reply = serde_json::from_str(line.trim())?;
            match reply.seq {
                Some(got) if got == seq => return Ok(reply),
                got => debug!("Discarding matcher reply {:?} while waiting for {}", got, seq),
            }
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn unavailable(reason: impl ToString) -> EngineError {
    EngineError::BackendUnavailable {
        backend: BACKEND_NAME.to_string(),
        reason: reason.to_string(),
    }
}

fn failed(reason: impl ToString) -> EngineError {
    EngineError::Backend {
        backend: BACKEND_NAME.to_string(),
        reason: reason.to_string(),
    }
}

pub struct RemoteBackend {
    paths: VocabPaths,
    query_timeout: Duration,
    compile_warn: Duration,
    conn: Mutex<Connection>,
}

impl RemoteBackend {
    /// Connects and completes the handshake within `handshake`, or fails with
    /// `EngineError::BackendUnavailable`.
    pub fn connect(
        addr: &str,
        paths: VocabPaths,
        handshake: Duration,
        query_timeout: Duration,
        compile_warn: Duration,
    ) -> EngineResult<Self> {
        let socket = addr
            .to_socket_addrs()
            .map_err(unavailable)?
            .next()
            .ok_or_else(|| unavailable(format!("'{}' resolves to no address", addr)))?;

        let stream = TcpStream::connect_timeout(&socket, handshake).map_err(unavailable)?;
        stream.set_nodelay(true).map_err(unavailable)?;
        let mut conn = Connection::new(stream).map_err(unavailable)?;

        let seq = conn.send(&Request::Hello).map_err(unavailable)?;
        let reply = conn.read_reply(seq, handshake).map_err(unavailable)?;
        if reply.status.as_deref() != Some("ready") {
            return Err(unavailable(format!("unexpected handshake reply {:?}", reply.status)));
        }
        info!("Connected to external matcher at {}", addr);

        Ok(Self {
            paths,
            query_timeout,
            compile_warn,
            conn: Mutex::new(conn),
        })
    }
}

impl MatchBackend for RemoteBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn register(&self, skill: &str, spec: &IntentSpec) -> Option<IntentName> {
        if spec.pattern != IntentPattern::Vocab {
            return None;
        }
        let file = self.paths.intent_file(skill, &spec.name);
        if !file.is_file() {
            return None;
        }

        let name = IntentName::new(skill, spec.name.clone());
        let request = Request::RegisterIntent {
            name: name.to_string(),
            file_name: file.to_string_lossy().into_owned(),
        };
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        match conn.send(&request) {
            Ok(_) => Some(name),
            Err(e) => {
                warn!("External matcher refused {}: {}", name, e);
                None
            }
        }
    }

    fn compile(&self, timeout: Duration) -> EngineResult<()> {
        let started = Instant::now();
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let seq = conn.send(&Request::Train).map_err(failed)?;
        info!("Training external matcher...");

        let first_wait = self.compile_warn.min(timeout);
        let reply = match conn.read_reply(seq, first_wait) {
            Ok(reply) => reply,
            Err(e) if is_timeout(&e) && first_wait < timeout => {
                warn!("Taking longer than expected to train external matcher...");
                let remaining = timeout.saturating_sub(started.elapsed()).max(Duration::from_millis(1));
                match conn.read_reply(seq, remaining) {
                    Ok(reply) => reply,
                    Err(e) if is_timeout(&e) => {
                        return Err(EngineError::CompileTimeout {
                            backend: BACKEND_NAME.to_string(),
                            timeout,
                        })
                    }
                    Err(e) => return Err(failed(e)),
                }
            }
            Err(e) if is_timeout(&e) => {
                return Err(EngineError::CompileTimeout {
                    backend: BACKEND_NAME.to_string(),
                    timeout,
                })
            }
            Err(e) => return Err(failed(e)),
        };

        if let Some(error) = reply.error {
            return Err(failed(error));
        }
        info!("Training complete in {:?}", started.elapsed());
        Ok(())
    }

    fn matches(&self, query: &str) -> EngineResult<Vec<IntentMatch>> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let seq = conn.send(&Request::CalcIntents { query }).map_err(failed)?;
        let reply = conn.read_reply(seq, self.query_timeout).map_err(failed)?;
        if let Some(error) = reply.error {
            return Err(failed(error));
        }

        let mut found = Vec::with_capacity(reply.matches.len());
        for m in reply.matches {
            match m.name.parse::<IntentName>() {
                Ok(name) => {
                    let mut candidate = IntentMatch::new(name, m.conf, query);
                    candidate.slots = m.matches;
                    found.push(candidate);
                }
                Err(e) => debug!("Skipping external match: {}", e),
            }
        }
        Ok(found)
    }
}
