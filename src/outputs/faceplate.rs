use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use super::template::{is_resolved, substitute, TemplateStore};
use super::{Artifact, Renderer};
use crate::error::RenderError;
use crate::kernel::intent::types::IntentName;

pub const FACEPLATE_EXT: &str = "faceplate";

/// Destination for display commands, typically a serial driver.
pub trait FaceplateSink: Send + Sync {
    fn command(&self, line: &str) -> Result<(), RenderError>;
}

/// Writes commands to the log. Used when no display is attached.
#[derive(Debug, Default)]
pub struct LogSink;

impl FaceplateSink for LogSink {
    fn command(&self, line: &str) -> Result<(), RenderError> {
        info!(target: "faceplate", "{}", line);
        Ok(())
    }
}

/// Forwards commands to an async consumer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FaceplateSink for ChannelSink {
    fn command(&self, line: &str) -> Result<(), RenderError> {
        self.tx
            .send(line.to_string())
            .map_err(|_| RenderError::Sink("faceplate receiver dropped".into()))
    }
}

/// Sends every fully resolved, non-empty line of `<intent>.faceplate` to the sink.
pub struct FaceplateRenderer {
    store: TemplateStore,
    sink: Arc<dyn FaceplateSink>,
    sent: Vec<String>,
}

impl FaceplateRenderer {
    pub fn new(store: TemplateStore, sink: Arc<dyn FaceplateSink>) -> Self {
        Self {
            store,
            sink,
            sent: Vec::new(),
        }
    }

    /// Send a command outside of any template.
    pub fn command(&mut self, line: &str) -> Result<(), RenderError> {
        self.sink.command(line)?;
        self.sent.push(line.to_string());
        Ok(())
    }
}

impl Renderer for FaceplateRenderer {
    fn name(&self) -> &str {
        "faceplate"
    }

    fn reset(&mut self) {
        self.sent.clear();
    }

    fn generate(&mut self, action: &IntentName, data: &BTreeMap<String, String>) -> Result<(), RenderError> {
        let Some(lines) = self.store.lines(action, FACEPLATE_EXT)? else {
            return Ok(());
        };
        for line in lines {
            let line = substitute(&line, data);
            let line = line.trim();
            if !line.is_empty() && is_resolved(line) {
                self.command(line)?;
            }
        }
        Ok(())
    }

    fn read_output(&self) -> Artifact {
        if self.sent.is_empty() {
            Artifact::Empty
        } else {
            Artifact::Commands(self.sent.clone())
        }
    }
}
