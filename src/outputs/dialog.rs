use rand::thread_rng;
use std::collections::BTreeMap;

use super::template::{candidate_lines, choose_line, TemplateStore};
use super::{Artifact, Renderer};
use crate::error::RenderError;
use crate::kernel::intent::types::IntentName;

pub const DIALOG_EXT: &str = "dialog";

/// Turns result data into one spoken sentence from `<intent>.dialog`.
/// While the pipeline is held, sentences from successive packages accumulate.
pub struct DialogRenderer {
    store: TemplateStore,
    sentences: Vec<String>,
}

impl DialogRenderer {
    pub fn new(store: TemplateStore) -> Self {
        Self {
            store,
            sentences: Vec::new(),
        }
    }
}

impl Renderer for DialogRenderer {
    fn name(&self) -> &str {
        "dialog"
    }

    fn reset(&mut self) {
        self.sentences.clear();
    }

    fn generate(&mut self, action: &IntentName, data: &BTreeMap<String, String>) -> Result<(), RenderError> {
        let Some(lines) = self.store.lines(action, DIALOG_EXT)? else {
            return Ok(());
        };
        let candidates = candidate_lines(&lines, data);
        if let Some(sentence) = choose_line(&candidates, &mut thread_rng()) {
            self.sentences.push(sentence);
        }
        Ok(())
    }

    fn read_output(&self) -> Artifact {
        if self.sentences.is_empty() {
            Artifact::Empty
        } else {
            Artifact::Text(self.sentences.join(" "))
        }
    }
}
