use rand::seq::SliceRandom;
use rand::Rng;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::io;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::config::VocabPaths;
use crate::error::RenderError;
use crate::kernel::intent::types::IntentName;

static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();

fn placeholder() -> Option<&'static Regex> {
    PLACEHOLDER
        .get_or_init(|| match Regex::new(r"\{([^{}]*)\}") {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Placeholder pattern rejected, templates render verbatim: {}", e);
                None
            }
        })
        .as_ref()
}

/// Replace every `{key}` that has a value in `data`. Unknown keys are left in place.
pub fn substitute(line: &str, data: &BTreeMap<String, String>) -> String {
    let Some(placeholder) = placeholder() else {
        return line.to_string();
    };
    placeholder
        .replace_all(line, |caps: &Captures<'_>| match data.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

pub fn is_resolved(line: &str) -> bool {
    !line.contains('{') && !line.contains('}')
}

/// Substituted lines, keeping only fully resolved ones unless none are.
pub fn candidate_lines(lines: &[String], data: &BTreeMap<String, String>) -> Vec<String> {
    let substituted: Vec<String> = lines.iter().map(|l| substitute(l, data)).collect();
    let resolved: Vec<String> = substituted
        .iter()
        .filter(|l| is_resolved(l))
        .map(|l| l.trim().to_string())
        .collect();
    if resolved.is_empty() {
        substituted.into_iter().map(|l| l.trim().to_string()).collect()
    } else {
        resolved
    }
}

/// One line, picked uniformly.
pub fn choose_line<R: Rng + ?Sized>(candidates: &[String], rng: &mut R) -> Option<String> {
    candidates.choose(rng).cloned()
}

/// Reads per-intent template files from the vocabulary tree.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    paths: VocabPaths,
}

impl TemplateStore {
    pub fn new(paths: VocabPaths) -> Self {
        Self { paths }
    }

    /// Non-blank, non-comment lines of `<intent>.<ext>`. A missing file is `Ok(None)`.
    pub fn lines(&self, name: &IntentName, ext: &str) -> Result<Option<Vec<String>>, RenderError> {
        let path = self.paths.file(&name.skill, &name.intent, ext);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No {} template for {}", ext, name);
                return Ok(None);
            }
            Err(e) => return Err(RenderError::Io(e)),
        };
        Ok(Some(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from)
                .collect(),
        ))
    }
}
