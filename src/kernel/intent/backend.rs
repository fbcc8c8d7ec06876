use regex::Regex;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

use super::types::{IntentMatch, IntentName, IntentPattern, IntentSpec, Slots};
use crate::config::VocabPaths;
use crate::error::EngineResult;

/// A pluggable matcher turning free text into scored intent candidates.
pub trait MatchBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `None` when this backend cannot represent `spec`; the registry then
    /// tries the next backend.
    fn register(&self, skill: &str, spec: &IntentSpec) -> Option<IntentName>;

    fn matches(&self, query: &str) -> EngineResult<Vec<IntentMatch>>;

    /// Runs once after every skill has registered. Must give up after `timeout`.
    fn compile(&self, _timeout: Duration) -> EngineResult<()> {
        Ok(())
    }
}

/// Lowercase and strip punctuation at word edges.
pub fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

pub fn normalize_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(normalize_word)
        .filter(|w| !w.is_empty())
        .collect()
}

fn is_slot_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

const FULL_MATCH: f32 = 1.0;
const FULL_MATCH_WITH_SLOTS: f32 = 0.95;
const PARTIAL_CEILING: f32 = 0.8;

struct CompiledTemplate {
    regex: Regex,
    literals: Vec<String>,
    slot_count: usize,
}

impl CompiledTemplate {
    fn compile(template: &str) -> Option<Self> {
        let mut parts = Vec::new();
        let mut literals = Vec::new();
        let mut slot_count = 0;

        for token in template.split_whitespace() {
            let token = token.trim_end_matches(|c: char| c.is_ascii_punctuation() && c != '}');
            if let Some(slot) = token.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
                if !is_slot_name(slot) {
                    warn!("Template '{}' has invalid slot '{}'", template, slot);
                    return None;
                }
                parts.push(format!("(?P<{}>.+?)", slot));
                slot_count += 1;
            } else {
                let word = normalize_word(token);
                if word.is_empty() {
                    continue;
                }
                parts.push(regex::escape(&word));
                literals.push(word);
            }
        }

        if parts.is_empty() {
            return None;
        }

        match Regex::new(&format!("^{}$", parts.join(" "))) {
            Ok(regex) => Some(Self {
                regex,
                literals,
                slot_count,
            }),
            Err(e) => {
                warn!("Template '{}' rejected: {}", template, e);
                None
            }
        }
    }

    fn score(&self, words: &[String], joined: &str) -> Option<(f32, Slots)> {
        if let Some(caps) = self.regex.captures(joined) {
            let slots = self
                .regex
                .capture_names()
                .flatten()
                .filter_map(|n| caps.name(n).map(|m| (n.to_string(), m.as_str().to_string())))
                .collect();
            let confidence = if self.slot_count == 0 {
                FULL_MATCH
            } else {
                FULL_MATCH_WITH_SLOTS
            };
            return Some((confidence, slots));
        }

        if self.literals.is_empty() || words.is_empty() {
            return None;
        }
        let matched = self.literals.iter().filter(|l| words.contains(l)).count();
        if matched == 0 {
            return None;
        }
        let covered = words.iter().filter(|w| self.literals.contains(w)).count();
        let confidence = PARTIAL_CEILING
            * (matched as f32 / self.literals.len() as f32)
            * (covered as f32 / words.len() as f32);
        Some((confidence, Slots::new()))
    }
}

struct PatternEntry {
    name: IntentName,
    templates: Vec<CompiledTemplate>,
}

/// Template matcher: literal words plus `{slot}` captures.
/// Accepts inline templates, or `.intent` vocabulary files when paths are configured.
pub struct PatternBackend {
    paths: Option<VocabPaths>,
    entries: RwLock<Vec<PatternEntry>>,
}

impl PatternBackend {
    pub fn new() -> Self {
        Self {
            paths: None,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn with_vocab(paths: VocabPaths) -> Self {
        Self {
            paths: Some(paths),
            entries: RwLock::new(Vec::new()),
        }
    }

    fn load_vocab(&self, skill: &str, intent: &str) -> Option<Vec<String>> {
        let path = self.paths.as_ref()?.intent_file(skill, intent);
        let text = std::fs::read_to_string(&path).ok()?;
        let lines: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(String::from)
            .collect();
        debug!("Loaded {} patterns from {}", lines.len(), path.display());
        Some(lines)
    }
}

impl Default for PatternBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchBackend for PatternBackend {
    fn name(&self) -> &str {
        "pattern"
    }

    fn register(&self, skill: &str, spec: &IntentSpec) -> Option<IntentName> {
        let sources = match &spec.pattern {
            IntentPattern::Templates(templates) => templates.clone(),
            IntentPattern::Vocab => self.load_vocab(skill, &spec.name)?,
            IntentPattern::Keywords { .. } => return None,
        };

        let templates: Vec<CompiledTemplate> = sources
            .iter()
            .filter_map(|t| CompiledTemplate::compile(t))
            .collect();
        if templates.is_empty() {
            return None;
        }

        let name = IntentName::new(skill, spec.name.clone());
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|e| e.name != name);
        entries.push(PatternEntry {
            name: name.clone(),
            templates,
        });
        Some(name)
    }

    fn matches(&self, query: &str) -> EngineResult<Vec<IntentMatch>> {
        let words = normalize_words(query);
        let joined = words.join(" ");
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());

        let mut found = Vec::new();
        for entry in entries.iter() {
            let mut best: Option<(f32, Slots)> = None;
            for template in &entry.templates {
                if let Some((confidence, slots)) = template.score(&words, &joined) {
                    if best.as_ref().map_or(true, |(b, _)| confidence > *b) {
                        best = Some((confidence, slots));
                    }
                }
            }
            if let Some((confidence, slots)) = best {
                let mut candidate = IntentMatch::new(entry.name.clone(), confidence, query);
                candidate.slots = slots;
                found.push(candidate);
            }
        }
        Ok(found)
    }
}

struct KeywordEntry {
    name: IntentName,
    required: Vec<Vec<String>>,
    optional: Vec<Vec<String>>,
}

fn contains_phrase(words: &[String], phrase: &[String]) -> bool {
    !phrase.is_empty() && words.windows(phrase.len()).any(|w| w == phrase)
}

/// Keyword matcher: every required phrase must appear, optional phrases add confidence.
pub struct KeywordBackend {
    entries: RwLock<Vec<KeywordEntry>>,
}

impl KeywordBackend {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl Default for KeywordBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchBackend for KeywordBackend {
    fn name(&self) -> &str {
        "keyword"
    }

    fn register(&self, skill: &str, spec: &IntentSpec) -> Option<IntentName> {
        let IntentPattern::Keywords { required, optional } = &spec.pattern else {
            return None;
        };
        let required: Vec<Vec<String>> = required
            .iter()
            .map(|p| normalize_words(p))
            .filter(|p| !p.is_empty())
            .collect();
        if required.is_empty() {
            return None;
        }
        let optional = optional
            .iter()
            .map(|p| normalize_words(p))
            .filter(|p| !p.is_empty())
            .collect();

        let name = IntentName::new(skill, spec.name.clone());
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|e| e.name != name);
        entries.push(KeywordEntry {
            name: name.clone(),
            required,
            optional,
        });
        Some(name)
    }

    fn matches(&self, query: &str) -> EngineResult<Vec<IntentMatch>> {
        let words = normalize_words(query);
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());

        let found = entries
            .iter()
            .filter(|e| e.required.iter().all(|p| contains_phrase(&words, p)))
            .map(|e| {
                let confidence = if e.optional.is_empty() {
                    0.9
                } else {
                    let hits = e.optional.iter().filter(|p| contains_phrase(&words, p)).count();
                    0.75 + 0.25 * (hits as f32 / e.optional.len() as f32)
                };
                IntentMatch::new(e.name.clone(), confidence, query)
            })
            .collect();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_full_match_captures_slots() {
        let backend = PatternBackend::new();
        let spec = IntentSpec::templates("set.timer", &["set a timer for {number} {unit}"]);
        assert_eq!(
            backend.register("timer", &spec),
            Some(IntentName::new("timer", "set.timer"))
        );

        let found = backend.matches("Set a timer for 5 minutes!").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].confidence, FULL_MATCH_WITH_SLOTS);
        assert_eq!(found[0].slot("number"), Some("5"));
        assert_eq!(found[0].slot("unit"), Some("minutes"));
    }

    #[test]
    fn test_pattern_partial_overlap_stays_below_ceiling() {
        let backend = PatternBackend::new();
        backend.register("time", &IntentSpec::templates("time", &["what time is it"]));

        let found = backend.matches("time please").unwrap();
        assert_eq!(found.len(), 1);
        // 1 of 4 literals matched, 1 of 2 query words covered
        assert!((found[0].confidence - 0.8 * 0.25 * 0.5).abs() < 1e-6);
        assert!(backend.matches("play some music").unwrap().is_empty());
    }

    #[test]
    fn test_pattern_rejects_other_specs() {
        let backend = PatternBackend::new();
        let keywords = IntentSpec::keywords("weather", &["weather"], &[]);
        assert_eq!(backend.register("weather", &keywords), None);
        // no vocab paths configured
        assert_eq!(backend.register("weather", &IntentSpec::vocab("weather")), None);
        assert_eq!(backend.register("bad", &IntentSpec::templates("x", &["{1bad}"])), None);
    }

    #[test]
    fn test_keyword_required_and_optional() {
        let backend = KeywordBackend::new();
        let spec = IntentSpec::keywords("weather", &["weather"], &["today", "tomorrow"]);
        backend.register("weather", &spec);

        let found = backend.matches("what's the weather today?").unwrap();
        assert_eq!(found.len(), 1);
        assert!((found[0].confidence - 0.875).abs() < 1e-6);
        assert!(backend.matches("is it raining").unwrap().is_empty());
    }
}
