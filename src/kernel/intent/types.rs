use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Slot values captured by a backend, keyed by slot name.
pub type Slots = HashMap<String, String>;

/// Skill-qualified intent identity. String form is `skill:intent`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntentName {
    pub skill: String,
    pub intent: String,
}

impl IntentName {
    pub fn new(skill: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            skill: skill.into(),
            intent: intent.into(),
        }
    }

    /// Name used for a skill's fallback entry.
    pub fn fallback(skill: impl Into<String>) -> Self {
        Self::new(skill, "fallback")
    }

    pub fn is_empty(&self) -> bool {
        self.skill.is_empty() && self.intent.is_empty()
    }
}

impl fmt::Display for IntentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.skill, self.intent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIntentNameError(pub String);

impl fmt::Display for ParseIntentNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not of the form skill:intent", self.0)
    }
}

impl std::error::Error for ParseIntentNameError {}

impl FromStr for IntentName {
    type Err = ParseIntentNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((skill, intent)) if !intent.contains(':') => Ok(Self::new(skill, intent)),
            _ => Err(ParseIntentNameError(s.to_string())),
        }
    }
}

/// One backend's opinion about one intent for one query.
/// Created fresh per dispatch and dropped after arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentMatch {
    pub name: IntentName,
    pub confidence: f32, // 0.0 to 1.0
    pub slots: Slots,
    pub query: String,
}

impl IntentMatch {
    pub fn new(name: IntentName, confidence: f32, query: impl Into<String>) -> Self {
        Self {
            name,
            confidence,
            slots: Slots::new(),
            query: query.into(),
        }
    }

    /// Candidate handed to fallbacks: the raw query and no backend opinion.
    pub fn raw(name: IntentName, query: impl Into<String>) -> Self {
        Self::new(name, 1.0, query)
    }

    pub fn with_slot(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.slots.insert(key.into(), value.into());
        self
    }

    pub fn slot(&self, key: &str) -> Option<&str> {
        self.slots.get(key).map(String::as_str)
    }
}

/// Clamp a confidence coming from untrusted code into [0, 1]. NaN counts as 0.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Engine-specific description of how an intent is matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentPattern {
    /// Inline utterance templates with `{slot}` captures.
    Templates(Vec<String>),
    /// Phrases that must (required) or may (optional) appear.
    Keywords {
        required: Vec<String>,
        optional: Vec<String>,
    },
    /// Patterns live in the skill's `<intent>.intent` vocabulary file.
    Vocab,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentSpec {
    pub name: String,
    pub pattern: IntentPattern,
}

impl IntentSpec {
    pub fn templates<S: AsRef<str>>(name: impl Into<String>, templates: &[S]) -> Self {
        Self {
            name: name.into(),
            pattern: IntentPattern::Templates(
                templates.iter().map(|t| t.as_ref().to_string()).collect(),
            ),
        }
    }

    pub fn keywords<S: AsRef<str>>(name: impl Into<String>, required: &[S], optional: &[S]) -> Self {
        Self {
            name: name.into(),
            pattern: IntentPattern::Keywords {
                required: required.iter().map(|k| k.as_ref().to_lowercase()).collect(),
                optional: optional.iter().map(|k| k.as_ref().to_lowercase()).collect(),
            },
        }
    }

    pub fn vocab(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: IntentPattern::Vocab,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_name_string_form() {
        let name = IntentName::new("time", "date");
        assert_eq!(name.to_string(), "time:date");
        assert_eq!("time:date".parse::<IntentName>(), Ok(name));
        assert!("no-separator".parse::<IntentName>().is_err());
        assert!("a:b:c".parse::<IntentName>().is_err());
    }

    #[test]
    fn test_intent_name_equality_uses_both_fields() {
        let a = IntentName::new("timer", "stop");
        let b = IntentName::new("timer", "stop");
        let c = IntentName::new("music", "stop");
        assert_eq!(a, b);
        assert_eq!(b, a);
        assert_ne!(a, c);
    }

    #[test]
    fn test_clamp_confidence_guards_bad_backends() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f32::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }
}
