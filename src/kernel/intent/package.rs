use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::types::IntentName;

/// Structured handler output, keyed for template substitution.
pub type ResultData = BTreeMap<String, Value>;

/// Called with the delivered package. A returned package is delivered as a follow-up.
pub type Continuation = Box<dyn FnOnce(&ResultPackage) -> Option<ResultPackage> + Send>;

pub const NO_ANSWER_SKILL: &str = "engine";
pub const NO_ANSWER_INTENT: &str = "no_answer";

/// Marks a long-running handler that keeps presentation control until released.
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct HoldHandle {
    released: Arc<AtomicBool>,
}

impl HoldHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
    }
}

/// The in-flight result of one dispatch. Owned by exactly one dispatch at a time.
pub struct ResultPackage {
    /// Intent whose handler produced this package.
    pub name: IntentName,
    /// Intent whose templates render this package.
    pub action: IntentName,
    pub data: ResultData,
    pub confidence: f32,
    pub continuation: Option<Continuation>,
    pub hold: Option<HoldHandle>,
}

impl ResultPackage {
    pub fn new(name: IntentName) -> Self {
        Self {
            name,
            action: IntentName::default(),
            data: ResultData::new(),
            confidence: 0.0,
            continuation: None,
            hold: None,
        }
    }

    /// Package for a skill acting outside of a query, rendered with `action`'s templates.
    pub fn for_action(skill: impl Into<String>, action: impl Into<String>) -> Self {
        let name = IntentName::new(skill, action);
        let mut package = Self::new(name.clone());
        package.action = name;
        package
    }

    /// Defined result for a query nobody could answer.
    pub fn no_answer() -> Self {
        Self::for_action(NO_ANSWER_SKILL, NO_ANSWER_INTENT)
    }

    pub fn is_no_answer(&self) -> bool {
        self.action.skill == NO_ANSWER_SKILL && self.action.intent == NO_ANSWER_INTENT
    }

    /// Strings are trimmed; any other JSON value is stored as given.
    pub fn add_result(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let value = match value.into() {
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other,
        };
        self.data.insert(key.into(), value);
    }

    /// Render with a different intent of the same skill.
    pub fn set_action(&mut self, intent: impl Into<String>) {
        self.action = IntentName::new(self.name.skill.clone(), intent);
    }

    pub fn set_continuation<F>(&mut self, continuation: F)
    where
        F: FnOnce(&ResultPackage) -> Option<ResultPackage> + Send + 'static,
    {
        self.continuation = Some(Box::new(continuation));
    }

    /// Mark the package long-running. Keep the returned handle and release it when done.
    pub fn hold(&mut self) -> HoldHandle {
        let handle = self.hold.get_or_insert_with(HoldHandle::new);
        handle.clone()
    }

    /// Fill in the action with `name` unless the handler picked one.
    pub fn default_action(&mut self, name: &IntentName) {
        if self.action.is_empty() {
            self.action = name.clone();
        }
    }

    /// Data flattened to strings, as templates see it.
    pub fn string_data(&self) -> BTreeMap<String, String> {
        self.data
            .iter()
            .map(|(k, v)| (k.clone(), value_to_text(v)))
            .collect()
    }
}

impl fmt::Debug for ResultPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultPackage")
            .field("name", &self.name)
            .field("action", &self.action)
            .field("data", &self.data)
            .field("confidence", &self.confidence)
            .field("continuation", &self.continuation.is_some())
            .field("hold", &self.hold)
            .finish()
    }
}

pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
