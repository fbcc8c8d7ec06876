//! Engine configuration, built once at startup and handed to each component.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | AIDE_VOCAB_DIR | vocab | Root of per-skill vocabulary and template files. |
//! | AIDE_LANG | en-us | Language directory used for lookups. |
//! | AIDE_COMPILE_WARN_SECS | 40 | Compile time after which a warning is logged. |
//! | AIDE_COMPILE_TIMEOUT_SECS | 240 | Compile bound. Exceeding it aborts startup. |
//! | AIDE_HANDSHAKE_TIMEOUT_MS | 4000 | External matcher handshake window. |
//! | AIDE_BACKEND_QUERY_TIMEOUT_MS | 4000 | External matcher per-query bound. |
//! | AIDE_REMOTE_BACKEND | unset | `host:port` of an external matcher process. |
//! | AIDE_LISTENER_TIMEOUT_MS | 5000 | Per response listener bound. `0` disables it. |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

fn default_vocab_dir() -> PathBuf {
    PathBuf::from("vocab")
}

fn default_lang() -> String {
    "en-us".to_string()
}

fn default_compile_warn_secs() -> u64 {
    40
}

fn default_compile_timeout_secs() -> u64 {
    240
}

fn default_handshake_timeout_ms() -> u64 {
    4000
}

fn default_backend_query_timeout_ms() -> u64 {
    4000
}

fn default_listener_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_vocab_dir")]
    pub vocab_dir: PathBuf,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_compile_warn_secs")]
    pub compile_warn_secs: u64,
    #[serde(default = "default_compile_timeout_secs")]
    pub compile_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_backend_query_timeout_ms")]
    pub backend_query_timeout_ms: u64,
    #[serde(default)]
    pub remote_backend: Option<String>,
    #[serde(default = "default_listener_timeout_ms")]
    pub listener_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vocab_dir: default_vocab_dir(),
            lang: default_lang(),
            compile_warn_secs: default_compile_warn_secs(),
            compile_timeout_secs: default_compile_timeout_secs(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            backend_query_timeout_ms: default_backend_query_timeout_ms(),
            remote_backend: None,
            listener_timeout_ms: default_listener_timeout_ms(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by any `AIDE_*` variables that are set.
    pub fn from_env() -> EngineResult<Self> {
        let mut config = Self::default();
        if let Some(dir) = env_var("AIDE_VOCAB_DIR") {
            config.vocab_dir = PathBuf::from(dir);
        }
        if let Some(lang) = env_var("AIDE_LANG") {
            config.lang = lang;
        }
        if let Some(v) = env_parse("AIDE_COMPILE_WARN_SECS")? {
            config.compile_warn_secs = v;
        }
        if let Some(v) = env_parse("AIDE_COMPILE_TIMEOUT_SECS")? {
            config.compile_timeout_secs = v;
        }
        if let Some(v) = env_parse("AIDE_HANDSHAKE_TIMEOUT_MS")? {
            config.handshake_timeout_ms = v;
        }
        if let Some(v) = env_parse("AIDE_BACKEND_QUERY_TIMEOUT_MS")? {
            config.backend_query_timeout_ms = v;
        }
        config.remote_backend = env_var("AIDE_REMOTE_BACKEND");
        if let Some(v) = env_parse("AIDE_LISTENER_TIMEOUT_MS")? {
            config.listener_timeout_ms = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.lang.trim().is_empty() {
            return Err(EngineError::Config("lang must not be empty".into()));
        }
        if self.compile_timeout_secs == 0 {
            return Err(EngineError::Config("compile_timeout_secs must be positive".into()));
        }
        if self.compile_warn_secs > self.compile_timeout_secs {
            return Err(EngineError::Config(format!(
                "compile_warn_secs ({}) exceeds compile_timeout_secs ({})",
                self.compile_warn_secs, self.compile_timeout_secs
            )));
        }
        if self.handshake_timeout_ms == 0 || self.backend_query_timeout_ms == 0 {
            return Err(EngineError::Config("backend timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn vocab_paths(&self) -> VocabPaths {
        VocabPaths::new(&self.vocab_dir, &self.lang)
    }

    pub fn compile_warn(&self) -> Duration {
        Duration::from_secs(self.compile_warn_secs)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn backend_query_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_query_timeout_ms)
    }

    pub fn listener_timeout(&self) -> Option<Duration> {
        match self.listener_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> EngineResult<Option<T>> {
    match env_var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EngineError::Config(format!("{}: cannot parse '{}'", key, raw))),
    }
}

/// Resolves `<root>/<skill>/vocab/<lang>/<intent>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VocabPaths {
    root: PathBuf,
    lang: String,
}

impl VocabPaths {
    pub fn new(root: impl AsRef<Path>, lang: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            lang: lang.into(),
        }
    }

    pub fn skill_dir(&self, skill: &str) -> PathBuf {
        self.root.join(skill).join("vocab").join(&self.lang)
    }

    pub fn file(&self, skill: &str, intent: &str, ext: &str) -> PathBuf {
        self.skill_dir(skill).join(format!("{}.{}", intent, ext))
    }

    pub fn intent_file(&self, skill: &str, intent: &str) -> PathBuf {
        self.file(skill, intent, "intent")
    }
}
