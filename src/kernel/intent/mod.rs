//! Intent resolution: match backends, the handler registry and confidence arbitration.

pub mod arbitrator;
pub mod backend;
pub mod handler;
pub mod package;
pub mod registry;
pub mod remote;
pub mod types;

pub use arbitrator::{combine, ConfidenceArbitrator, Resolution, ResolutionPath, Verdict, ACCEPTANCE_THRESHOLD};
pub use backend::{KeywordBackend, MatchBackend, PatternBackend};
pub use handler::{running_confidence, Handler, DEFAULT_HANDLER_CONFIDENCE};
pub use package::{HoldHandle, ResultPackage};
pub use registry::IntentRegistry;
pub use remote::RemoteBackend;
pub use types::{IntentMatch, IntentName, IntentPattern, IntentSpec};
