//! Dispatch telemetry.
//!
//! # SAFETY INVARIANT
//! Telemetry is a write-only side channel. It must never be read inside resolution
//! or rendering decisions.
//!
//! # PRIVACY INVARIANT
//! Events never carry user content (query text, result data, rendered output).
//! Only query ids, resolution paths, counts and durations are recorded.

pub mod event;
pub mod metrics;
pub mod recorder;

pub use event::TelemetryEvent;
pub use metrics::TelemetrySnapshot;
pub use recorder::TelemetryRecorder;
