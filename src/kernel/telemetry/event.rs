use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kernel::intent::arbitrator::ResolutionPath;

// Allowed: ids, counts, durations, enums, renderer names
// Forbidden: query text, slot values, result data, rendered lines

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    QueryReceived {
        query_id: Uuid,
    },

    /// Skill-triggered package entering the render path.
    PackageTriggered {
        query_id: Uuid,
    },

    Resolved {
        query_id: Uuid,
        path: ResolutionPath,
        candidates: usize,
        handler_failures: usize,
    },

    RendererFailed {
        query_id: Uuid,
        renderer: String,
    },

    ListenerFailed {
        query_id: Uuid,
        listener: usize,
        timed_out: bool,
    },

    /// The dispatch could not produce a rendered response.
    Aborted {
        query_id: Uuid,
    },

    Delivered {
        query_id: Uuid,
        elapsed_ms: u64,
    },
}

impl TelemetryEvent {
    pub fn query_id(&self) -> Uuid {
        match self {
            TelemetryEvent::QueryReceived { query_id }
            | TelemetryEvent::PackageTriggered { query_id }
            | TelemetryEvent::Resolved { query_id, .. }
            | TelemetryEvent::RendererFailed { query_id, .. }
            | TelemetryEvent::ListenerFailed { query_id, .. }
            | TelemetryEvent::Aborted { query_id }
            | TelemetryEvent::Delivered { query_id, .. } => *query_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_event_survives_json() {
        let event = TelemetryEvent::Resolved {
            query_id: Uuid::new_v4(),
            path: ResolutionPath::NoMatch,
            candidates: 2,
            handler_failures: 0,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"no_match\""));
        let back: TelemetryEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.query_id(), event.query_id());
    }
}
