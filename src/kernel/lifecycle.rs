use serde::{Deserialize, Serialize};

/// Lifecycle of a single query. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DispatchStage {
    /// Accepted by the dispatcher, task not yet running.
    Received,
    /// Backends and handler confidence functions are being consulted.
    Resolving,
    /// The winning handler is producing its result package.
    HandlerRunning,
    /// The package is going through the format pipeline and listeners.
    Rendering,
    Delivered,
}

impl DispatchStage {
    /// The following stage, or `None` once delivered.
    pub fn advance(self) -> Option<Self> {
        use DispatchStage::*;

        match self {
            Received => Some(Resolving),
            Resolving => Some(HandlerRunning),
            HandlerRunning => Some(Rendering),
            Rendering => Some(Delivered),
            Delivered => None,
        }
    }

    /// Whether moving to `next` is a legal forward step. Skill-triggered packages
    /// skip resolution, so jumping ahead is allowed; going back is not.
    pub fn can_move_to(self, next: DispatchStage) -> bool {
        next > self
    }
}

/// Engine-wide state, derived from the in-flight queries and the pipeline hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineState {
    /// Nothing in flight.
    Idle,
    /// At least one query is resolving or running its handler.
    Dispatched,
    /// At least one query is rendering, none are earlier.
    Rendering,
    /// Nothing in flight, but a long-running handler keeps presentation control.
    Holding,
}

impl Default for EngineState {
    fn default() -> Self {
        Self::Idle
    }
}

impl EngineState {
    pub fn derive<I>(stages: I, held: bool) -> Self
    where
        I: IntoIterator<Item = DispatchStage>,
    {
        let mut rendering = false;
        for stage in stages {
            match stage {
                DispatchStage::Received | DispatchStage::Resolving | DispatchStage::HandlerRunning => {
                    return EngineState::Dispatched
                }
                DispatchStage::Rendering => rendering = true,
                DispatchStage::Delivered => {}
            }
        }
        if rendering {
            EngineState::Rendering
        } else if held {
            EngineState::Holding
        } else {
            EngineState::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_advance_to_delivered() {
        let mut stage = DispatchStage::Received;
        let mut seen = vec![stage];
        while let Some(next) = stage.advance() {
            assert!(stage.can_move_to(next));
            stage = next;
            seen.push(stage);
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(stage, DispatchStage::Delivered);
        assert!(!DispatchStage::Rendering.can_move_to(DispatchStage::Resolving));
    }

    #[test]
    fn test_engine_state_prefers_earliest_stage() {
        use DispatchStage::*;
        assert_eq!(EngineState::derive(vec![], false), EngineState::Idle);
        assert_eq!(EngineState::derive(vec![], true), EngineState::Holding);
        assert_eq!(EngineState::derive(vec![Rendering], true), EngineState::Rendering);
        assert_eq!(EngineState::derive(vec![Rendering, Resolving], false), EngineState::Dispatched);
    }
}
