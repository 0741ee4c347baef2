// Run state machine

use thiserror::Error;

/// Lifecycle of a single run: Idle -> Starting -> Running -> Completed|Failed -> Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    Start,          // start_test() accepted
    Subscribed,     // progress subscription installed, engine about to be invoked
    EngineResolved, // engine returned a result
    EngineRejected, // engine returned an error
    Finalized,      // subscription released and session reset to idle
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid run transition: {event:?} while {from:?}")]
pub struct TransitionError {
    pub from: RunState,
    pub event: RunEvent,
}

impl RunState {
    /// Transition table. Finalization is accepted from every non-idle state because it
    /// also runs when a run is abandoned half way.
    pub fn next(self, event: RunEvent) -> Result<RunState, TransitionError> {
        use RunEvent::*;
        use RunState::*;
        match (self, event) {
            (Idle, Start) => Ok(Starting),
            (Starting, Subscribed) => Ok(Running),
            (Running, EngineResolved) => Ok(Completed),
            (Running, EngineRejected) => Ok(Failed),
            (Starting | Running | Completed | Failed, Finalized) => Ok(Idle),
            (from, event) => Err(TransitionError { from, event }),
        }
    }

    pub fn is_idle(self) -> bool {
        self == RunState::Idle
    }
}
