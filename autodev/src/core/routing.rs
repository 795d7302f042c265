//! Conditional edge evaluated after each coder invocation.

use crate::core::state::SessionState;
use crate::core::types::Stage;

/// Where the graph goes after a coder tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoderRoute {
    Continue,
    Done,
}

/// Loop back into the coder unless the dev stage is finished.
///
/// Finished means the index has passed the end, the iteration cap is hit,
/// the coder already moved the stage to `done` (stall or exhaustion), or an
/// error was recorded before any task list existed.
pub fn coder_route(state: &SessionState, max_iterations: u32) -> CoderRoute {
    if state.stage == Stage::Done {
        return CoderRoute::Done;
    }
    if state.error.is_some() && state.tasks.is_empty() {
        return CoderRoute::Done;
    }
    if state.current_task_index >= state.tasks.len() {
        return CoderRoute::Done;
    }
    if state.coding_iterations >= max_iterations {
        return CoderRoute::Done;
    }
    CoderRoute::Continue
}
