//! Staged LLM development workflow: PM, then Architect, then Coder.
//!
//! A requirement becomes a PRD, the PRD becomes a design plus a dependency
//! graph of coding tasks, and the tasks are handed one at a time to an
//! external coding assistant. Every step is checkpointed so a session can be
//! paused for human feedback and resumed later.
//!
//! - **[`core`]**: Pure logic (task graph, scheduling, state merging, routing,
//!   document checks). No I/O.
//! - **[`io`]**: Filesystem, checkpoints, LLM and subprocess collaborators.
//!   Traits at each seam so tests can script them.
//! - **[`agents`]**: The stages, built on both layers.
//! - **[`workflow`]** and **[`recovery`]**: The state machine and resume logic
//!   behind the CLI.

pub mod agents;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod recovery;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
