//! Deterministic, pure logic shared by the workflow.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod documents;
pub mod extract;
pub mod output_policy;
pub mod routing;
pub mod scheduler;
pub mod state;
pub mod task_graph;
pub mod types;
