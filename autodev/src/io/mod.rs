//! Side-effecting collaborators: filesystem, subprocesses, HTTP, templates.

pub mod assistant;
pub mod checkpoint;
pub mod config;
pub mod llm;
pub mod process;
pub mod prompt;
pub mod task_store;
pub mod workspace;
