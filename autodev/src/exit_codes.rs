//! Process exit codes for the `autodev` CLI.

/// Command succeeded; the run completed or paused cleanly.
pub const OK: i32 = 0;
/// Invalid input, missing session, or a stage failure.
pub const ERROR: i32 = 1;
