//! Stable exit codes for solver CLI commands.

/// Command succeeded; `solve` reached the final stage.
pub const OK: i32 = 0;
/// Invalid config, ledger write failure, provider failure or any other error.
pub const FAILED: i32 = 1;
/// `solve` ran out of attempts for a stage or for the whole run.
pub const EXHAUSTED: i32 = 3;
/// A call to the game service failed.
pub const TRANSPORT: i32 = 4;
/// A recorded ledger entry no longer reproduces against the service.
pub const REPLAY_MISMATCH: i32 = 5;
