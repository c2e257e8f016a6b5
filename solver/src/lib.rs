//! Staged secret-guessing solver.
//!
//! The solver plays a multi-stage password game: each stage's defender guards a
//! secret, and the solver crafts prompts until a reply leaks it. Progress is
//! kept in a ledger so later runs replay solved stages and resume at the first
//! unsolved one. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (budgets, history, extraction,
//!   ledger invariants). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (HTTP, child processes, files).
//!   Behind traits so tests can script them.
//!
//! [`solve`] drives both to implement `solver solve`.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod solve;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
