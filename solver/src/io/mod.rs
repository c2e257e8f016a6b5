//! I/O for solver commands: the game service, text providers, and files under
//! `.solver/`.

pub mod config;
pub mod gateway;
pub mod init;
pub mod ledger;
pub mod process;
pub mod prompt;
pub mod provider;
pub mod trace;
