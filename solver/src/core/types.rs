//! Shared deterministic types for the solver core.
//!
//! These types define stable contracts between the orchestrator, the ledger and
//! the stage gateway. They carry no I/O and serialize to the wire/file shapes
//! used by the game service and `.solver/ledger.json`.

use serde::{Deserialize, Serialize};

/// Immutable snapshot of one stage, fetched fresh at the start of each stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInfo {
    /// Stage key used for every request (e.g. `baseline`).
    pub key: String,
    /// Ordinal level number reported by the service.
    pub level: u32,
    /// Human-readable description of the stage's defences.
    pub description: String,
}

/// One prompt/response exchange within a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub prompt: String,
    pub response: String,
}

/// Result of a guess submission. A failed guess is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuessOutcome {
    pub success: bool,
    #[serde(default, rename = "next_defender", skip_serializing_if = "Option::is_none")]
    pub next_stage: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Evidence that produced a successful guess for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub level: u32,
    #[serde(rename = "defender")]
    pub stage: String,
    pub prompt: String,
    #[serde(rename = "answer")]
    pub response: String,
    #[serde(rename = "password")]
    pub secret: String,
    /// Transition observed when the stage was solved. Older ledgers omit it.
    #[serde(
        default,
        rename = "next_defender",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_stage: Option<String>,
}

/// Durable progress record (`.solver/ledger.json`).
///
/// `entries[i]` is the proof for level `i + 1`, so
/// `entries.len() == last_completed_level` at all times.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(rename = "lastCompletedLevel")]
    pub last_completed_level: u32,
    pub entries: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stage key recorded as the successor of the last completed stage.
    pub fn resume_stage(&self) -> Option<&str> {
        self.entries.last()?.next_stage.as_deref()
    }
}
