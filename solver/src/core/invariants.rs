//! Semantic ledger invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::core::types::Ledger;

/// Check semantic invariants not expressible in JSON Schema:
/// - `entries.len() == lastCompletedLevel`
/// - entry levels strictly increasing
/// - the last entry's level equals `lastCompletedLevel`
/// - no stage key recorded twice
pub fn validate_ledger_invariants(ledger: &Ledger) -> Vec<String> {
    let mut errors = Vec::new();

    if ledger.entries.len() != ledger.last_completed_level as usize {
        errors.push(format!(
            "lastCompletedLevel {} does not match {} entries",
            ledger.last_completed_level,
            ledger.entries.len()
        ));
    }

    if !levels_increasing(ledger) {
        errors.push("entry levels must be strictly increasing".to_string());
    }

    if let Some(last) = ledger.entries.last()
        && last.level != ledger.last_completed_level
    {
        errors.push(format!(
            "last entry level {} does not match lastCompletedLevel {}",
            last.level, ledger.last_completed_level
        ));
    }

    let mut seen = HashSet::new();
    for entry in &ledger.entries {
        if !seen.insert(entry.stage.as_str()) {
            errors.push(format!(
                "duplicate stage '{}' at level {}",
                entry.stage, entry.level
            ));
        }
    }

    errors
}

fn levels_increasing(ledger: &Ledger) -> bool {
    ledger
        .entries
        .windows(2)
        .all(|pair| pair[0].level < pair[1].level)
}
