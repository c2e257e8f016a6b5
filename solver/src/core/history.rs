//! Per-stage attempt history for the current run.

use std::collections::BTreeMap;

use crate::core::types::AttemptRecord;

/// Append-only attempt records keyed by stage. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptHistory {
    stages: BTreeMap<String, Vec<AttemptRecord>>,
}

impl AttemptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records for `stage` in attempt order. Unknown stages have none.
    pub fn for_stage(&self, stage: &str) -> &[AttemptRecord] {
        self.stages.get(stage).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn record(&mut self, stage: &str, record: AttemptRecord) {
        self.stages.entry(stage.to_string()).or_default().push(record);
    }
}
