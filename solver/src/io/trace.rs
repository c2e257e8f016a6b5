//! Run trace artifacts for `.solver/traces/`.
//!
//! Every run appends lifecycle events to `<run-id>.jsonl`. Tracing is
//! best-effort: a failing sink is logged and never changes the run's result.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::warn;

/// Lifecycle event payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceKind {
    RunStarted {
        start_stage: String,
        last_completed_level: u32,
        max_total_attempts: u32,
        max_attempts_per_level: u32,
    },
    ReplayFinished {
        replayed_levels: u32,
        next_stage: String,
    },
    AttemptStarted {
        stage: String,
        level: u32,
        stage_attempt: u32,
        total_attempt: u32,
    },
    AttemptFinished {
        stage: String,
        level: u32,
        stage_attempt: u32,
        secret: String,
        extraction: String,
        success: bool,
    },
    StageFinished {
        stage: String,
        level: u32,
        attempts: u32,
        solved: bool,
    },
    RunFinished {
        outcome: String,
        total_attempts: u32,
    },
}

/// A timestamped event for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    pub run_id: String,
    pub at: String,
    #[serde(flatten)]
    pub kind: TraceKind,
}

impl TraceEvent {
    pub fn now(run_id: &str, kind: TraceKind) -> Self {
        Self {
            run_id: run_id.to_string(),
            at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            kind,
        }
    }
}

pub trait TraceSink {
    fn emit(&self, event: &TraceEvent) -> Result<()>;
}

/// Emit `event`, logging and discarding any sink failure.
pub fn emit_best_effort(sink: &dyn TraceSink, event: TraceEvent) {
    if let Err(err) = sink.emit(&event) {
        warn!(run_id = %event.run_id, error = %format!("{err:#}"), "trace emit failed");
    }
}

/// Appends one JSON object per line to `.solver/traces/<run-id>.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonlTraceSink {
    path: PathBuf,
}

impl JsonlTraceSink {
    pub fn new(root: &Path, run_id: &str) -> Self {
        Self {
            path: trace_path(root, run_id),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TraceSink for JsonlTraceSink {
    fn emit(&self, event: &TraceEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create trace dir {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(event).context("serialize trace event")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open trace {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append trace {}", self.path.display()))
    }
}

/// Sink used when tracing is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn emit(&self, _event: &TraceEvent) -> Result<()> {
        Ok(())
    }
}

pub fn trace_path(root: &Path, run_id: &str) -> PathBuf {
    root.join(".solver")
        .join("traces")
        .join(format!("{run_id}.jsonl"))
}
