//! Progress ledger storage (`.solver/ledger.json`).
//!
//! The ledger is read once at startup and rewritten in full after every solved
//! stage. Reading is tolerant: a missing, unparsable, schema-invalid or
//! inconsistent file yields an empty ledger so the run starts from scratch.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::invariants::validate_ledger_invariants;
use crate::core::types::{Ledger, LedgerEntry};

const LEDGER_SCHEMA: &str = include_str!("../../schemas/ledger/v1.schema.json");

/// Owner of the on-disk ledger and its in-memory copy. Single writer.
#[derive(Debug)]
pub struct LedgerStore {
    path: PathBuf,
    ledger: Ledger,
}

impl LedgerStore {
    /// Load the ledger at `path`, falling back to an empty ledger.
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            ledger: load_ledger(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Append the proof for `level` and persist the whole ledger before returning.
    ///
    /// The in-memory ledger only changes once the file has been replaced.
    pub fn record(&mut self, level: u32, entry: LedgerEntry) -> Result<()> {
        if entry.level != level {
            bail!(
                "ledger entry level {} does not match recorded level {}",
                entry.level,
                level
            );
        }
        let mut next = self.ledger.clone();
        next.last_completed_level = level;
        next.entries.push(entry);

        let errors = validate_ledger_invariants(&next);
        if !errors.is_empty() {
            return Err(anyhow!(
                "refusing to record level {level}: {}",
                errors.join("; ")
            ));
        }

        write_ledger(&self.path, &next)?;
        info!(level, path = %self.path.display(), "ledger updated");
        self.ledger = next;
        Ok(())
    }
}

/// Load the ledger, treating any failure as "no progress yet".
pub fn load_ledger(path: &Path) -> Ledger {
    if !path.exists() {
        debug!(path = %path.display(), "no ledger on disk, starting empty");
        return Ledger::default();
    }
    match read_ledger(path) {
        Ok(ledger) => {
            debug!(
                last_completed_level = ledger.last_completed_level,
                entries = ledger.entries.len(),
                "ledger loaded"
            );
            ledger
        }
        Err(err) => {
            warn!(path = %path.display(), error = %format!("{err:#}"), "ignoring unreadable ledger");
            Ledger::default()
        }
    }
}

/// Strictly read and validate the ledger (schema + invariants).
pub fn read_ledger(path: &Path) -> Result<Ledger> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read ledger {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse ledger {}", path.display()))?;
    validate_schema(&value)?;
    let ledger: Ledger = serde_json::from_value(value)
        .with_context(|| format!("deserialize ledger {}", path.display()))?;
    let errors = validate_ledger_invariants(&ledger);
    if !errors.is_empty() {
        return Err(anyhow!("ledger invariants failed: {}", errors.join("; ")));
    }
    Ok(ledger)
}

/// Atomically write the ledger to disk (temp file + rename).
pub fn write_ledger(path: &Path, ledger: &Ledger) -> Result<()> {
    debug!(path = %path.display(), last_completed_level = ledger.last_completed_level, "writing ledger");
    let mut buf = serde_json::to_string_pretty(ledger).context("serialize ledger")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(LEDGER_SCHEMA).context("parse ledger schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "ledger schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("ledger path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp ledger {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace ledger {}", path.display()))?;
    Ok(())
}
